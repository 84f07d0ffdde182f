// Port for the platform location capability
use crate::domain::position::RawSample;
use crate::error::LocationError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Continuous subscription; dropping the stream unsubscribes
pub type SampleStream = BoxStream<'static, Result<RawSample, LocationError>>;

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Whether this environment has a location capability at all
    fn is_available(&self) -> bool;

    fn watch(&self) -> SampleStream;

    /// One-shot read of the current position
    async fn current_position(&self) -> Result<RawSample, LocationError>;
}
