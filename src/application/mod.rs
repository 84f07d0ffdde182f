// Application layer - Use cases and the ports they depend on
pub mod history_service;
pub mod location_provider;
pub mod pipeline;
pub mod session_store;
pub mod snapshot;
pub mod tracking_api;
pub mod tracking_service;
