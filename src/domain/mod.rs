// Domain layer - Pure tracking models and algorithms
pub mod activity;
pub mod averaging;
pub mod geo;
pub mod path;
pub mod position;
pub mod queue;
pub mod rate_limit;
pub mod session;
