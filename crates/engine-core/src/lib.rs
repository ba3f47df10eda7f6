pub mod connection;
pub mod context;
pub mod error;
pub mod metrics;
pub mod offsets;
pub mod queue;
pub mod retry;
pub mod schema;
