pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod error_handler;
pub mod filter;
pub mod heartbeat;
pub mod offset_context;
pub mod reader;
pub mod signal;
pub mod topic;
