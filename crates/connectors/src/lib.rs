pub mod error;
pub mod journal;
