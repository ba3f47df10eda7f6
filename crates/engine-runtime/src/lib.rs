pub mod connector;
pub mod convert;
pub mod error;
pub mod task;

#[cfg(test)]
mod tests;
