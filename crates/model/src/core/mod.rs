pub mod identifiers;
pub mod offset;
pub mod position;
