//! Reference source: a newline-delimited JSON change journal.
//!
//! Line numbers are log sequence numbers. Sessions on the journal track
//! transaction state like a database connection would.

pub mod connection;
pub mod connector;
pub mod entry;
pub mod reader;
pub mod writer;

pub use connection::{JournalConnection, JournalConnectionFactory};
pub use connector::{JournalConnector, JournalOptions};
pub use entry::JournalEntry;
pub use reader::JournalReader;
pub use writer::JournalWriter;
