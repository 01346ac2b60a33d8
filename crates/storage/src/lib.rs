pub mod kv;
pub mod sessions;

pub use kv::FileKvStore;
pub use sessions::{LogEntry, SessionMetadata, SessionRecord, SessionRegistry};
