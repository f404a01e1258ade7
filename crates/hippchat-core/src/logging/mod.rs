//! JSONL logging.
//!
//! Each instance (one logged-in user) writes its own JSONL file, so two
//! users chatting through one shared store directory on the same machine
//! keep separate logs.
//!
//! ## Layout
//!
//! ```text
//! logs/
//! └── raw/                              # one file per instance per day
//!     ├── 2026-01-21_5Grw___utQY.jsonl
//!     └── 2026-01-21_5FHn___94ty.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use hippchat_core::logging::LoggingBuilder;
//!
//! let path = LoggingBuilder::new("./logs", short_address(&address))
//!     .with_default_directive("hippchat_core=info")
//!     .init()?;
//! ```
//!
//! ## Querying logs with jq
//!
//! ```bash
//! # Poll failures for one contact
//! jq 'select(.msg == "Poll failed" and .contact == "5FHn...")' logs/raw/*.jsonl
//!
//! # Timeline across instances
//! cat logs/raw/*.jsonl | jq -s 'sort_by(.ts)'
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{conversation_entries, read_all_entries, InstanceLogWriter};
