//! An embedded, single-node key-value store whose durable state is a
//! sequence of append-only log segments, each indexed in memory.
//!
//! Reads walk segments newest-to-oldest so the most recent write for a
//! key always wins; a background compactor periodically merges older
//! segments together, dropping keys shadowed by newer writes and
//! tombstones that have become the oldest surviving record for their
//! key.
//!
//! ```no_run
//! use segkv::{Config, Engine};
//!
//! let engine = Engine::new(Config::new("./data")).unwrap();
//! engine.insert(b"hello", b"world").unwrap();
//! assert_eq!(engine.query(b"hello").unwrap(), Some(b"world".to_vec()));
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.query(b"hello").unwrap(), None);
//! engine.shutdown().unwrap();
//! ```

mod codec;
mod compactor;
mod config;
mod engine;
mod error;
mod list;
mod recovery;
mod segment;

pub use config::{Config, IndexKind};
pub use engine::Engine;
pub use error::{Error, Result};
