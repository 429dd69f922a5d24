//! # kvcore
//!
//! Storage core of an in-memory keyed data store: the compact encodings used
//! for small collections, the structures large collections graduate to, and
//! an incrementally rehashed hash table holding the keyspace.
//!
//! - [`sds`]: binary-safe strings with size-classed headers
//! - [`listpack`] / [`ziplist`]: packed sequences of strings and integers
//! - [`intset`]: sorted integer arrays with width upgrade
//! - [`quicklist`]: linked list of listpack nodes with optional compression
//! - [`dict`]: hash table with incremental rehashing
//! - [`skiplist`]: score-ordered index with rank queries
//! - [`types`]: hash, set and sorted-set values that switch encoding by size
//! - [`object`] / [`keyspace`]: typed values, access clocks and databases
//!
//! ## Example
//!
//! ```rust
//! use kvcore::{Config, Keyspace, ObjType};
//!
//! let ks = Keyspace::new(Config::default()).unwrap();
//! ks.with_db(0, |db| {
//!     db.set_string(b"greeting", b"hello").unwrap();
//!     db.set_string(b"answer", b"42").unwrap();
//!     assert_eq!(db.get_string(b"answer").unwrap().unwrap(), b"42");
//!     assert_eq!(db.type_of(b"greeting"), Some(ObjType::String));
//! })
//! .unwrap();
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod arena;
pub mod config;
pub mod dict;
pub mod encoding;
pub mod error;
pub mod intset;
pub mod keyspace;
pub mod listpack;
pub mod object;
pub mod quicklist;
pub mod sds;
pub mod skiplist;
pub mod types;
pub mod util;
pub mod ziplist;

pub use config::{Config, MaxmemoryPolicy};
pub use dict::{Dict, ResizePolicy};
pub use encoding::{Element, ElementBuf};
pub use error::{Error, Result};
pub use intset::Intset;
pub use keyspace::{Db, Keyspace, Reclaimer};
pub use listpack::{End, Listpack, Where};
pub use object::{Clock, Encoding, ManualClock, ObjType, ObjValue, Object, SystemClock, Value};
pub use quicklist::{Direction, Quicklist};
pub use sds::Sds;
pub use skiplist::{LexRange, ScoreRange, Skiplist};
pub use types::{HashValue, SetValue, ZAddOutcome, ZSetValue};
pub use ziplist::Ziplist;

#[cfg(test)]
mod proptests;
