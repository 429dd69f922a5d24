//! Collection values with a compact encoding for small sizes.
//!
//! Each type starts in a packed encoding and converts once, on crossing a
//! configured threshold, to a hash table (plus a skip list for sorted sets).

pub mod hash;
pub mod set;
pub mod zset;

pub use hash::HashValue;
pub use set::SetValue;
pub use zset::{ZAddOutcome, ZSetValue};
