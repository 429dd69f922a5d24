//! Typed value objects.
//!
//! An [`Object`] pairs a value with its 24-bit access clock field. The value
//! is a sum type over the five kinds the store knows about; its encoding is
//! implied by the variant rather than recorded beside it.
//!
//! Small integers are shared: the keyspace can hold [`Value::Shared`] handles
//! into a [`SharedIntegers`] pool instead of one object per key. Shared
//! objects are never written to; [`Value::make_mut`] swaps in a private copy.

mod clock;

pub use clock::*;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use rand::Rng;

use crate::config::{Config, MaxmemoryPolicy};
use crate::error::Result;
use crate::quicklist::Quicklist;
use crate::sds::Sds;
use crate::types::{HashValue, SetValue, ZSetValue};
use crate::util::{ll2string, string2ll, MAX_LONG_DIGITS};

/// Strings up to this length are stored in the compact embedded form.
pub const EMBSTR_SIZE_LIMIT: usize = 44;

/// Integers in `0..SHARED_INTEGERS` are served from the shared pool.
pub const SHARED_INTEGERS: i64 = 10000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjType {
    String,
    List,
    Hash,
    Set,
    ZSet,
}

impl ObjType {
    pub fn name(self) -> &'static str {
        match self {
            ObjType::String => "string",
            ObjType::List => "list",
            ObjType::Hash => "hash",
            ObjType::Set => "set",
            ObjType::ZSet => "zset",
        }
    }
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical representation of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Int,
    Embstr,
    Raw,
    Quicklist,
    Listpack,
    HashTable,
    Intset,
    Skiplist,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Int => "int",
            Encoding::Embstr => "embstr",
            Encoding::Raw => "raw",
            Encoding::Quicklist => "quicklist",
            Encoding::Listpack => "listpack",
            Encoding::HashTable => "hashtable",
            Encoding::Intset => "intset",
            Encoding::Skiplist => "skiplist",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// String payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrValue {
    Int(i64),
    /// Short string, at most [`EMBSTR_SIZE_LIMIT`] bytes.
    Embstr(Sds),
    Raw(Sds),
}

impl StrValue {
    /// Pick embstr or raw by length.
    pub fn from_bytes(s: &[u8]) -> Result<Self> {
        let sds = Sds::try_new(s)?;
        Ok(if s.len() <= EMBSTR_SIZE_LIMIT {
            StrValue::Embstr(sds)
        } else {
            StrValue::Raw(sds)
        })
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            StrValue::Int(_) => Encoding::Int,
            StrValue::Embstr(_) => Encoding::Embstr,
            StrValue::Raw(_) => Encoding::Raw,
        }
    }

    /// Length of the string form.
    pub fn len(&self) -> usize {
        match self {
            StrValue::Int(v) => {
                let mut buf = [0u8; MAX_LONG_DIGITS + 1];
                ll2string(&mut buf, *v)
            }
            StrValue::Embstr(s) | StrValue::Raw(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The string form, decoding integers to decimal.
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            StrValue::Int(v) => {
                let mut buf = [0u8; MAX_LONG_DIGITS + 1];
                let n = ll2string(&mut buf, *v);
                buf[..n].to_vec()
            }
            StrValue::Embstr(s) | StrValue::Raw(s) => s.as_bytes().to_vec(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StrValue::Int(v) => Some(*v),
            StrValue::Embstr(s) | StrValue::Raw(s) => string2ll(s),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ObjValue {
    Str(StrValue),
    List(Quicklist),
    Hash(HashValue),
    Set(SetValue),
    ZSet(ZSetValue),
}

/// A value plus its access clock.
#[derive(Clone, Debug)]
pub struct Object {
    pub value: ObjValue,
    /// LRU clock, or LFU minutes (high 16 bits) and counter (low 8 bits).
    lru: u32,
}

impl Object {
    /// Wrap `value` with an access clock initialised for the configured
    /// policy.
    pub fn new(value: ObjValue, config: &Config, clock: &dyn Clock) -> Self {
        let lru = match config.maxmemory_policy {
            MaxmemoryPolicy::Lru => clock.lru_clock(),
            MaxmemoryPolicy::Lfu => lfu_init(clock.lfu_minutes()),
        };
        Self { value, lru }
    }

    /// Object with an explicit clock field.
    pub fn with_lru(value: ObjValue, lru: u32) -> Self {
        Self {
            value,
            lru: lru & LRU_CLOCK_MAX,
        }
    }

    pub fn string(s: &[u8], config: &Config, clock: &dyn Clock) -> Result<Self> {
        Ok(Self::new(ObjValue::Str(StrValue::from_bytes(s)?), config, clock))
    }

    pub fn from_i64(v: i64, config: &Config, clock: &dyn Clock) -> Self {
        Self::new(ObjValue::Str(StrValue::Int(v)), config, clock)
    }

    pub fn list(config: &Config, clock: &dyn Clock) -> Self {
        Self::new(ObjValue::List(Quicklist::from_config(config)), config, clock)
    }

    pub fn hash(config: &Config, clock: &dyn Clock) -> Self {
        Self::new(ObjValue::Hash(HashValue::new()), config, clock)
    }

    /// Empty set suited to hold `first`.
    pub fn set(first: &[u8], config: &Config, clock: &dyn Clock) -> Self {
        Self::new(ObjValue::Set(SetValue::for_member(first, config)), config, clock)
    }

    pub fn zset(config: &Config, clock: &dyn Clock) -> Self {
        Self::new(ObjValue::ZSet(ZSetValue::new()), config, clock)
    }

    pub fn obj_type(&self) -> ObjType {
        match &self.value {
            ObjValue::Str(_) => ObjType::String,
            ObjValue::List(_) => ObjType::List,
            ObjValue::Hash(_) => ObjType::Hash,
            ObjValue::Set(_) => ObjType::Set,
            ObjValue::ZSet(_) => ObjType::ZSet,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match &self.value {
            ObjValue::Str(s) => s.encoding(),
            ObjValue::List(_) => Encoding::Quicklist,
            ObjValue::Hash(h) => h.encoding(),
            ObjValue::Set(s) => s.encoding(),
            ObjValue::ZSet(z) => z.encoding(),
        }
    }

    /// Raw 24-bit clock field.
    #[inline]
    pub fn lru(&self) -> u32 {
        self.lru
    }

    /// Record an access.
    pub fn touch(&mut self, config: &Config, clock: &dyn Clock, rng: &mut impl Rng) {
        match config.maxmemory_policy {
            MaxmemoryPolicy::Lru => self.lru = clock.lru_clock(),
            MaxmemoryPolicy::Lfu => {
                let minutes = clock.lfu_minutes();
                let counter = lfu_decr_and_return(self.lru, minutes, config.lfu_decay_time);
                let counter = lfu_log_incr(counter, config.lfu_log_factor, rng);
                self.lru = (minutes as u32) << 8 | counter as u32;
            }
        }
    }

    /// Milliseconds since last access. Meaningful under LRU only.
    pub fn idle_time(&self, clock: &dyn Clock) -> u64 {
        estimate_idle_time(self.lru, clock.lru_clock())
    }

    /// Decayed access frequency counter. Meaningful under LFU only.
    pub fn lfu_counter(&self, config: &Config, clock: &dyn Clock) -> u8 {
        lfu_decr_and_return(self.lru, clock.lfu_minutes(), config.lfu_decay_time)
    }

    /// Approximate number of allocations dropping this object releases.
    pub fn free_effort(&self) -> usize {
        match &self.value {
            ObjValue::Str(_) => 1,
            ObjValue::List(ql) => ql.node_count(),
            ObjValue::Hash(h) => h.free_effort(),
            ObjValue::Set(s) => s.free_effort(),
            ObjValue::ZSet(z) => z.free_effort(),
        }
    }

    /// Re-encode a string object into its most compact form. Decimal strings
    /// of at most 20 bytes become integers, served from `shared` when in
    /// range; short strings become embstr; long strings lose excess capacity.
    /// Other types pass through.
    pub fn try_encoding(mut self, shared: Option<&SharedIntegers>) -> Value {
        let ObjValue::Str(s) = &mut self.value else {
            return Value::Owned(self);
        };
        let bytes = match s {
            StrValue::Int(_) => return Value::Owned(self),
            StrValue::Embstr(b) | StrValue::Raw(b) => b,
        };

        if bytes.len() <= MAX_LONG_DIGITS {
            if let Some(v) = string2ll(bytes) {
                if let Some(obj) = shared.and_then(|pool| pool.get(v)) {
                    return Value::Shared(obj);
                }
                *s = StrValue::Int(v);
                return Value::Owned(self);
            }
        }

        if bytes.len() <= EMBSTR_SIZE_LIMIT {
            if let StrValue::Raw(b) = s {
                let mut b = std::mem::take(b);
                b.remove_free_space();
                *s = StrValue::Embstr(b);
            }
            return Value::Owned(self);
        }

        if bytes.avail() > bytes.len() / 10 {
            bytes.remove_free_space();
        }
        Value::Owned(self)
    }
}

/// Pool of immutable integer objects `0..SHARED_INTEGERS`.
#[derive(Debug)]
pub struct SharedIntegers {
    objs: Vec<Arc<Object>>,
}

impl SharedIntegers {
    pub fn new() -> Self {
        let objs = (0..SHARED_INTEGERS)
            .map(|v| Arc::new(Object::with_lru(ObjValue::Str(StrValue::Int(v)), 0)))
            .collect();
        Self { objs }
    }

    pub fn get(&self, v: i64) -> Option<Arc<Object>> {
        usize::try_from(v).ok().and_then(|i| self.objs.get(i)).cloned()
    }
}

impl Default for SharedIntegers {
    fn default() -> Self {
        Self::new()
    }
}

/// A keyspace value: privately owned, or a handle into a shared pool.
#[derive(Clone, Debug)]
pub enum Value {
    Owned(Object),
    Shared(Arc<Object>),
}

impl Value {
    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self, Value::Shared(_))
    }

    /// Mutable access, first replacing a shared handle with a private copy.
    pub fn make_mut(&mut self) -> &mut Object {
        if let Value::Shared(obj) = self {
            let owned = Object::clone(obj);
            *self = Value::Owned(owned);
        }
        match self {
            Value::Owned(obj) => obj,
            Value::Shared(_) => unreachable!("unshared above"),
        }
    }

    /// Record an access. Shared objects keep their clock.
    pub fn touch(&mut self, config: &Config, clock: &dyn Clock, rng: &mut impl Rng) {
        if let Value::Owned(obj) = self {
            obj.touch(config, clock, rng);
        }
    }

    pub fn free_effort(&self) -> usize {
        match self {
            Value::Owned(obj) => obj.free_effort(),
            Value::Shared(_) => 1,
        }
    }
}

impl Deref for Value {
    type Target = Object;

    fn deref(&self) -> &Object {
        match self {
            Value::Owned(obj) => obj,
            Value::Shared(obj) => obj,
        }
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Owned(obj)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;

    fn string(s: &[u8]) -> Object {
        Object::string(s, &Config::default(), &ManualClock::new(0)).unwrap()
    }

    #[test]
    fn test_string_encodings() {
        assert_eq!(string(b"hello").encoding(), Encoding::Embstr);
        assert_eq!(string(&[b'x'; 44]).encoding(), Encoding::Embstr);
        assert_eq!(string(&[b'x'; 45]).encoding(), Encoding::Raw);
        assert_eq!(Object::from_i64(7, &Config::default(), &SystemClock).encoding(), Encoding::Int);
    }

    #[test]
    fn test_try_encoding_integers() {
        let pool = SharedIntegers::new();

        let v = string(b"42").try_encoding(Some(&pool));
        assert!(v.is_shared());
        assert_eq!(v.encoding(), Encoding::Int);

        let v = string(b"42").try_encoding(None);
        assert!(!v.is_shared());
        assert_eq!(v.encoding(), Encoding::Int);

        let v = string(b"123456").try_encoding(Some(&pool));
        assert!(!v.is_shared());
        let ObjValue::Str(s) = &v.value else { panic!("not a string") };
        assert_eq!(s.as_i64(), Some(123456));
        assert_eq!(s.to_vec(), b"123456");

        // Not canonical decimal.
        assert_eq!(string(b"007").try_encoding(Some(&pool)).encoding(), Encoding::Embstr);
        assert_eq!(string(b"-0").try_encoding(None).encoding(), Encoding::Embstr);
    }

    #[test]
    fn test_try_encoding_strings() {
        let v = string(&[b'a'; 100]).try_encoding(None);
        assert_eq!(v.encoding(), Encoding::Raw);

        let mut raw = Sds::new(b"short");
        raw.make_room_for(1000).unwrap();
        let obj = Object::with_lru(ObjValue::Str(StrValue::Raw(raw)), 0);
        let v = obj.try_encoding(None);
        assert_eq!(v.encoding(), Encoding::Embstr);

        let mut raw = Sds::new(&[b'b'; 100]);
        raw.make_room_for(500).unwrap();
        let obj = Object::with_lru(ObjValue::Str(StrValue::Raw(raw)), 0);
        let v = obj.try_encoding(None);
        let ObjValue::Str(StrValue::Raw(s)) = &v.value else { panic!("not raw") };
        assert_eq!(s.avail(), 0);
        assert_eq!(s.len(), 100);
    }

    #[test]
    fn test_make_mut_unshares() {
        let pool = SharedIntegers::new();
        let mut v = Value::Shared(pool.get(5).unwrap());
        let obj = v.make_mut();
        obj.value = ObjValue::Str(StrValue::Int(6));
        assert!(!v.is_shared());
        let ObjValue::Str(s) = &pool.get(5).unwrap().value else { panic!("not a string") };
        assert_eq!(s.as_i64(), Some(5));
        assert!(pool.get(SHARED_INTEGERS).is_none());
        assert!(pool.get(-1).is_none());
    }

    #[test]
    fn test_touch_lru() {
        let clock = ManualClock::new(10_000);
        let config = Config::default();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut obj = Object::list(&config, &clock);
        assert_eq!(obj.lru(), 10);
        clock.advance(std::time::Duration::from_secs(5));
        assert_eq!(obj.idle_time(&clock), 5000);
        obj.touch(&config, &clock, &mut rng);
        assert_eq!(obj.idle_time(&clock), 0);
    }

    #[test]
    fn test_touch_lfu() {
        let clock = ManualClock::new(60_000 * 3);
        let config = Config {
            maxmemory_policy: MaxmemoryPolicy::Lfu,
            ..Config::default()
        };
        let mut rng = SmallRng::seed_from_u64(0);
        let mut obj = Object::hash(&config, &clock);
        assert_eq!(obj.lru(), (3 << 8) | LFU_INIT_VAL as u32);
        // At the initial value the increment probability is 1.
        obj.touch(&config, &clock, &mut rng);
        assert_eq!(obj.lfu_counter(&config, &clock), LFU_INIT_VAL + 1);
        clock.advance(std::time::Duration::from_secs(60 * 4));
        assert_eq!(obj.lfu_counter(&config, &clock), LFU_INIT_VAL - 3);
    }

    #[test]
    fn test_types_and_effort() {
        let config = Config::default();
        let clock = SystemClock;
        assert_eq!(Object::list(&config, &clock).obj_type(), ObjType::List);
        assert_eq!(Object::set(b"1", &config, &clock).encoding(), Encoding::Intset);
        assert_eq!(Object::set(b"a", &config, &clock).encoding(), Encoding::HashTable);
        assert_eq!(Object::zset(&config, &clock).encoding(), Encoding::Listpack);
        assert_eq!(Object::hash(&config, &clock).obj_type().to_string(), "hash");
        assert_eq!(string(b"x").free_effort(), 1);
    }
}
