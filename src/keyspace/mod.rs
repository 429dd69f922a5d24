//! Logical databases: key → value tables.
//!
//! A [`Keyspace`] holds `databases` independent [`Db`]s, each behind its own
//! mutex. Within a database every operation runs to completion under that
//! lock; the structures below it do no locking of their own.

mod lazyfree;

pub use lazyfree::{Garbage, Reclaimer, LAZYFREE_THRESHOLD};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::debug;

use crate::config::Config;
use crate::dict::{AddError, Dict};
use crate::error::{Error, Result};
use crate::object::{Clock, ObjType, ObjValue, Object, SharedIntegers, SystemClock, Value};
use crate::sds::Sds;

/// One logical database.
pub struct Db {
    id: usize,
    dict: Dict<Sds, Value>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    shared: Option<Arc<SharedIntegers>>,
    reclaimer: Option<Arc<Reclaimer>>,
    rng: SmallRng,
}

impl Db {
    pub fn new(
        id: usize,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        shared: Option<Arc<SharedIntegers>>,
        reclaimer: Option<Arc<Reclaimer>>,
    ) -> Self {
        Self {
            id,
            dict: Dict::with_seed(config.hash_seed),
            config,
            clock,
            shared,
            reclaimer,
            rng: SmallRng::from_entropy(),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    /// Drop a detached value, through the reclaimer when lazy freeing is on.
    fn release(&self, value: Value) {
        if self.config.lazyfree_server_del {
            if let Some(reclaimer) = &self.reclaimer {
                reclaimer.free(Garbage::Value(value));
            }
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Value for `key`, recording the access.
    pub fn lookup(&mut self, key: &[u8]) -> Option<&Value> {
        let value = self.dict.find(key)?;
        value.touch(&self.config, &*self.clock, &mut self.rng);
        Some(&*value)
    }

    /// Writable value for `key`, unsharing it first.
    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        let obj = self.dict.find(key)?.make_mut();
        obj.touch(&self.config, &*self.clock, &mut self.rng);
        Some(obj)
    }

    /// Value for `key` without touching its access clock or stepping a
    /// rehash.
    pub fn peek(&self, key: &[u8]) -> Option<&Value> {
        self.dict.get(key)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.dict.contains_key(key)
    }

    pub fn type_of(&self, key: &[u8]) -> Option<ObjType> {
        self.peek(key).map(|v| v.obj_type())
    }

    /// Fails with [`Error::WrongType`] if `key` holds something other than
    /// `expected`. A missing key passes.
    pub fn check_type(&self, key: &[u8], expected: ObjType) -> Result<()> {
        match self.type_of(key) {
            Some(t) if t != expected => Err(Error::WrongType),
            _ => Ok(()),
        }
    }

    /// String value of `key` in its decimal form for integers.
    pub fn get_string(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup(key) {
            None => Ok(None),
            Some(v) => match &v.value {
                ObjValue::Str(s) => Ok(Some(s.to_vec())),
                _ => Err(Error::WrongType),
            },
        }
    }

    pub fn random_key(&mut self) -> Option<Sds> {
        self.dict.random_entry(&mut self.rng).map(|(k, _)| k.clone())
    }

    pub fn keys(&self) -> Vec<Sds> {
        self.dict.iter().map(|(k, _)| k.clone()).collect()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Add a new key. Fails with [`Error::KeyExists`] if `key` is present.
    pub fn add(&mut self, key: &[u8], value: impl Into<Value>) -> Result<()> {
        match self.dict.add(Sds::try_new(key)?, value.into()) {
            Ok(()) => Ok(()),
            Err(AddError::Occupied { .. }) => Err(Error::KeyExists),
            Err(AddError::Alloc(e)) => Err(e),
        }
    }

    /// Replace the value of an existing key, handing back the old one. Fails
    /// with [`Error::NoSuchKey`] if `key` is absent.
    pub fn overwrite(&mut self, key: &[u8], value: impl Into<Value>) -> Result<Value> {
        let slot = self.dict.find(key).ok_or(Error::NoSuchKey)?;
        Ok(std::mem::replace(slot, value.into()))
    }

    /// Insert or overwrite `key`.
    pub fn set(&mut self, key: &[u8], value: impl Into<Value>) -> Result<()> {
        if let Some(old) = self.dict.replace(Sds::try_new(key)?, value.into())? {
            self.release(old);
        }
        Ok(())
    }

    /// Set `key` to a string value in its most compact encoding.
    pub fn set_string(&mut self, key: &[u8], s: &[u8]) -> Result<()> {
        let obj = Object::string(s, &self.config, &*self.clock)?;
        let shared = if self.config.shared_integers {
            self.shared.as_deref()
        } else {
            None
        };
        let value = obj.try_encoding(shared);
        self.set(key, value)
    }

    /// Remove `key`. The entry is unlinked before its value is released, so
    /// a background drop never races a lookup.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.dict.unlink(key) {
            Some((_, value)) => {
                self.release(value);
                true
            }
            None => false,
        }
    }

    /// Remove every key, returning how many there were.
    pub fn flush(&mut self) -> usize {
        let old = std::mem::replace(&mut self.dict, Dict::with_seed(self.config.hash_seed));
        let removed = old.len();
        match &self.reclaimer {
            Some(reclaimer) if self.config.lazyfree_server_del => {
                reclaimer.free(Garbage::Table(old));
            }
            _ => drop(old),
        }
        debug!(db = self.id, removed, "database flushed");
        removed
    }

    /// Spend up to `budget` moving buckets of an in-progress rehash.
    pub fn rehash_for(&mut self, budget: Duration) -> usize {
        self.dict.rehash_for(budget)
    }

    /// Shrink the table when it is mostly empty.
    pub fn try_resize(&mut self) -> Result<()> {
        if !self.dict.is_rehashing() && self.dict.buckets() > 4 && self.dict.len() * 10 < self.dict.buckets() {
            self.dict.resize()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("id", &self.id)
            .field("keys", &self.dict.len())
            .field("buckets", &self.dict.buckets())
            .finish()
    }
}

/// A fixed number of databases sharing a configuration.
#[derive(Debug)]
pub struct Keyspace {
    dbs: Vec<Mutex<Db>>,
    config: Arc<Config>,
    reclaimer: Option<Arc<Reclaimer>>,
}

impl Keyspace {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(mut config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let shared = config.shared_integers.then(|| Arc::new(SharedIntegers::new()));
        let reclaimer = if config.lazyfree_server_del {
            Some(Arc::new(Reclaimer::spawn()?))
        } else {
            None
        };
        let dbs = (0..config.databases)
            .map(|id| {
                Mutex::new(Db::new(
                    id,
                    Arc::clone(&config),
                    Arc::clone(&clock),
                    shared.clone(),
                    reclaimer.clone(),
                ))
            })
            .collect();
        Ok(Self {
            dbs,
            config,
            reclaimer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn databases(&self) -> usize {
        self.dbs.len()
    }

    /// Run `f` with database `idx` locked.
    pub fn with_db<R>(&self, idx: usize, f: impl FnOnce(&mut Db) -> R) -> Result<R> {
        let db = self.dbs.get(idx).ok_or(Error::NoSuchDb(idx))?;
        Ok(f(&mut db.lock()))
    }

    /// Keys across all databases.
    pub fn total_keys(&self) -> usize {
        self.dbs.iter().map(|db| db.lock().len()).sum()
    }

    pub fn flush_all(&self) -> usize {
        self.dbs.iter().map(|db| db.lock().flush()).sum()
    }

    /// Background reclaimer, present when lazy freeing is enabled.
    pub fn reclaimer(&self) -> Option<&Reclaimer> {
        self.reclaimer.as_deref()
    }
}
