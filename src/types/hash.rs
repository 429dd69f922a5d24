//! Hash values: field → value maps.
//!
//! Small hashes are a listpack of alternating field and value entries. A hash
//! moves to a [`Dict`] once it has more than `hash_max_listpack_entries`
//! fields or any field or value longer than `hash_max_listpack_value` bytes,
//! and never moves back.

use tracing::debug;

use crate::config::Config;
use crate::dict::Dict;
use crate::error::Result;
use crate::listpack::Listpack;
use crate::object::Encoding;
use crate::sds::Sds;
use crate::ziplist::Ziplist;

#[derive(Clone, Debug)]
pub enum HashValue {
    Listpack(Listpack),
    Table(Dict<Sds, Sds>),
}

impl Default for HashValue {
    fn default() -> Self {
        HashValue::Listpack(Listpack::new())
    }
}

impl HashValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a legacy ziplist-encoded hash.
    pub fn from_ziplist(zl: &Ziplist, config: &Config) -> Result<Self> {
        let mut hash = HashValue::Listpack(zl.to_listpack()?);
        if hash.len() > config.hash_max_listpack_entries {
            hash.convert(config)?;
        }
        Ok(hash)
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            HashValue::Listpack(_) => Encoding::Listpack,
            HashValue::Table(_) => Encoding::HashTable,
        }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        match self {
            HashValue::Listpack(lp) => lp.len() / 2,
            HashValue::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of `field` in a listpack hash.
    fn lp_find(lp: &Listpack, field: &[u8]) -> Option<usize> {
        lp.find(lp.first()?, field, 1)
    }

    pub fn get(&self, field: &[u8]) -> Option<Vec<u8>> {
        match self {
            HashValue::Listpack(lp) => {
                let p = Self::lp_find(lp, field)?;
                let v = lp.next(p)?;
                Some(lp.get(v).to_vec())
            }
            HashValue::Table(d) => d.get(field).map(|v| v.as_bytes().to_vec()),
        }
    }

    pub fn exists(&self, field: &[u8]) -> bool {
        match self {
            HashValue::Listpack(lp) => Self::lp_find(lp, field).is_some(),
            HashValue::Table(d) => d.contains_key(field),
        }
    }

    /// Set `field` to `value`. Returns `true` if the field is new.
    pub fn set(&mut self, field: &[u8], value: &[u8], config: &Config) -> Result<bool> {
        if let HashValue::Listpack(_) = self {
            if field.len() > config.hash_max_listpack_value || value.len() > config.hash_max_listpack_value {
                self.convert(config)?;
            }
        }

        let created = match self {
            HashValue::Listpack(lp) => match Self::lp_find(lp, field) {
                Some(p) => {
                    if let Some(v) = lp.next(p) {
                        lp.replace(v, value)?;
                    }
                    false
                }
                None => {
                    lp.append(field)?;
                    if let Err(e) = lp.append(value) {
                        // Keep pairs whole.
                        if let Some(last) = lp.last() {
                            lp.delete(last);
                        }
                        return Err(e);
                    }
                    true
                }
            },
            HashValue::Table(d) => d.replace(Sds::try_new(field)?, Sds::try_new(value)?)?.is_none(),
        };

        if self.len() > config.hash_max_listpack_entries {
            if let HashValue::Listpack(_) = self {
                self.convert(config)?;
            }
        }
        Ok(created)
    }

    /// Remove `field`. Returns `false` if it was absent.
    pub fn delete(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Listpack(lp) => match Self::lp_find(lp, field) {
                Some(p) => lp.delete_range_at(p, 2) == 2,
                None => false,
            },
            HashValue::Table(d) => d.delete(field),
        }
    }

    /// All field/value pairs. Listpack hashes keep insertion order; tables
    /// have no defined order.
    pub fn pairs(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        match self {
            HashValue::Listpack(lp) => {
                let mut out = Vec::with_capacity(lp.len() / 2);
                let mut it = lp.iter();
                while let (Some(f), Some(v)) = (it.next(), it.next()) {
                    out.push((f.to_vec(), v.to_vec()));
                }
                out
            }
            HashValue::Table(d) => d
                .iter()
                .map(|(f, v)| (f.as_bytes().to_vec(), v.as_bytes().to_vec()))
                .collect(),
        }
    }

    /// Switch to the table encoding.
    pub fn convert(&mut self, config: &Config) -> Result<()> {
        let HashValue::Listpack(lp) = self else {
            return Ok(());
        };
        let mut table = Dict::with_seed(config.hash_seed);
        table.expand(lp.len() / 2)?;
        let mut it = lp.iter();
        while let (Some(f), Some(v)) = (it.next(), it.next()) {
            table.replace(f.to_sds(), v.to_sds())?;
        }
        debug!(fields = table.len(), "hash converted from listpack to hashtable");
        *self = HashValue::Table(table);
        Ok(())
    }

    /// Approximate effort to free this value, in allocations.
    pub fn free_effort(&self) -> usize {
        match self {
            HashValue::Listpack(_) => 1,
            HashValue::Table(d) => d.len(),
        }
    }
}
