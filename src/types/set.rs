//! Set values.
//!
//! A set of integers is kept as an [`Intset`] until it holds more than
//! `set_max_intset_entries` members or a non-integer member is added; then it
//! becomes a [`Dict`] with unit values.

use rand::Rng;
use tracing::debug;

use crate::config::Config;
use crate::dict::{AddError, Dict};
use crate::error::Result;
use crate::intset::Intset;
use crate::object::Encoding;
use crate::sds::Sds;
use crate::util::string2ll;

#[derive(Clone, Debug)]
pub enum SetValue {
    Intset(Intset),
    Table(Dict<Sds, ()>),
}

impl SetValue {
    /// Empty set in the encoding suited to `first`, the member about to be
    /// added.
    pub fn for_member(first: &[u8], config: &Config) -> Self {
        if string2ll(first).is_some() {
            SetValue::Intset(Intset::new())
        } else {
            SetValue::Table(Dict::with_seed(config.hash_seed))
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            SetValue::Intset(_) => Encoding::Intset,
            SetValue::Table(_) => Encoding::HashTable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SetValue::Intset(is) => is.len(),
            SetValue::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `member`. Returns `false` if it was already present.
    pub fn add(&mut self, member: &[u8], config: &Config) -> Result<bool> {
        if let SetValue::Intset(is) = self {
            match string2ll(member) {
                Some(v) => {
                    let added = is.add(v)?;
                    if added && is.len() > config.set_max_intset_entries {
                        self.convert(config)?;
                    }
                    return Ok(added);
                }
                None => self.convert(config)?,
            }
        }

        match self {
            SetValue::Table(d) => match d.add(Sds::try_new(member)?, ()) {
                Ok(()) => Ok(true),
                Err(AddError::Occupied { .. }) => Ok(false),
                Err(AddError::Alloc(e)) => Err(e),
            },
            SetValue::Intset(_) => unreachable!("converted above"),
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self {
            SetValue::Intset(is) => string2ll(member).map_or(false, |v| is.remove(v)),
            SetValue::Table(d) => d.delete(member),
        }
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        match self {
            SetValue::Intset(is) => string2ll(member).map_or(false, |v| is.contains(v)),
            SetValue::Table(d) => d.contains_key(member),
        }
    }

    pub fn members(&self) -> Vec<Vec<u8>> {
        match self {
            SetValue::Intset(is) => is.iter().map(|v| v.to_string().into_bytes()).collect(),
            SetValue::Table(d) => d.iter().map(|(m, _)| m.as_bytes().to_vec()).collect(),
        }
    }

    pub fn random_member(&mut self, rng: &mut impl Rng) -> Option<Vec<u8>> {
        match self {
            SetValue::Intset(is) => is.random(rng).map(|v| v.to_string().into_bytes()),
            SetValue::Table(d) => d.random_entry(rng).map(|(m, _)| m.as_bytes().to_vec()),
        }
    }

    /// Switch to the table encoding.
    pub fn convert(&mut self, config: &Config) -> Result<()> {
        let SetValue::Intset(is) = self else {
            return Ok(());
        };
        let mut table = Dict::with_seed(config.hash_seed);
        table.expand(is.len())?;
        for v in is.iter() {
            table.replace(Sds::from_i64(v), ())?;
        }
        debug!(members = table.len(), "set converted from intset to hashtable");
        *self = SetValue::Table(table);
        Ok(())
    }

    pub fn free_effort(&self) -> usize {
        match self {
            SetValue::Intset(_) => 1,
            SetValue::Table(d) => d.len(),
        }
    }
}
