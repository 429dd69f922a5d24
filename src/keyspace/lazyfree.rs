//! Background reclamation of detached values.
//!
//! Dropping a large collection walks every node. When the value has already
//! been unlinked from its dict it is unreachable, so the walk can happen on a
//! separate thread. Small values are dropped inline where the channel round
//! trip would cost more than the drop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::dict::Dict;
use crate::error::Result;
use crate::object::Value;
use crate::sds::Sds;

/// Values with a free effort above this are dropped in the background.
pub const LAZYFREE_THRESHOLD: usize = 64;

/// Something unreachable that still owns memory.
#[derive(Debug)]
pub enum Garbage {
    Value(Value),
    /// A whole database table, detached by a flush.
    Table(Dict<Sds, Value>),
}

impl Garbage {
    pub fn free_effort(&self) -> usize {
        match self {
            Garbage::Value(v) => v.free_effort(),
            Garbage::Table(d) => d.len(),
        }
    }
}

enum Request {
    Free(Garbage),
    /// Reply once everything queued before this request is dropped.
    Flush { response: Sender<()> },
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    freed: AtomicUsize,
}

/// Handle to the reclaimer thread. Dropping it drains the queue and joins the
/// thread.
pub struct Reclaimer {
    tx: Sender<Request>,
    counters: Arc<Counters>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Reclaimer {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name("kvcore-lazyfree".into())
            .spawn(move || Self::worker(rx, worker_counters))?;
        Ok(Self {
            tx,
            counters,
            handle: Some(handle),
        })
    }

    fn worker(rx: Receiver<Request>, counters: Arc<Counters>) {
        loop {
            match rx.recv() {
                Ok(Request::Free(garbage)) => {
                    drop(garbage);
                    counters.pending.fetch_sub(1, Ordering::AcqRel);
                    counters.freed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Request::Flush { response }) => {
                    let _ = response.send(());
                }
                Ok(Request::Shutdown) | Err(_) => break,
            }
        }
    }

    /// Drop `garbage`, in the background if it is large enough. Returns
    /// `true` if it was handed off.
    pub fn free(&self, garbage: Garbage) -> bool {
        let effort = garbage.free_effort();
        if effort <= LAZYFREE_THRESHOLD {
            return false;
        }
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.send(Request::Free(garbage)) {
            Ok(()) => {
                debug!(effort, "value handed to background reclaimer");
                true
            }
            Err(e) => {
                self.counters.pending.fetch_sub(1, Ordering::AcqRel);
                warn!("reclaimer thread is gone, freeing inline");
                drop(e.into_inner());
                false
            }
        }
    }

    /// Block until everything queued so far has been dropped.
    pub fn flush(&self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.tx.send(Request::Flush { response: tx }).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Values queued but not yet dropped.
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    /// Values dropped by the background thread so far.
    pub fn freed(&self) -> usize {
        self.counters.freed.load(Ordering::Relaxed)
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        let _ = self.tx.send(Request::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("pending", &self.pending())
            .field("freed", &self.freed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::object::{ManualClock, Object, ObjValue};

    fn big_list(n: usize) -> Value {
        let config = Config {
            list_max_listpack_size: 1,
            ..Config::default()
        };
        let mut obj = Object::list(&config, &ManualClock::new(0));
        if let ObjValue::List(ql) = &mut obj.value {
            for i in 0..n {
                ql.push_tail(i.to_string().as_bytes()).unwrap();
            }
        }
        Value::Owned(obj)
    }

    #[test]
    fn test_small_values_freed_inline() {
        let reclaimer = Reclaimer::spawn().unwrap();
        assert!(!reclaimer.free(Garbage::Value(big_list(10))));
        reclaimer.flush();
        assert_eq!(reclaimer.freed(), 0);
    }

    #[test]
    fn test_large_values_freed_in_background() {
        let reclaimer = Reclaimer::spawn().unwrap();
        assert!(reclaimer.free(Garbage::Value(big_list(200))));
        assert!(reclaimer.free(Garbage::Value(big_list(100))));
        reclaimer.flush();
        assert_eq!(reclaimer.pending(), 0);
        assert_eq!(reclaimer.freed(), 2);
    }
}
