//! Server-side cursor registry (spec §4.7 cursor lifecycle, §6 cursor
//! TTL). Results are collected eagerly into a `Vec<Value>` at creation
//! time, the same choice the teacher's own `slate_db::cursor::Cursor`
//! makes, so a cursor never holds a borrow on the transaction that
//! produced it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use docwire_value::Value;

use crate::error::CollectionError;

struct CursorEntry {
    ns: String,
    documents: Vec<Value>,
    position: usize,
    last_touched: Instant,
}

/// In-memory table of open cursors, keyed by a monotonically increasing,
/// never-reused, nonzero id (id `0` means "no cursor", mirroring the
/// wire protocol's own convention for an exhausted result set).
pub struct CursorRegistry {
    next_id: AtomicU64,
    entries: Mutex<std::collections::HashMap<u64, CursorEntry>>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), entries: Mutex::new(std::collections::HashMap::new()) }
    }

    pub fn open(&self, ns: &str, documents: Vec<Value>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = CursorEntry { ns: ns.to_string(), documents, position: 0, last_touched: Instant::now() };
        self.entries.lock().unwrap().insert(id, entry);
        id
    }

    /// Returns up to `batch_size` more documents and whether the cursor
    /// is now exhausted (and therefore removed).
    pub fn get_more(&self, cursor_id: u64, batch_size: usize) -> Result<(Vec<Value>, bool), CollectionError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&cursor_id).ok_or(CollectionError::CursorNotFound)?;
        entry.last_touched = Instant::now();

        let end = (entry.position + batch_size).min(entry.documents.len());
        let batch = entry.documents[entry.position..end].to_vec();
        entry.position = end;
        let exhausted = entry.position >= entry.documents.len();
        if exhausted {
            entries.remove(&cursor_id);
        }
        Ok((batch, exhausted))
    }

    pub fn kill(&self, cursor_id: u64) -> bool {
        self.entries.lock().unwrap().remove(&cursor_id).is_some()
    }

    pub fn kill_all_for_namespace(&self, ns: &str) {
        self.entries.lock().unwrap().retain(|_, entry| entry.ns != ns);
    }

    /// Removes every cursor whose `last_touched` is older than `ttl`.
    /// Returns the number reaped.
    fn reap_idle(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_touched.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CursorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns a background thread that periodically reaps cursors idle past
/// the configured TTL. Dropping the handle stops the thread.
pub struct TtlReaper {
    shutdown: Arc<AtomicBool>,
    notify: Arc<(Mutex<()>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl TtlReaper {
    pub fn spawn(registry: Arc<CursorRegistry>, ttl_ms: u64) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new((Mutex::new(()), Condvar::new()));
        let sweep_interval = Duration::from_millis(ttl_ms.max(1000) / 2);

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_notify = Arc::clone(&notify);
        let handle = std::thread::spawn(move || {
            let (lock, cvar) = &*thread_notify;
            loop {
                let guard = lock.lock().unwrap();
                let (_guard, _timeout) = cvar.wait_timeout(guard, sweep_interval).unwrap();
                if thread_shutdown.load(Ordering::Relaxed) {
                    return;
                }
                registry.reap_idle(Duration::from_millis(ttl_ms));
            }
        });

        Self { shutdown, notify, handle: Some(handle) }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.1.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TtlReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_more_paginates_and_exhausts() {
        let registry = CursorRegistry::new();
        let docs: Vec<Value> = (0..5).map(Value::Int32).collect();
        let id = registry.open("db.widgets", docs);

        let (batch1, exhausted1) = registry.get_more(id, 2).unwrap();
        assert_eq!(batch1.len(), 2);
        assert!(!exhausted1);

        let (batch2, exhausted2) = registry.get_more(id, 2).unwrap();
        assert_eq!(batch2.len(), 2);
        assert!(!exhausted2);

        let (batch3, exhausted3) = registry.get_more(id, 2).unwrap();
        assert_eq!(batch3.len(), 1);
        assert!(exhausted3);

        assert!(registry.get_more(id, 2).is_err());
    }

    #[test]
    fn kill_removes_cursor_immediately() {
        let registry = CursorRegistry::new();
        let id = registry.open("db.widgets", vec![Value::Int32(1)]);
        assert!(registry.kill(id));
        assert!(registry.get_more(id, 1).is_err());
    }

    #[test]
    fn reap_idle_drops_stale_cursors() {
        let registry = CursorRegistry::new();
        let id = registry.open("db.widgets", vec![Value::Int32(1)]);
        std::thread::sleep(Duration::from_millis(10));
        let reaped = registry.reap_idle(Duration::from_millis(1));
        assert_eq!(reaped, 1);
        assert!(registry.get_more(id, 1).is_err());
    }
}
