//! Per-table advisory lock registry (§4.5). Process-wide; does not
//! coordinate with other processes or other engine clients — a deliberate,
//! documented limitation (cross-process coordination is a non-goal, §1).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, TransformError};

/// Held for the duration of one transform operation. Dropping it releases
/// the table for the next `try_acquire`. There is no poison-recovery path:
/// if a holder panics while guarding it, the registry entry remains marked
/// busy until the process restarts, matching the "advisory, in-process
/// only" contract — this crate never attempts to detect or clear a stale
/// holder left by a panicked thread.
pub struct LockHandle {
    table: String,
    registry: Arc<Mutex<HashMap<String, String>>>,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.registry.lock().unwrap().remove(&self.table);
    }
}

/// A process-wide mapping from `table_name` to its current holder. Holder
/// identifiers are caller-supplied opaque strings (e.g. an operation id),
/// used only for diagnostics — the registry itself does not interpret them.
#[derive(Clone, Default)]
pub struct LockRegistry {
    holders: Arc<Mutex<HashMap<String, String>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically inserts a holder for `table` if none exists. Returns
    /// `TableBusyError` if the table is already locked by another operation.
    pub fn try_acquire(&self, table: &str, holder_id: &str) -> Result<LockHandle> {
        let mut holders = self.holders.lock().unwrap();
        if holders.contains_key(table) {
            return Err(TransformError::TableBusy { table: table.to_string() });
        }
        holders.insert(table.to_string(), holder_id.to_string());
        Ok(LockHandle { table: table.to_string(), registry: self.holders.clone() })
    }

    pub fn is_locked(&self, table: &str) -> bool {
        self.holders.lock().unwrap().contains_key(table)
    }

    pub fn current_holder(&self, table: &str) -> Option<String> {
        self.holders.lock().unwrap().get(table).cloned()
    }

    pub fn locked_tables(&self) -> Vec<String> {
        self.holders.lock().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn second_acquire_on_same_table_is_busy() {
        let registry = LockRegistry::new();
        let _h1 = registry.try_acquire("orders", "op-1").unwrap();
        let err = registry.try_acquire("orders", "op-2").unwrap_err();
        assert!(matches!(err, TransformError::TableBusy { table } if table == "orders"));
    }

    #[test]
    fn different_tables_proceed_independently() {
        let registry = LockRegistry::new();
        let _h1 = registry.try_acquire("orders", "op-1").unwrap();
        let h2 = registry.try_acquire("customers", "op-2");
        assert!(h2.is_ok());
    }

    #[test]
    fn dropping_handle_releases_the_table() {
        let registry = LockRegistry::new();
        {
            let _h = registry.try_acquire("orders", "op-1").unwrap();
            assert!(registry.is_locked("orders"));
        }
        assert!(!registry.is_locked("orders"));
        assert!(registry.try_acquire("orders", "op-2").is_ok());
    }

    #[test]
    fn concurrent_threads_exactly_one_wins() {
        let registry = LockRegistry::new();
        let wins: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let busy: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            let wins = wins.clone();
            let busy = busy.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                match registry.try_acquire("orders", &format!("op-{i}")) {
                    Ok(_h) => {
                        *wins.lock().unwrap() += 1;
                        thread::sleep(std::time::Duration::from_millis(20));
                    }
                    Err(_) => *busy.lock().unwrap() += 1,
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*wins.lock().unwrap(), 1);
        assert_eq!(*busy.lock().unwrap(), 7);
    }
}
