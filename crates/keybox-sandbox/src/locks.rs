//! Per-sandbox lock table.
//!
//! Lifecycle mutations hold a sandbox's lock exclusively; file operations
//! hold it shared. Entries are created on demand and pruned once nobody
//! holds or waits on them.

use crate::naming::SandboxName;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Exclusive hold on one sandbox.
pub type ExclusiveGuard = OwnedRwLockWriteGuard<()>;

/// Shared hold on one sandbox.
pub type SharedGuard = OwnedRwLockReadGuard<()>;

/// Table of reader/writer locks keyed by sandbox name.
#[derive(Debug, Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<SandboxName, Arc<RwLock<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn exclusive(&self, name: &SandboxName) -> ExclusiveGuard {
        self.entry(name).write_owned().await
    }

    /// Wait for shared access to `name`.
    pub async fn shared(&self, name: &SandboxName) -> SharedGuard {
        self.entry(name).read_owned().await
    }

    /// Number of names currently tracked.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, name: &SandboxName) -> Arc<RwLock<()>> {
        let mut table = self.table();
        // Only the table holds a pruned entry, so nobody can be waiting on it.
        table.retain(|key, lock| key == name || Arc::strong_count(lock) > 1);
        table
            .entry(name.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<SandboxName, Arc<RwLock<()>>>> {
        // The table holds no invariants a panicking holder could break.
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn name(s: &str) -> SandboxName {
        SandboxName::from_runtime(s)
    }

    #[tokio::test]
    async fn test_shared_holders_coexist() {
        let locks = IdentityLocks::new();
        let _a = locks.shared(&name("keybox-a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.shared(&name("keybox-a")))
            .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_exclusive_blocks_same_name_only() {
        let locks = IdentityLocks::new();
        let _guard = locks.exclusive(&name("keybox-a")).await;

        let same =
            tokio::time::timeout(Duration::from_millis(50), locks.shared(&name("keybox-a"))).await;
        assert!(same.is_err());

        let other =
            tokio::time::timeout(Duration::from_millis(50), locks.exclusive(&name("keybox-b")))
                .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = IdentityLocks::new();
        for i in 0..10 {
            let _guard = locks.exclusive(&name(&format!("keybox-{i}"))).await;
        }
        // The last lookup prunes everything but its own entry.
        assert_eq!(locks.len(), 1);
    }
}
