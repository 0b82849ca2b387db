//! An instrumented engine for observing what the client asks of storage.

use async_trait::async_trait;
use parking_lot::Mutex;
use stashdb_engine::{
    EngineConnection, EngineError, EngineResult, MemoryEngine, StorageEngine, UpgradeHandler,
    VersionChange,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A [`MemoryEngine`] wrapper that counts calls and injects failures.
///
/// Counters:
/// - `opens`: every call to `open`, including failed ones
/// - `upgrades`: every time the engine ran the upgrade handler
/// - `deletes`: every call to `delete_database`
///
/// Injected failures are one-shot: the next matching call returns the
/// error without reaching the inner engine, later calls behave normally.
#[derive(Default)]
pub struct InstrumentedEngine {
    inner: MemoryEngine,
    opens: AtomicUsize,
    upgrades: AtomicUsize,
    deletes: AtomicUsize,
    open_failure: Mutex<Option<EngineError>>,
    delete_failure: Mutex<Option<EngineError>>,
}

impl InstrumentedEngine {
    /// Creates an engine over a fresh [`MemoryEngine`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared engine, ready to hand to a store.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The wrapped engine, for inspecting databases directly.
    pub fn inner(&self) -> &MemoryEngine {
        &self.inner
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of upgrade handler runs so far.
    pub fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }

    /// Number of `delete_database` calls so far.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Makes the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: EngineError) {
        *self.open_failure.lock() = Some(error);
    }

    /// Makes the next `delete_database` fail with `error`.
    pub fn fail_next_delete(&self, error: EngineError) {
        *self.delete_failure.lock() = Some(error);
    }
}

/// Forwards to the real handler and counts the call.
struct CountingHandler<'a> {
    inner: &'a dyn UpgradeHandler,
    upgrades: &'a AtomicUsize,
}

impl UpgradeHandler for CountingHandler<'_> {
    fn upgrade(&self, change: &mut dyn VersionChange) -> EngineResult<()> {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        self.inner.upgrade(change)
    }
}

#[async_trait]
impl StorageEngine for InstrumentedEngine {
    async fn open(
        &self,
        name: &str,
        version: u64,
        upgrade: &dyn UpgradeHandler,
    ) -> EngineResult<Arc<dyn EngineConnection>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let injected = self.open_failure.lock().take();
        if let Some(error) = injected {
            return Err(error);
        }

        let handler = CountingHandler {
            inner: upgrade,
            upgrades: &self.upgrades,
        };
        self.inner.open(name, version, &handler).await
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let injected = self.delete_failure.lock().take();
        if let Some(error) = injected {
            return Err(error);
        }
        self.inner.delete_database(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut dyn VersionChange) -> EngineResult<()> {
        Ok(())
    }

    #[tokio::test]
    async fn counts_opens_and_upgrades() {
        let engine = InstrumentedEngine::new();

        let conn = engine.open("db", 1, &noop).await.unwrap();
        conn.close();
        let conn = engine.open("db", 1, &noop).await.unwrap();
        conn.close();

        assert_eq!(engine.opens(), 2);
        assert_eq!(engine.upgrades(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_one_shot() {
        let engine = InstrumentedEngine::new();
        engine.fail_next_open(EngineError::upgrade("boom"));

        assert!(engine.open("db", 1, &noop).await.is_err());
        assert!(engine.inner().database_names().is_empty());
        assert!(engine.open("db", 1, &noop).await.is_ok());

        engine.fail_next_delete(EngineError::Closed);
        assert_eq!(engine.delete_database("db").await, Err(EngineError::Closed));
        assert_eq!(engine.deletes(), 1);
    }
}
