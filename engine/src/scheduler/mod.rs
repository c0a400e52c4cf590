//! Update cycle orchestration
//!
//! The scheduler ties the pipeline together: pull the monorepo, reload the
//! source catalog, then fan out one compile-and-publish per added or
//! changed source and one unpublish per removed source, all concurrently.
//! Catalog deltas are buffered between cycles without deduplication — a
//! source touched twice before a cycle runs is compiled twice, which is
//! acceptable because compile-and-publish is idempotent.
//!
//! Re-entrancy is the caller's concern: wrap manual triggers and the timer
//! in one [`CycleGate`] so overlapping cycles are skipped rather than run
//! twice. The gate is an injected value, not a global, so independent
//! instances (and tests) never interfere.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex, Semaphore, TryAcquireError};
use tracing::{info, warn};

use sdk::types::CompilationResult;

use crate::catalog::{SourceCatalog, SourceDelta, SourceEntry};
use crate::compiler::Compiler;
use crate::publisher::Publisher;
use crate::vcs::GitSync;

/// Single-slot gate guarding cycle re-entrancy, owned by the calling layer.
#[derive(Clone)]
pub struct CycleGate(Arc<Semaphore>);

/// Held for the duration of one cycle; dropping it reopens the gate.
pub struct CycleGuard(#[allow(dead_code)] tokio::sync::OwnedSemaphorePermit);

impl CycleGate {
    pub fn new() -> Self {
        Self(Arc::new(Semaphore::new(1)))
    }

    /// Claim the gate, or `None` while a cycle is already in progress.
    pub fn try_start(&self) -> Option<CycleGuard> {
        match Arc::clone(&self.0).try_acquire_owned() {
            Ok(permit) => Some(CycleGuard(permit)),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => None,
        }
    }
}

impl Default for CycleGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic/on-demand orchestrator of the discovery→build→publish pipeline.
pub struct Scheduler {
    catalog: Arc<SourceCatalog>,
    compiler: Arc<Compiler>,
    publisher: Arc<Publisher>,
    vcs: GitSync,
    /// Catalog deltas accumulate here between cycles, not deduplicated
    deltas: Mutex<mpsc::UnboundedReceiver<SourceDelta>>,
}

impl Scheduler {
    /// Wire a scheduler to its collaborators, subscribing to catalog
    /// deltas. Deltas emitted from this point on — including those of the
    /// reload a cycle itself triggers — feed the next drained batch.
    pub fn new(
        catalog: Arc<SourceCatalog>,
        compiler: Arc<Compiler>,
        publisher: Arc<Publisher>,
        vcs: GitSync,
    ) -> Self {
        let deltas = Mutex::new(catalog.subscribe());
        Self {
            catalog,
            compiler,
            publisher,
            vcs,
            deltas,
        }
    }

    /// Run one update cycle: pull, reload, fan out work for every buffered
    /// delta, await it all, and return the collected compile results.
    pub async fn run_cycle(&self, cancel: watch::Receiver<bool>) -> Vec<CompilationResult> {
        self.vcs.pull().await;
        self.catalog.reload_all().await;

        let (updated, removed) = self.drain_deltas().await;
        if updated.is_empty() && removed.is_empty() {
            return Vec::new();
        }
        info!(
            "Update cycle: {} source(s) to compile, {} to unpublish",
            updated.len(),
            removed.len()
        );

        let compiles = updated.into_iter().map(|entry| {
            let cancel = cancel.clone();
            async move {
                let result = self.compiler.compile(&entry, cancel.clone()).await;
                if result.success && !*cancel.borrow() {
                    self.publisher.publish(&result).await;
                }
                result
            }
        });
        let unpublishes = removed
            .into_iter()
            .map(|entry| async move { self.publisher.unpublish(&entry.manifest.uuid).await });

        let (results, _) = tokio::join!(join_all(compiles), join_all(unpublishes));

        let failures = results.iter().filter(|result| !result.success).count();
        if failures > 0 {
            warn!("Update cycle finished with {} failed compile(s)", failures);
        }
        results
    }

    /// Run cycles on a fixed cadence until shutdown fires. Ticks that find
    /// the gate closed (a manual cycle in flight) are skipped.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        gate: CycleGate,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick: cycles start on the first full period.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match gate.try_start() {
                        Some(_guard) => {
                            self.run_cycle(shutdown.clone()).await;
                        }
                        None => info!("Skipping scheduled cycle; one is already running"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn drain_deltas(&self) -> (Vec<SourceEntry>, Vec<SourceEntry>) {
        let mut updated = Vec::new();
        let mut removed = Vec::new();
        let mut rx = self.deltas.lock().await;
        while let Ok(delta) = rx.try_recv() {
            match delta {
                SourceDelta::Updated(entry) => updated.push(entry),
                SourceDelta::Removed(entry) => removed.push(entry),
            }
        }
        (updated, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_admits_one_cycle_at_a_time() {
        let gate = CycleGate::new();
        let guard = gate.try_start().expect("gate starts open");
        assert!(gate.try_start().is_none());
        drop(guard);
        assert!(gate.try_start().is_some());
    }
}
