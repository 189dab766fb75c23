//! Per-merchant serialization of billing reconciliation.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::{Mutex, OwnedMutexGuard};

use sigshield_core::MerchantId;

/// Floor for how long an idle entry is kept.
const MIN_LOCK_IDLE: Duration = Duration::from_secs(600);

/// Ceiling, well inside what the cache accepts.
const MAX_LOCK_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on provider round trips made while one lock is held.
const MAX_PROVIDER_CALLS: u32 = 8;

/// Idle lifetime of a lock entry for a given provider timeout.
///
/// An entry must outlive the longest hold, otherwise a second caller could
/// be handed a fresh mutex while the first still holds the evicted one.
/// Provider calls are bounded by `provider_timeout`, so twice the worst-case
/// chain of calls is used, clamped between `MIN_LOCK_IDLE` and `MAX_LOCK_IDLE`.
#[must_use]
pub fn idle_for(provider_timeout: Duration) -> Duration {
    provider_timeout
        .saturating_mul(MAX_PROVIDER_CALLS * 2)
        .clamp(MIN_LOCK_IDLE, MAX_LOCK_IDLE)
}

/// Keyed async mutexes, one per merchant.
///
/// Only serializes within this process. The conditional link write in the
/// merchant store keeps the linkage single-valued across processes, and
/// also covers a hold that outlives its entry.
#[derive(Clone)]
pub struct ReconcileLocks {
    locks: Cache<MerchantId, Arc<Mutex<()>>>,
}

impl ReconcileLocks {
    /// Create an empty lock table with the minimum idle lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle(MIN_LOCK_IDLE)
    }

    /// Lock table sized for providers that time out after `provider_timeout`.
    #[must_use]
    pub fn for_provider_timeout(provider_timeout: Duration) -> Self {
        Self::with_idle(idle_for(provider_timeout))
    }

    fn with_idle(idle: Duration) -> Self {
        let locks = Cache::builder().time_to_idle(idle).build();
        Self { locks }
    }

    /// Wait for exclusive access to `merchant`'s billing state.
    ///
    /// A caller that waited on an entry which was evicted meanwhile drops
    /// it and queues on the current entry instead.
    pub async fn acquire(&self, merchant: MerchantId) -> OwnedMutexGuard<()> {
        loop {
            let lock = self
                .locks
                .get_with(merchant, async { Arc::new(Mutex::new(())) })
                .await;
            let guard = Arc::clone(&lock).lock_owned().await;
            match self.locks.get(&merchant).await {
                Some(current) if Arc::ptr_eq(&current, &lock) => return guard,
                Some(_) => {}
                None => {
                    // Evicted while waiting; re-pin ours unless someone else got there first
                    let current = self
                        .locks
                        .get_with(merchant, async { Arc::clone(&lock) })
                        .await;
                    if Arc::ptr_eq(&current, &lock) {
                        return guard;
                    }
                }
            }
        }
    }
}

impl Default for ReconcileLocks {
    fn default() -> Self {
        Self::new()
    }
}
