//! Lease-based leader election.
//!
//! The elector polls a [`LeaseLock`] every retry period. Acquiring the lease
//! fires `on_started_leading`; losing it to another holder, or failing to
//! renew for longer than the renew deadline, fires `on_stopped_leading`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use fleet_core::{Clock, LeaderConfig};
use fleet_state::StateStore;

use crate::error::{ReconcileError, ReconcileResult};
use crate::worker::clamp_period;

/// Coordination primitive behind the elector.
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Acquire the lease, or renew it if `identity` already holds it.
    /// `Ok(false)` means another holder owns an unexpired lease.
    async fn try_acquire_or_renew(&self, identity: &str) -> ReconcileResult<bool>;

    async fn release(&self, identity: &str) -> ReconcileResult<()>;
}

/// Lease row in the state store's `leases` table.
pub struct StoreLeaseLock {
    store: StateStore,
    clock: Arc<dyn Clock>,
    name: String,
    duration: Duration,
}

impl StoreLeaseLock {
    pub fn new(store: StateStore, clock: Arc<dyn Clock>, name: impl Into<String>, duration: Duration) -> Self {
        Self {
            store,
            clock,
            name: name.into(),
            duration,
        }
    }

    pub fn from_config(store: StateStore, clock: Arc<dyn Clock>, config: &LeaderConfig) -> Self {
        Self::new(store, clock, config.lease_name.clone(), config.lease_duration.as_duration())
    }
}

#[async_trait]
impl LeaseLock for StoreLeaseLock {
    async fn try_acquire_or_renew(&self, identity: &str) -> ReconcileResult<bool> {
        self.store
            .try_acquire_lease(&self.name, identity, self.clock.now(), self.duration)
            .map_err(|e| ReconcileError::Lease(e.to_string()))
    }

    async fn release(&self, identity: &str) -> ReconcileResult<()> {
        self.store
            .release_lease(&self.name, identity)
            .map(|_| ())
            .map_err(|e| ReconcileError::Lease(e.to_string()))
    }
}

/// Hooks fired on leadership changes.
#[async_trait]
pub trait LeadershipCallbacks: Send + Sync {
    async fn on_started_leading(&self);
    async fn on_stopped_leading(&self);
}

pub struct LeaderElector {
    lock: Arc<dyn LeaseLock>,
    identity: String,
    retry_period: Duration,
    renew_deadline: Duration,
}

impl LeaderElector {
    pub fn new(lock: Arc<dyn LeaseLock>, identity: impl Into<String>, retry_period: Duration, renew_deadline: Duration) -> Self {
        Self {
            lock,
            identity: identity.into(),
            retry_period: clamp_period("leader", retry_period),
            renew_deadline,
        }
    }

    pub fn from_config(lock: Arc<dyn LeaseLock>, config: &LeaderConfig) -> Self {
        Self::new(
            lock,
            config.resolved_identity(),
            config.retry_period.as_duration(),
            config.renew_deadline.as_duration(),
        )
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Poll the lease until `shutdown` fires. A leader steps down and
    /// releases the lease on the way out.
    pub async fn run(&self, callbacks: Arc<dyn LeadershipCallbacks>, mut shutdown: watch::Receiver<bool>) {
        info!(identity = %self.identity, "leader election started");
        let mut ticker = tokio::time::interval(self.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut leading = false;
        let mut last_renewed = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            match self.lock.try_acquire_or_renew(&self.identity).await {
                Ok(true) => {
                    last_renewed = Instant::now();
                    if !leading {
                        leading = true;
                        info!(identity = %self.identity, "started leading");
                        callbacks.on_started_leading().await;
                    }
                }
                Ok(false) => {
                    if leading {
                        leading = false;
                        warn!(identity = %self.identity, "lease taken by another holder");
                        callbacks.on_stopped_leading().await;
                    } else {
                        debug!(identity = %self.identity, "lease held elsewhere");
                    }
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "lease renewal failed");
                    if leading && last_renewed.elapsed() >= self.renew_deadline {
                        leading = false;
                        warn!(identity = %self.identity, "renew deadline passed, stepping down");
                        callbacks.on_stopped_leading().await;
                    }
                }
            }
        }

        if leading {
            callbacks.on_stopped_leading().await;
            if let Err(e) = self.lock.release(&self.identity).await {
                warn!(identity = %self.identity, error = %e, "failed to release lease");
            }
        }
        info!(identity = %self.identity, "leader election stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::t0;
    use fleet_core::ManualClock;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LeadershipCallbacks for Recorder {
        async fn on_started_leading(&self) {
            self.events.lock().unwrap().push("started");
        }
        async fn on_stopped_leading(&self) {
            self.events.lock().unwrap().push("stopped");
        }
    }

    fn store_lock(store: &StateStore, clock: &ManualClock) -> Arc<dyn LeaseLock> {
        Arc::new(StoreLeaseLock::new(
            store.clone(),
            Arc::new(clock.clone()),
            "leader",
            Duration::from_secs(15),
        ))
    }

    fn elector(lock: Arc<dyn LeaseLock>, identity: &str) -> LeaderElector {
        LeaderElector::new(lock, identity, Duration::from_secs(2), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_period_still_elects() {
        let events = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(false);
        let e = LeaderElector::new(Arc::new(FlakyLock::default()), "a", Duration::ZERO, Duration::from_secs(10));
        let cb: Arc<dyn LeadershipCallbacks> = events.clone();
        let task = tokio::spawn(async move { e.run(cb, rx).await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(events.events(), vec!["started"]);
        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn store_lease_is_exclusive_until_expiry() {
        let store = StateStore::open_in_memory().unwrap();
        let clock = ManualClock::new(t0());
        let lock = store_lock(&store, &clock);

        assert!(lock.try_acquire_or_renew("a").await.unwrap());
        assert!(!lock.try_acquire_or_renew("b").await.unwrap());
        assert!(lock.try_acquire_or_renew("a").await.unwrap());

        clock.advance(chrono::Duration::seconds(16));
        assert!(lock.try_acquire_or_renew("b").await.unwrap());
        assert_eq!(store.get_lease("leader").unwrap().unwrap().holder, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn leader_hands_over_on_shutdown() {
        let store = StateStore::open_in_memory().unwrap();
        let clock = ManualClock::new(t0());

        let a_events = Arc::new(Recorder::default());
        let b_events = Arc::new(Recorder::default());
        let (a_tx, a_rx) = watch::channel(false);
        let (b_tx, b_rx) = watch::channel(false);

        let a = elector(store_lock(&store, &clock), "a");
        let a_cb: Arc<dyn LeadershipCallbacks> = a_events.clone();
        let a_task = tokio::spawn(async move { a.run(a_cb, a_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let b = elector(store_lock(&store, &clock), "b");
        let b_cb: Arc<dyn LeadershipCallbacks> = b_events.clone();
        let b_task = tokio::spawn(async move { b.run(b_cb, b_rx).await });
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(a_events.events(), vec!["started"]);
        assert!(b_events.events().is_empty());

        a_tx.send(true).unwrap();
        a_task.await.unwrap();
        assert_eq!(a_events.events(), vec!["started", "stopped"]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(b_events.events(), vec!["started"]);
        assert_eq!(store.get_lease("leader").unwrap().unwrap().holder, "b");

        b_tx.send(true).unwrap();
        b_task.await.unwrap();
    }

    /// Renews once, then errors on every call.
    #[derive(Default)]
    struct FlakyLock {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LeaseLock for FlakyLock {
        async fn try_acquire_or_renew(&self, _identity: &str) -> ReconcileResult<bool> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(true)
            } else {
                Err(ReconcileError::Lease("store unavailable".to_string()))
            }
        }

        async fn release(&self, _identity: &str) -> ReconcileResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn steps_down_after_renew_deadline() {
        let events = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(false);
        let e = elector(Arc::new(FlakyLock::default()), "a");
        let cb: Arc<dyn LeadershipCallbacks> = events.clone();
        let task = tokio::spawn(async move { e.run(cb, rx).await });

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(events.events(), vec!["started"]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(events.events(), vec!["started", "stopped"]);

        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(events.events(), vec!["started", "stopped"]);
    }
}
