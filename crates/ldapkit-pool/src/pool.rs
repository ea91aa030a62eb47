//! Connection pool implementation.
//!
//! The pool state (idle connections, waiters and counts) sits behind one
//! mutex that is never held across an `.await`. Connecting, validating and
//! closing happen outside the lock.
//!
//! Checkout prefers the most recently returned idle connection. When none is
//! idle and the pool is below `max_connections` the caller creates one;
//! otherwise it joins a FIFO queue. Returned connections and freed capacity
//! go straight to the oldest waiter, so a later caller can never overtake an
//! earlier one.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{
    ConnectionLifecycle, ConnectionManager, ConnectionMetadata, ConnectionState,
    DynConnectionLifecycle, HealthCheckResult, NoopLifecycle,
};

/// A bounded connection pool.
///
/// Cloning is cheap; clones share the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use ldapkit_pool::{LdapConnectionManager, LdapLifecycle, Pool, PoolConfig};
///
/// let manager = LdapConnectionManager::new(factory);
/// let pool = Pool::builder(manager)
///     .pool_config(PoolConfig::new().min_connections(2).max_connections(8))
///     .lifecycle(LdapLifecycle::new(factory_handle))
///     .build()
///     .await?;
///
/// let mut conn = pool.get().await?;
/// let result = conn.search(&request).await?;
/// // returned to the pool on drop
/// ```
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<M: ConnectionManager> {
    config: PoolConfig,
    manager: M,
    lifecycle: DynConnectionLifecycle<M::Connection>,
    state: Mutex<PoolState<M::Connection>>,
    closed: AtomicBool,
    initialized: AtomicBool,
    next_connection_id: AtomicU64,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

struct Slot<C> {
    conn: C,
    meta: ConnectionMetadata,
}

/// What a waiter is handed: a connection, or room to create one.
enum Grant<C> {
    Connection(Slot<C>),
    Permit,
}

struct Waiter<C> {
    id: u64,
    tx: oneshot::Sender<Grant<C>>,
}

struct PoolState<C> {
    /// Least recently returned at the front.
    idle: VecDeque<Slot<C>>,
    waiters: VecDeque<Waiter<C>>,
    /// Live connections plus reserved creations.
    total: u32,
    /// Checked out, including creations for a caller.
    in_use: u32,
    next_waiter: u64,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            waiters: VecDeque::new(),
            total: 0,
            in_use: 0,
            next_waiter: 0,
        }
    }

    /// Give `grant` to the oldest waiter still listening.
    fn hand_off(&mut self, mut grant: Grant<C>) -> Result<(), Grant<C>> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(grant) {
                Ok(()) => {
                    self.in_use += 1;
                    return Ok(());
                }
                Err(returned) => grant = returned,
            }
        }
        Err(grant)
    }

    fn offer_connection(&mut self, slot: Slot<C>) {
        if let Err(Grant::Connection(mut slot)) = self.hand_off(Grant::Connection(slot)) {
            slot.meta.state = ConnectionState::Idle;
            self.idle.push_back(slot);
        }
    }

    /// Hand one unit of capacity to the oldest waiter, if any.
    fn offer_permit(&mut self) -> bool {
        self.total += 1;
        if self.hand_off(Grant::Permit).is_ok() {
            return true;
        }
        self.total -= 1;
        false
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    validations_performed: u64,
    validations_failed: u64,
    connections_pruned: u64,
    activation_failures: u64,
    passivation_failures: u64,
    replacements_failed: u64,
}

impl<M: ConnectionManager> Pool<M> {
    /// Create a pool builder for `manager`.
    #[must_use]
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder::new(manager)
    }

    /// Create a pool without lifecycle hooks.
    ///
    /// No connection is opened until [`initialize`](Self::initialize) or the
    /// first checkout.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        Self::with_lifecycle(manager, config, Arc::new(NoopLifecycle))
    }

    /// Create a pool running `lifecycle` hooks.
    pub fn with_lifecycle(
        manager: M,
        config: PoolConfig,
        lifecycle: DynConnectionLifecycle<M::Connection>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            config,
            manager,
            lifecycle,
            state: Mutex::new(PoolState::new()),
            closed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            maintenance: Mutex::new(None),
        });

        tracing::debug!(
            min = inner.config.min_connections,
            max = inner.config.max_connections,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Open `min_connections` connections and start background maintenance.
    ///
    /// At most twice `min_connections` creations are attempted. Fails if
    /// `min_connections` is positive and none could be created. Calling it
    /// again after success does nothing.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }
        if inner.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let min = inner.config.min_connections;
        let mut created = 0u32;
        let mut attempts = 0u32;
        let mut last_error = None;

        while created < min && attempts < min.saturating_mul(2) {
            attempts += 1;
            {
                let mut state = inner.state.lock();
                if state.total >= inner.config.max_connections {
                    break;
                }
                state.total += 1;
            }
            match inner.create().await {
                Ok(slot) => {
                    inner.admit(slot, false).await;
                    created += 1;
                }
                Err(e) => {
                    inner.state.lock().total -= 1;
                    tracing::warn!(attempt = attempts, error = %e, "failed to create initial connection");
                    last_error = Some(e);
                }
            }
        }

        if min > 0 && created == 0 {
            inner.initialized.store(false, Ordering::Release);
            let source = last_error
                .unwrap_or_else(|| PoolError::Configuration("no connection could be created".into()));
            return Err(PoolError::Initialization {
                attempts,
                source: Box::new(source),
            });
        }

        inner.start_maintenance();
        tracing::info!(
            min = min,
            max = inner.config.max_connections,
            created = created,
            "connection pool initialized"
        );
        Ok(())
    }

    /// Check out a connection, waiting up to the configured checkout timeout.
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        self.checkout(self.inner.config.checkout_timeout).await
    }

    /// Check out a connection, waiting up to `timeout`.
    ///
    /// The connection has been activated and, with `validate_on_checkout`,
    /// validated. A connection failing either is destroyed and another one
    /// tried, up to `max_validation_retries` extra times.
    pub async fn checkout(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        let inner = &self.inner;
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            let grant = match inner.acquire(deadline, timeout).await {
                Ok(grant) => grant,
                Err(e) => {
                    inner.metrics.lock().checkouts_failed += 1;
                    return Err(e);
                }
            };

            let mut slot = match grant {
                Grant::Connection(slot) => slot,
                Grant::Permit => match inner.create().await {
                    Ok(slot) => slot,
                    Err(e) => {
                        inner.forget(true);
                        inner.metrics.lock().checkouts_failed += 1;
                        return Err(e);
                    }
                },
            };

            attempts += 1;
            match inner.prepare(&mut slot).await {
                Ok(()) => {
                    slot.meta.state = ConnectionState::InUse;
                    slot.meta.checkouts += 1;
                    inner.metrics.lock().checkouts_successful += 1;
                    tracing::trace!(connection_id = slot.meta.id, "connection checked out");
                    return Ok(PooledConnection {
                        slot: Some(slot),
                        pool: Arc::clone(inner),
                    });
                }
                Err(reason) => {
                    tracing::debug!(
                        connection_id = slot.meta.id,
                        reason = %reason,
                        "discarding connection that failed checkout"
                    );
                    inner.destroy(slot, true).await;
                    if attempts > inner.config.max_validation_retries {
                        inner.metrics.lock().checkouts_failed += 1;
                        return Err(PoolError::Unhealthy { attempts });
                    }
                }
            }
        }
    }

    /// Return `conn` to the pool, destroying it if `invalidate` is set.
    pub async fn checkin(&self, conn: PooledConnection<M>, invalidate: bool) {
        if invalidate {
            conn.invalidate().await;
        } else {
            conn.release().await;
        }
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.idle.len() as u32,
            in_use: state.in_use,
            total: state.total,
            max: self.inner.config.max_connections,
            waiters: state.waiters.len() as u32,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            validations_performed: inner.validations_performed,
            validations_failed: inner.validations_failed,
            connections_pruned: inner.connections_pruned,
            activation_failures: inner.activation_failures,
            passivation_failures: inner.passivation_failures,
            replacements_failed: inner.replacements_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Close the pool.
    ///
    /// Waiting callers fail with [`PoolError::PoolClosed`] and idle
    /// connections are closed. Checked-out connections are closed when they
    /// are returned.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (idle, waiters) = {
            let mut state = inner.state.lock();
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total -= idle.len() as u32;
            (idle, std::mem::take(&mut state.waiters))
        };
        let failed_waiters = waiters.len();
        // dropping the senders wakes every waiter with PoolClosed
        drop(waiters);

        if let Some(handle) = inner.maintenance.lock().take() {
            handle.abort();
        }

        let closed = idle.len();
        for slot in idle {
            inner.manager.disconnect(slot.conn).await;
        }
        inner.metrics.lock().connections_closed += closed as u64;

        tracing::info!(
            closed = closed,
            failed_waiters = failed_waiters,
            "connection pool closed"
        );
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The connection manager.
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

impl<M: ConnectionManager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M: ConnectionManager> PoolInner<M> {
    /// Take an idle connection, reserve capacity, or wait in line.
    async fn acquire(
        &self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Grant<M::Connection>, PoolError> {
        let (waiter_id, mut rx) = {
            let mut state = self.state.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::PoolClosed);
            }
            if state.waiters.is_empty() {
                if let Some(slot) = state.idle.pop_back() {
                    state.in_use += 1;
                    return Ok(Grant::Connection(slot));
                }
                if state.total < self.config.max_connections {
                    state.total += 1;
                    state.in_use += 1;
                    return Ok(Grant::Permit);
                }
            }
            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter;
            state.next_waiter += 1;
            state.waiters.push_back(Waiter { id, tx });
            tracing::trace!(waiters = state.waiters.len(), "waiting for a connection");
            (id, rx)
        };

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(grant)) => Ok(grant),
            Ok(Err(_)) => Err(PoolError::PoolClosed),
            Err(_) => Err(self.leave_queue(waiter_id, &mut rx, timeout)),
        }
    }

    /// Withdraw a waiter whose deadline passed. Anything handed to it in the
    /// meantime goes back to the pool.
    fn leave_queue(
        &self,
        waiter_id: u64,
        rx: &mut oneshot::Receiver<Grant<M::Connection>>,
        timeout: Duration,
    ) -> PoolError {
        let still_queued = {
            let mut state = self.state.lock();
            match state.waiters.iter().position(|w| w.id == waiter_id) {
                Some(pos) => {
                    state.waiters.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !still_queued {
            match rx.try_recv() {
                // handed something just as the deadline passed
                Ok(grant) => self.return_grant(grant),
                // dropped by close()
                Err(oneshot::error::TryRecvError::Closed) => return PoolError::PoolClosed,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        tracing::debug!(timeout = ?timeout, "checkout timed out");
        PoolError::Exhausted { timeout }
    }

    fn return_grant(&self, grant: Grant<M::Connection>) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        match grant {
            Grant::Connection(slot) => state.offer_connection(slot),
            Grant::Permit => {
                state.total -= 1;
                if !self.closed.load(Ordering::Acquire) {
                    state.offer_permit();
                }
            }
        }
    }

    async fn create(&self) -> Result<Slot<M::Connection>, PoolError> {
        let conn = self.manager.connect().await?;
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.lock().connections_created += 1;
        tracing::debug!(connection_id = id, "connection created");
        Ok(Slot {
            conn,
            meta: ConnectionMetadata::new(id),
        })
    }

    async fn validate(&self, slot: &mut Slot<M::Connection>) -> HealthCheckResult {
        let result = self.lifecycle.validate(&mut slot.conn).await;
        let mut metrics = self.metrics.lock();
        metrics.validations_performed += 1;
        if result.is_healthy() {
            slot.meta.last_validated = Some(Instant::now());
        } else {
            metrics.validations_failed += 1;
        }
        result
    }

    /// Activate and, if configured, validate a connection being checked out.
    async fn prepare(&self, slot: &mut Slot<M::Connection>) -> Result<(), String> {
        if let Err(e) = self.lifecycle.activate(&mut slot.conn).await {
            self.metrics.lock().activation_failures += 1;
            return Err(e.to_string());
        }
        if self.config.validate_on_checkout {
            if let HealthCheckResult::Unhealthy(reason) = self.validate(slot).await {
                return Err(reason);
            }
        }
        Ok(())
    }

    async fn checkin(self: &Arc<Self>, mut slot: Slot<M::Connection>, invalidate: bool) {
        if invalidate || self.closed.load(Ordering::Acquire) {
            self.destroy(slot, true).await;
            return;
        }

        if let Err(e) = self.lifecycle.passivate(&mut slot.conn).await {
            self.metrics.lock().passivation_failures += 1;
            tracing::warn!(connection_id = slot.meta.id, error = %e, "passivation failed");
            self.destroy(slot, true).await;
            return;
        }

        if self.config.validate_on_checkin && !self.validate(&mut slot).await.is_healthy() {
            self.destroy(slot, true).await;
            return;
        }

        slot.meta.last_returned = Instant::now();
        tracing::trace!(connection_id = slot.meta.id, "connection checked in");
        self.admit(slot, true).await;
    }

    /// Make a usable connection available, or destroy it if the pool closed.
    async fn admit(self: &Arc<Self>, slot: Slot<M::Connection>, checked_out: bool) {
        let rejected = {
            let mut state = self.state.lock();
            if self.closed.load(Ordering::Acquire) {
                Some(slot)
            } else {
                if checked_out {
                    state.in_use -= 1;
                }
                state.offer_connection(slot);
                None
            }
        };
        if let Some(slot) = rejected {
            self.destroy(slot, checked_out).await;
        }
    }

    async fn destroy(self: &Arc<Self>, slot: Slot<M::Connection>, checked_out: bool) {
        self.forget(checked_out);
        self.metrics.lock().connections_closed += 1;
        tracing::debug!(connection_id = slot.meta.id, "connection destroyed");
        self.manager.disconnect(slot.conn).await;
    }

    /// Drop one connection from the counts and pass the freed capacity on.
    fn forget(self: &Arc<Self>, checked_out: bool) {
        let replace = {
            let mut state = self.state.lock();
            state.total -= 1;
            if checked_out {
                state.in_use -= 1;
            }
            if self.closed.load(Ordering::Acquire) || state.offer_permit() {
                false
            } else if state.total < self.config.min_connections {
                state.total += 1;
                true
            } else {
                false
            }
        };
        if replace {
            self.spawn_replacement();
        }
    }

    /// Give back a slot reserved for a replacement that was never created.
    /// A queued waiter receives it as a permit and tries the server itself.
    fn release_reservation(&self) {
        let mut state = self.state.lock();
        state.total -= 1;
        if !self.closed.load(Ordering::Acquire) {
            state.offer_permit();
        }
    }

    /// Create a connection in the background to restore `min_connections`.
    /// The caller has already reserved its slot in `total`.
    fn spawn_replacement(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.release_reservation();
            return;
        };
        let weak = Arc::downgrade(self);
        let attempts = self.config.replace_attempts;
        let mut delay = self.config.replace_backoff;

        handle.spawn(async move {
            for attempt in 1..=attempts {
                let Some(pool) = weak.upgrade() else {
                    return;
                };
                if pool.closed.load(Ordering::Acquire) {
                    pool.release_reservation();
                    return;
                }
                match pool.create().await {
                    Ok(slot) => {
                        pool.admit(slot, false).await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(attempt = attempt, error = %e, "replacement connection failed");
                    }
                }
                drop(pool);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
            if let Some(pool) = weak.upgrade() {
                pool.release_reservation();
                pool.metrics.lock().replacements_failed += 1;
                tracing::error!(attempts = attempts, "giving up replacing connection");
            }
        });
    }

    fn start_maintenance(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let prune_every = self.config.prune_interval;
        let validate_every = self.config.validate_interval.filter(|period| !period.is_zero());

        let handle = tokio::spawn(async move {
            let mut prune = tokio::time::interval_at(Instant::now() + prune_every, prune_every);
            let mut validate = validate_every
                .map(|period| tokio::time::interval_at(Instant::now() + period, period));
            loop {
                tokio::select! {
                    _ = prune.tick() => {
                        let Some(pool) = weak.upgrade() else { break };
                        pool.prune().await;
                    }
                    () = tick(&mut validate) => {
                        let Some(pool) = weak.upgrade() else { break };
                        pool.validate_idle().await;
                    }
                }
            }
            tracing::trace!("pool maintenance stopped");
        });

        if let Some(previous) = self.maintenance.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Close connections idle longer than `idle_timeout`, keeping at least
    /// `min_connections`.
    async fn prune(&self) {
        let pruned: Vec<Slot<M::Connection>> = {
            let mut state = self.state.lock();
            let mut pruned = Vec::new();
            while state.total > self.config.min_connections
                && state
                    .idle
                    .front()
                    .is_some_and(|slot| slot.meta.idle_time() >= self.config.idle_timeout)
            {
                if let Some(slot) = state.idle.pop_front() {
                    state.total -= 1;
                    pruned.push(slot);
                }
            }
            pruned
        };
        if pruned.is_empty() {
            return;
        }

        {
            let mut metrics = self.metrics.lock();
            metrics.connections_pruned += pruned.len() as u64;
            metrics.connections_closed += pruned.len() as u64;
        }
        tracing::debug!(pruned = pruned.len(), "pruned idle connections");
        for slot in pruned {
            self.manager.disconnect(slot.conn).await;
        }
    }

    /// Validate every idle connection, destroying the ones that fail.
    async fn validate_idle(self: &Arc<Self>) {
        let slots: Vec<Slot<M::Connection>> = self.state.lock().idle.drain(..).collect();
        let mut failed = 0usize;
        let checked = slots.len();

        for mut slot in slots {
            slot.meta.state = ConnectionState::Validating;
            if self.validate(&mut slot).await.is_healthy() {
                self.admit(slot, false).await;
            } else {
                failed += 1;
                self.destroy(slot, false).await;
            }
        }

        if failed > 0 {
            tracing::warn!(checked = checked, failed = failed, "idle validation removed connections");
        } else {
            tracing::trace!(checked = checked, "idle validation passed");
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(manager)
///     .min_connections(2)
///     .max_connections(8)
///     .validate_on_checkout(true)
///     .build()
///     .await?;
/// ```
pub struct PoolBuilder<M: ConnectionManager> {
    manager: M,
    pool_config: PoolConfig,
    lifecycle: DynConnectionLifecycle<M::Connection>,
}

impl<M: ConnectionManager> PoolBuilder<M> {
    /// Create a new pool builder with default settings.
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            pool_config: PoolConfig::default(),
            lifecycle: Arc::new(NoopLifecycle),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.pool_config.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.pool_config.max_connections = count;
        self
    }

    /// Set the checkout timeout.
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.checkout_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Validate connections on checkout.
    #[must_use]
    pub fn validate_on_checkout(mut self, enabled: bool) -> Self {
        self.pool_config.validate_on_checkout = enabled;
        self
    }

    /// Set the lifecycle hooks.
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: impl ConnectionLifecycle<M::Connection> + 'static) -> Self {
        self.lifecycle = Arc::new(lifecycle);
        self
    }

    /// Build and initialize the pool.
    pub async fn build(self) -> Result<Pool<M>, PoolError> {
        let pool = Pool::with_lifecycle(self.manager, self.pool_config, self.lifecycle)?;
        pool.initialize().await?;
        Ok(pool)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of connections, including ones being created.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
    /// Callers waiting for a connection.
    pub waiters: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (f64::from(self.in_use) / f64::from(self.max)) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, pool closed, etc.).
    pub checkouts_failed: u64,
    /// Validations performed.
    pub validations_performed: u64,
    /// Validations that failed.
    pub validations_failed: u64,
    /// Idle connections closed by pruning.
    pub connections_pruned: u64,
    /// Activation hooks that failed.
    pub activation_failures: u64,
    /// Passivation hooks that failed.
    pub passivation_failures: u64,
    /// Replacements abandoned after every attempt failed.
    pub replacements_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate validation success rate (0.0 to 1.0).
    #[must_use]
    pub fn validation_success_rate(&self) -> f64 {
        if self.validations_performed == 0 {
            return 1.0;
        }
        let successful = self.validations_performed - self.validations_failed;
        successful as f64 / self.validations_performed as f64
    }
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection is returned to the pool on a spawned task.
/// [`release`](Self::release) returns it in place, and
/// [`detach`](Self::detach) takes it out of the pool for good.
pub struct PooledConnection<M: ConnectionManager> {
    slot: Option<Slot<M::Connection>>,
    pool: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        match &self.slot {
            Some(slot) => &slot.meta,
            None => unreachable!("connection already returned"),
        }
    }

    /// Return the connection to the pool and wait for the checkin to finish.
    pub async fn release(mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.checkin(slot, false).await;
        }
    }

    /// Destroy the connection instead of returning it.
    pub async fn invalidate(mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.checkin(slot, true).await;
        }
    }

    /// Take the connection out of the pool.
    ///
    /// The pool stops counting it and may open a replacement.
    pub fn detach(mut self) -> M::Connection {
        match self.slot.take() {
            Some(slot) => {
                self.pool.forget(true);
                tracing::debug!(connection_id = slot.meta.id, "connection detached from pool");
                slot.conn
            }
            None => unreachable!("connection already returned"),
        }
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.slot {
            Some(slot) => &slot.conn,
            None => unreachable!("connection already returned"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.slot {
            Some(slot) => &mut slot.conn,
            None => unreachable!("connection already returned"),
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.slot.as_ref().map(|s| &s.meta))
            .finish()
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move { pool.checkin(slot, false).await });
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = slot.meta.id,
                    "no runtime to return connection, dropping it"
                );
                self.pool.forget(true);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    struct TestConn {
        id: u32,
    }

    #[derive(Debug, Default)]
    struct TestManager {
        created: AtomicU32,
        live: AtomicU32,
        peak: AtomicU32,
        down: AtomicBool,
    }

    #[async_trait]
    impl ConnectionManager for Arc<TestManager> {
        type Connection = TestConn;

        async fn connect(&self) -> Result<TestConn, PoolError> {
            tokio::task::yield_now().await;
            if self.down.load(Ordering::SeqCst) {
                return Err(PoolError::Connection(ldapkit_client::Error::Connection(
                    ldapkit_client::ConnectionError::NoEndpoints,
                )));
            }
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(live, Ordering::SeqCst);
            let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestConn { id })
        }

        async fn disconnect(&self, _conn: TestConn) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct Lifecycle {
        healthy: bool,
        passivate_ok: bool,
    }

    #[async_trait]
    impl ConnectionLifecycle<TestConn> for Lifecycle {
        async fn validate(&self, conn: &mut TestConn) -> HealthCheckResult {
            if self.healthy {
                HealthCheckResult::Healthy
            } else {
                HealthCheckResult::Unhealthy(format!("connection {} is broken", conn.id))
            }
        }

        async fn passivate(&self, _conn: &mut TestConn) -> Result<(), PoolError> {
            if self.passivate_ok {
                Ok(())
            } else {
                Err(PoolError::Lifecycle("reset failed".into()))
            }
        }
    }

    fn pool(min: u32, max: u32) -> (Pool<Arc<TestManager>>, Arc<TestManager>) {
        let manager = Arc::new(TestManager::default());
        let config = PoolConfig::new()
            .min_connections(min)
            .max_connections(max)
            .checkout_timeout(Duration::from_secs(10))
            .replace_policy(3, Duration::from_millis(1));
        (Pool::new(Arc::clone(&manager), config).unwrap(), manager)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_initialize_creates_min_and_is_idempotent() {
        let (pool, manager) = pool(3, 5);
        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();

        let status = pool.status();
        assert_eq!(status.total, 3);
        assert_eq!(status.available, 3);
        assert_eq!(manager.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_initialize_fails_fast_when_server_down() {
        let (pool, manager) = pool(2, 4);
        manager.down.store(true, Ordering::SeqCst);

        match pool.initialize().await {
            Err(PoolError::Initialization { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, PoolError::Connection(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_reuses_most_recently_returned() {
        let (pool, _) = pool(0, 3);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        let (a_id, b_id) = (a.id, b.id);
        a.release().await;
        b.release().await;

        let again = pool.get().await.unwrap();
        assert_eq!(again.id, b_id);
        assert_ne!(again.id, a_id);
        assert_eq!(again.metadata().checkouts, 2);
    }

    #[tokio::test]
    async fn test_blocked_checkout_woken_by_release() {
        let (pool, _) = pool(0, 1);
        let held = pool.get().await.unwrap();
        let held_id = held.id;

        let mut waiting = tokio_test::task::spawn(pool.get());
        tokio_test::assert_pending!(waiting.poll());
        assert_eq!(pool.status().waiters, 1);

        held.release().await;
        assert!(waiting.is_woken());
        let conn = tokio_test::assert_ready_ok!(waiting.poll());
        assert_eq!(conn.id, held_id);
        assert_eq!(pool.status().waiters, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_live_connections_never_exceed_max() {
        let (pool, manager) = pool(0, 4);
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let conn = pool.get().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert!(pool.status().total <= 4);
                drop(conn);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(manager.peak.load(Ordering::SeqCst) <= 4);
        wait_for(|| pool.status().in_use == 0).await;
        assert!(pool.status().total <= 4);
        assert_eq!(pool.metrics().checkouts_successful, 64);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_fifo_order() {
        let (pool, _) = pool(0, 5);
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.get().await.unwrap());
        }

        // a sixth caller blocks until its timeout
        assert!(matches!(
            pool.checkout(Duration::from_millis(50)).await,
            Err(PoolError::Exhausted { .. })
        ));

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut waiters = Vec::new();
        for n in 1..=3u32 {
            let waiter_pool = pool.clone();
            let order_tx = order_tx.clone();
            waiters.push(tokio::spawn(async move {
                let conn = waiter_pool.get().await.unwrap();
                order_tx.send(n).unwrap();
                conn
            }));
            wait_for(|| pool.status().waiters == n).await;
        }

        let mut served = Vec::new();
        for _ in 0..3 {
            held.pop().unwrap().release().await;
            served.push(order_rx.recv().await.unwrap());
        }
        assert_eq!(served, vec![1, 2, 3]);
        assert_eq!(pool.status().total, 5);

        for waiter in waiters {
            waiter.await.unwrap().release().await;
        }
    }

    #[tokio::test]
    async fn test_timed_out_waiter_leaves_queue() {
        let (pool, _) = pool(0, 1);
        let held = pool.get().await.unwrap();

        let result = pool.checkout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
        assert_eq!(pool.status().waiters, 0);

        held.release().await;
        let status = pool.status();
        assert_eq!(status.available, 1);
        assert_eq!(status.in_use, 0);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_validator_never_hands_out_connection() {
        let manager = Arc::new(TestManager::default());
        let config = PoolConfig::new()
            .min_connections(2)
            .max_connections(2)
            .validate_on_checkout(true)
            .max_validation_retries(2)
            .checkout_timeout(Duration::from_secs(5))
            .replace_policy(3, Duration::from_millis(1));
        let pool = Pool::builder(Arc::clone(&manager))
            .pool_config(config)
            .lifecycle(Lifecycle {
                healthy: false,
                passivate_ok: true,
            })
            .build()
            .await
            .unwrap();

        match pool.get().await {
            Err(PoolError::Unhealthy { attempts }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }

        wait_for(|| {
            let status = pool.status();
            status.total == 2 && status.available == 2
        })
        .await;
        assert_eq!(manager.live.load(Ordering::SeqCst), 2);
        assert_eq!(pool.metrics().validations_failed, 3);
    }

    #[tokio::test]
    async fn test_failed_passivation_destroys_connection() {
        let manager = Arc::new(TestManager::default());
        let pool = Pool::builder(Arc::clone(&manager))
            .min_connections(0)
            .max_connections(2)
            .lifecycle(Lifecycle {
                healthy: true,
                passivate_ok: false,
            })
            .build()
            .await
            .unwrap();

        pool.get().await.unwrap().release().await;
        assert_eq!(pool.status().total, 0);
        assert_eq!(manager.live.load(Ordering::SeqCst), 0);
        assert_eq!(pool.metrics().passivation_failures, 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_destroys_on_checkin() {
        let (pool, manager) = pool(0, 1);
        let held = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await })
        };
        wait_for(|| pool.status().waiters == 1).await;

        pool.close().await;
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
        assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));

        held.release().await;
        assert_eq!(pool.status().total, 0);
        assert_eq!(manager.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate_replaces_below_min() {
        let (pool, manager) = pool(1, 2);
        pool.initialize().await.unwrap();

        let conn = pool.get().await.unwrap();
        let first = conn.id;
        pool.checkin(conn, true).await;

        wait_for(|| pool.status().available == 1).await;
        let replacement = pool.get().await.unwrap();
        assert_ne!(replacement.id, first);
        assert_eq!(manager.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_replacement_frees_slot_for_waiter() {
        let manager = Arc::new(TestManager::default());
        let config = PoolConfig::new()
            .min_connections(1)
            .max_connections(1)
            .checkout_timeout(Duration::from_secs(10))
            .replace_policy(2, Duration::from_millis(20));
        let pool = Pool::new(Arc::clone(&manager), config).unwrap();
        pool.initialize().await.unwrap();

        let conn = pool.get().await.unwrap();
        manager.down.store(true, Ordering::SeqCst);
        pool.checkin(conn, true).await;
        assert_eq!(pool.status().total, 1);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                (pool.get().await, started.elapsed())
            })
        };
        wait_for(|| pool.status().waiters == 1).await;
        wait_for(|| pool.metrics().replacements_failed >= 1).await;

        // the waiter gets the slot and reports the server failure itself
        let (result, waited) = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::Connection(_))));
        assert!(waited < Duration::from_secs(5));
        assert_eq!(pool.status().waiters, 0);

        manager.down.store(false, Ordering::SeqCst);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_dropped_by_close_reports_closed() {
        let (pool, _) = pool(0, 1);
        let _held = pool.get().await.unwrap();

        let (tx, mut rx) = oneshot::channel();
        {
            let mut state = pool.inner.state.lock();
            state.waiters.push_back(Waiter { id: 7, tx });
        }
        pool.close().await;

        let err = pool
            .inner
            .leave_queue(7, &mut rx, Duration::from_millis(10));
        assert!(matches!(err, PoolError::PoolClosed));
    }

    #[tokio::test]
    async fn test_waiter_still_queued_reports_exhausted() {
        let (pool, _) = pool(0, 1);
        let _held = pool.get().await.unwrap();

        let (tx, mut rx) = oneshot::channel();
        pool.inner
            .state
            .lock()
            .waiters
            .push_back(Waiter { id: 3, tx });

        let err = pool
            .inner
            .leave_queue(3, &mut rx, Duration::from_millis(10));
        assert!(matches!(err, PoolError::Exhausted { .. }));
        assert_eq!(pool.status().waiters, 0);
    }

    #[tokio::test]
    async fn test_detach_removes_from_counts() {
        let (pool, _) = pool(0, 2);
        let conn = pool.get().await.unwrap();
        let raw = conn.detach();
        assert_eq!(raw.id, 1);
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_keeps_min_connections() {
        let manager = Arc::new(TestManager::default());
        let config = PoolConfig::new()
            .min_connections(1)
            .max_connections(3)
            .idle_timeout(Duration::from_secs(1))
            .prune_interval(Duration::from_secs(1))
            .validate_interval(None);
        let pool = Pool::new(Arc::clone(&manager), config).unwrap();
        pool.initialize().await.unwrap();

        let held: Vec<_> = vec![
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
        ];
        for conn in held {
            conn.release().await;
        }
        assert_eq!(pool.status().total, 3);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(pool.status().total, 1);
        assert_eq!(pool.metrics().connections_pruned, 2);
        assert_eq!(manager.live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
            waiters: 0,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
        assert!(!status.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            validations_performed: 100,
            validations_failed: 5,
            connections_pruned: 1,
            activation_failures: 0,
            passivation_failures: 0,
            replacements_failed: 0,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.validation_success_rate() - 0.95).abs() < f64::EPSILON);
    }
}
