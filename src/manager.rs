use std::fmt::{self, Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_lock::{Mutex as AsyncMutex, MutexGuardArc};
use once_cell::sync::OnceCell;

use super::config::PoolConfig;
use super::entry::{Entry, State};
use super::error::Error;
use super::factory::ResourceFactory;
use super::future::{sleep, spawn_ok, timeout_at};
use super::housekeeper;
use super::leak::LeakGuard;
use super::pool::{Borrowed, ResourcePool};
use super::util::AtomicCounter;
use super::worker::WorkQueue;

const RUNNING: u8 = 0;
const SUSPENDED: u8 = 1;
const SHUTDOWN: u8 = 2;

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// A point-in-time view of the pool gauges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Resources currently borrowed by callers
    pub active: usize,
    /// Resources idle in the pool
    pub idle: usize,
    /// All live resources, including those being created or reserved
    pub total: usize,
    /// Callers blocked waiting for a resource
    pub waiting: usize,
}

pub(crate) struct Shared<F: ResourceFactory> {
    bag: ResourcePool<F::Resource>,
    factory: F,
    config: PoolConfig,
    acquire_timeout_ms: AtomicU64,
    idle_timeout_ms: AtomicU64,
    total: AtomicCounter,
    state: AtomicU8,
    gate: Arc<AsyncMutex<()>>,
    suspend_guard: Mutex<Option<MutexGuardArc<()>>>,
    last_create_error: Mutex<Option<(crate::ErrorKind, String)>>,
    create_queue: OnceCell<WorkQueue<()>>,
    close_queue: OnceCell<WorkQueue<F::Resource>>,
}

impl<F: ResourceFactory> Shared<F> {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SHUTDOWN
    }

    fn is_suspended(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SUSPENDED
    }

    fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms.load(Ordering::Relaxed))
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn housekeep_interval(&self) -> Duration {
        self.config.housekeep_interval
    }

    fn record_create_error(&self, err: Error) {
        *self.last_create_error.lock().unwrap() = Some((err.kind(), err.to_string()));
    }

    fn timeout_error(&self) -> Error {
        let err = err_msg!(Timeout, "no resource became available in time");
        match self.last_create_error.lock().unwrap().clone() {
            Some((kind, msg)) => err.with_cause(Error::from_msg(kind, msg)),
            None => err,
        }
    }

    /// Attempt to create and publish one resource, respecting the
    /// configured maximum. Returns false only for factory failures,
    /// which the creation worker treats as retryable.
    pub(crate) async fn grow(&self) -> bool {
        if self.is_shutdown() {
            return true;
        }
        if self.total.try_increment(self.config.max_count).is_err() {
            trace!("creation refused: pool is at capacity");
            self.record_create_error(err_msg!(
                Capacity,
                "pool reached its maximum of {} resources",
                self.config.max_count
            ));
            return true;
        }
        match self.factory.create().await {
            Ok(res) => {
                let entry = Arc::new(Entry::new(res));
                trace!("created resource {}", entry.id());
                if !self.bag.add(entry.clone()) {
                    // the pool closed while the resource was being created
                    self.total.decrement();
                    if let Some(res) = entry.take_handle() {
                        self.destroy_now(res).await;
                    }
                }
                true
            }
            Err(err) => {
                self.total.decrement();
                debug!("resource creation failed: {}", err);
                self.record_create_error(err);
                false
            }
        }
    }

    pub(crate) fn request_grow(&self) {
        if self.is_shutdown() {
            return;
        }
        if let Some(queue) = self.create_queue.get() {
            // fill requests beyond the queue bound are dropped
            let _ = queue.submit(());
        }
    }

    pub(crate) fn fill(&self) {
        let want = self.config.min_count.saturating_sub(self.total.value());
        for _ in 0..want {
            self.request_grow();
        }
    }

    /// Inspect a claimed entry before handing it to the caller. Marked,
    /// force-aborted and validation-failed entries are discarded and the
    /// caller retries with its remaining time.
    async fn check_out(
        &self,
        entry: Arc<Entry<F::Resource>>,
    ) -> Option<(Arc<Entry<F::Resource>>, F::Resource)> {
        let mut res = match entry.take_handle() {
            Some(res) => res,
            None => {
                // the handle was claimed by a force-abort
                if self.bag.retire(&entry) {
                    self.total.decrement();
                }
                return None;
            }
        };
        if entry.state() == State::Removed {
            self.dispatch_destroy(res).await;
            return None;
        }
        if entry.is_marked() {
            debug!("discarding resource {} marked for eviction", entry.id());
            self.discard_in_use(&entry, res).await;
            return None;
        }
        if entry.idle_time() >= self.config.validate_after_idle
            && !self
                .factory
                .validate(&mut res, self.config.validate_timeout)
                .await
        {
            debug!("resource {} failed validation", entry.id());
            self.discard_in_use(&entry, res).await;
            return None;
        }
        entry.begin_borrow();
        Some((entry, res))
    }

    /// Return a borrowed resource to the pool, or discard it when it was
    /// marked for eviction or the pool is shutting down.
    pub(crate) async fn give_back(&self, entry: Arc<Entry<F::Resource>>, res: F::Resource) {
        if entry.is_marked() || self.is_shutdown() {
            self.discard_in_use(&entry, res).await;
            return;
        }
        entry.restore_handle(res);
        entry.touch();
        if !self.bag.requite(&entry) {
            // the claim was lost to a force-abort; reclaim the handle
            // unless the abort already took it
            if let Some(res) = entry.take_handle() {
                self.dispatch_destroy(res).await;
            }
        }
    }

    async fn discard_in_use(&self, entry: &Arc<Entry<F::Resource>>, res: F::Resource) {
        if self.bag.retire(entry) {
            self.total.decrement();
        }
        self.dispatch_destroy(res).await;
    }

    async fn discard_reserved(&self, entry: &Arc<Entry<F::Resource>>) {
        let handle = entry.take_handle();
        if self.bag.remove(entry) {
            self.total.decrement();
        }
        if let Some(res) = handle {
            self.dispatch_destroy(res).await;
        }
    }

    /// Sweep idle entries, retiring any that are marked, have idled past
    /// the idle timeout, or have outlived the maximum lifetime.
    pub(crate) async fn sweep(&self) {
        let idle_timeout = self.idle_timeout();
        for entry in self.bag.snapshot() {
            if entry.state() != State::NotInUse || !self.bag.reserve(&entry) {
                continue;
            }
            let expired = entry.is_marked()
                || entry.idle_time() >= idle_timeout
                || self
                    .config
                    .max_lifetime
                    .map(|max| entry.age() >= max)
                    .unwrap_or(false);
            if expired {
                debug!("retiring idle resource {}", entry.id());
                self.discard_reserved(&entry).await;
            } else {
                self.bag.unreserve(&entry);
            }
        }
    }

    /// Mark all borrowed entries for discard-on-return and close every
    /// idle entry immediately.
    async fn soft_evict(&self) {
        for entry in self.bag.snapshot() {
            match entry.state() {
                State::InUse => entry.mark(),
                State::NotInUse => {
                    if self.bag.reserve(&entry) {
                        self.discard_reserved(&entry).await;
                    }
                }
                _ => (),
            }
        }
    }

    // Shutdown only: unconditionally release resources still out with
    // callers. Their guards finish the physical close on drop.
    async fn abort_in_use(&self) {
        for entry in self.bag.snapshot() {
            if entry.state() == State::InUse && self.bag.retire(&entry) {
                self.total.decrement();
                warn!("force abort of in-use resource {}", entry.id());
                if let Some(res) = entry.take_handle() {
                    self.destroy_now(res).await;
                }
            }
        }
    }

    async fn dispatch_destroy(&self, res: F::Resource) {
        match self.close_queue.get() {
            Some(queue) => {
                if let Err(back) = queue.submit(res) {
                    // queue is full: run the close here instead of
                    // leaking the handle
                    self.destroy_now(back).await;
                }
            }
            None => self.destroy_now(res).await,
        }
    }

    pub(crate) async fn destroy_now(&self, res: F::Resource) {
        if let Err(err) = self.factory.destroy(res).await {
            warn!("error closing resource: {}", err);
        }
    }
}

/// A managed pool of reusable resources.
///
/// The pool is cheaply cloneable; all clones share the same state. It is
/// created through [`PoolConfig::build`] and torn down with
/// [`Pool::shutdown`]. Dropping the last clone without a shutdown stops
/// the background tasks and drops the remaining resources without
/// running the factory's `destroy`.
pub struct Pool<F: ResourceFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: ResourceFactory> Debug for Pool<F> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Pool").field("status", &self.status()).finish()
    }
}

impl<F: ResourceFactory> Pool<F> {
    pub(crate) fn new(config: PoolConfig, factory: F) -> Self {
        let shared = Arc::new(Shared {
            bag: ResourcePool::new(),
            factory,
            acquire_timeout_ms: AtomicU64::new(config.acquire_timeout.as_millis() as u64),
            idle_timeout_ms: AtomicU64::new(config.idle_timeout.as_millis() as u64),
            total: AtomicCounter::default(),
            state: AtomicU8::new(RUNNING),
            gate: Arc::new(AsyncMutex::new(())),
            suspend_guard: Mutex::new(None),
            last_create_error: Mutex::new(None),
            create_queue: OnceCell::new(),
            close_queue: OnceCell::new(),
            config,
        });

        let weak = Arc::downgrade(&shared);
        let create_queue = WorkQueue::new(
            shared.config.create_workers,
            shared.config.create_queue,
            move |_request: ()| {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        if !shared.grow().await {
                            sleep(shared.config.retry_interval).await;
                        }
                    }
                }
            },
        );
        let _ = shared.create_queue.set(create_queue);

        let weak = Arc::downgrade(&shared);
        let close_queue = WorkQueue::new(
            shared.config.close_workers,
            shared.config.close_queue,
            move |res: F::Resource| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(shared) => shared.destroy_now(res).await,
                        None => drop(res),
                    }
                }
            },
        );
        let _ = shared.close_queue.set(close_queue);

        housekeeper::run(Arc::downgrade(&shared));
        shared.fill();
        Self { shared }
    }

    /// Borrow a resource, waiting up to the configured acquire timeout.
    ///
    /// The caller receives exclusive use of the resource until the
    /// returned [`Pooled`] guard is dropped or passed to
    /// [`Pool::release`]. A timeout error carries the most recent
    /// creation failure, if any, as its cause.
    pub async fn acquire(&self) -> Result<Pooled<F>, Error> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.acquire_timeout();
        if shared.is_shutdown() {
            return Err(err_msg!(Shutdown));
        }
        if shared.config.allow_suspend {
            match timeout_at(deadline, shared.gate.lock()).await {
                Some(_guard) => (),
                None => {
                    return Err(if shared.is_suspended() {
                        err_msg!(Suspended)
                    } else {
                        shared.timeout_error()
                    });
                }
            }
        }
        loop {
            if shared.is_shutdown() {
                return Err(err_msg!(Shutdown));
            }
            match shared.bag.borrow() {
                Borrowed::Closed => return Err(err_msg!(Shutdown)),
                Borrowed::Entry(entry) => {
                    if let Some((entry, res)) = shared.check_out(entry).await {
                        return Ok(Pooled::new(shared.clone(), entry, res));
                    }
                }
                Borrowed::Wait(receiver) => {
                    shared.request_grow();
                    match timeout_at(deadline, receiver).await {
                        None => return Err(shared.timeout_error()),
                        Some(Err(_closed)) => return Err(err_msg!(Shutdown)),
                        Some(Ok(handoff)) => {
                            if let Some((entry, res)) = shared.check_out(handoff.take()).await {
                                return Ok(Pooled::new(shared.clone(), entry, res));
                            }
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(shared.timeout_error());
            }
        }
    }

    /// Return a borrowed resource, waiting for any resulting close to be
    /// dispatched. Dropping the guard has the same effect but performs
    /// the return on a background task.
    pub async fn release(&self, mut res: Pooled<F>) {
        if let Some((entry, resource)) = res.extract() {
            self.shared.give_back(entry, resource).await;
        }
    }

    /// Block future `acquire` calls until [`Pool::resume`]. Fails unless
    /// the pool was configured with `allow_suspend`.
    pub async fn suspend(&self) -> Result<(), Error> {
        if !self.shared.config.allow_suspend {
            return Err(err_msg!(Unsupported, "pool was not configured for suspension"));
        }
        if self.shared.is_shutdown() {
            return Err(err_msg!(Shutdown));
        }
        if self.shared.is_suspended() {
            return Ok(());
        }
        let guard = self.shared.gate.lock_arc().await;
        if self.shared.is_shutdown() {
            return Err(err_msg!(Shutdown));
        }
        self.shared.state.store(SUSPENDED, Ordering::SeqCst);
        *self.shared.suspend_guard.lock().unwrap() = Some(guard);
        debug!("pool suspended");
        Ok(())
    }

    /// Release a previous suspension. Calling `resume` on a pool that is
    /// not suspended has no effect.
    pub fn resume(&self) {
        let guard = self.shared.suspend_guard.lock().unwrap().take();
        if guard.is_some() {
            let _ = self.shared.state.compare_exchange(
                SUSPENDED,
                RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            debug!("pool resumed");
        }
    }

    /// Close the pool: reject new borrows, discard idle resources, and
    /// wait up to the configured grace period for borrowed resources to
    /// come back before force-aborting them. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if shared.state.swap(SHUTDOWN, Ordering::SeqCst) != SHUTDOWN {
            debug!("pool shutdown requested");
        }
        // release the suspension gate so queued acquires fail fast
        shared.suspend_guard.lock().unwrap().take();
        shared.bag.close();
        let deadline = Instant::now() + shared.config.shutdown_grace;
        loop {
            shared.soft_evict().await;
            if shared.total.value() == 0 {
                break;
            }
            if Instant::now() >= deadline {
                shared.abort_in_use().await;
                shared.soft_evict().await;
                let remaining = shared.total.value();
                if remaining != 0 {
                    warn!(
                        "shutdown grace elapsed with {} resources still live",
                        remaining
                    );
                }
                break;
            }
            sleep(SHUTDOWN_POLL).await;
        }
        debug!("pool shutdown complete");
    }

    /// Resources currently borrowed by callers.
    pub fn active_count(&self) -> usize {
        self.shared.bag.count(State::InUse)
    }

    /// Resources idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.shared.bag.count(State::NotInUse)
    }

    /// All live resources.
    pub fn total_count(&self) -> usize {
        self.shared.total.value()
    }

    /// Callers currently blocked in `acquire`.
    pub fn waiting_count(&self) -> usize {
        self.shared.bag.waiter_count()
    }

    /// Read all gauges at once.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            active: self.active_count(),
            idle: self.idle_count(),
            total: self.total_count(),
            waiting: self.waiting_count(),
        }
    }

    /// Adjust the acquire timeout for subsequent borrows.
    pub fn set_acquire_timeout(&self, val: Duration) {
        self.shared
            .acquire_timeout_ms
            .store(val.as_millis() as u64, Ordering::Relaxed);
    }

    /// Adjust the idle timeout checked by the housekeeper.
    pub fn set_idle_timeout(&self, val: Duration) {
        self.shared
            .idle_timeout_ms
            .store(val.as_millis() as u64, Ordering::Relaxed);
    }
}

/// An exclusively borrowed resource.
///
/// Dereferences to the underlying resource. Dropping the guard returns
/// the resource to the pool on a background task; use [`Pool::release`]
/// to wait for the return instead.
pub struct Pooled<F: ResourceFactory> {
    shared: Arc<Shared<F>>,
    entry: Option<Arc<Entry<F::Resource>>>,
    resource: Option<F::Resource>,
    _leak: Option<LeakGuard>,
}

impl<F: ResourceFactory> Pooled<F> {
    fn new(shared: Arc<Shared<F>>, entry: Arc<Entry<F::Resource>>, resource: F::Resource) -> Self {
        let leak = shared
            .config
            .leak_threshold
            .map(|threshold| LeakGuard::watch(entry.id(), threshold));
        Self {
            shared,
            entry: Some(entry),
            resource: Some(resource),
            _leak: leak,
        }
    }

    /// Mark the resource for discard instead of reuse when it is
    /// returned to the pool.
    pub fn evict(&self) {
        if let Some(entry) = self.entry.as_ref() {
            entry.mark();
        }
    }

    /// The number of times this resource has been borrowed.
    pub fn borrow_count(&self) -> usize {
        self.entry
            .as_ref()
            .map(|entry| entry.borrow_count())
            .unwrap_or_default()
    }

    fn extract(&mut self) -> Option<(Arc<Entry<F::Resource>>, F::Resource)> {
        self._leak.take();
        match (self.entry.take(), self.resource.take()) {
            (Some(entry), Some(res)) => Some((entry, res)),
            _ => None,
        }
    }
}

impl<F: ResourceFactory> Deref for Pooled<F> {
    type Target = F::Resource;
    fn deref(&self) -> &Self::Target {
        // note: panics after the value is taken on release
        self.resource.as_ref().unwrap()
    }
}

impl<F: ResourceFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // note: panics after the value is taken on release
        self.resource.as_mut().unwrap()
    }
}

impl<F: ResourceFactory> Debug for Pooled<F>
where
    F::Resource: Debug,
{
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.resource, fmt)
    }
}

impl<F: ResourceFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some((entry, res)) = self.extract() {
            let shared = self.shared.clone();
            spawn_ok(async move {
                shared.give_back(entry, res).await;
            });
        }
    }
}
