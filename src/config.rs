use std::time::Duration;

use super::factory::ResourceFactory;
use super::manager::Pool;

/// Construction options for a [`Pool`].
///
/// The two timeouts polled on the hot path, `acquire_timeout` and
/// `idle_timeout`, can be adjusted later through the pool itself; the
/// remaining fields are fixed once `build` is called.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub(crate) min_count: usize,
    pub(crate) max_count: usize,
    pub(crate) acquire_timeout: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) max_lifetime: Option<Duration>,
    pub(crate) validate_after_idle: Duration,
    pub(crate) validate_timeout: Duration,
    pub(crate) leak_threshold: Option<Duration>,
    pub(crate) allow_suspend: bool,
    pub(crate) housekeep_interval: Duration,
    pub(crate) shutdown_grace: Duration,
    pub(crate) retry_interval: Duration,
    pub(crate) create_workers: usize,
    pub(crate) create_queue: usize,
    pub(crate) close_workers: usize,
    pub(crate) close_queue: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_count: 0,
            max_count: 16,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: None,
            validate_after_idle: Duration::from_millis(500),
            validate_timeout: Duration::from_secs(5),
            leak_threshold: None,
            allow_suspend: false,
            housekeep_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            retry_interval: Duration::from_secs(1),
            create_workers: 2,
            create_queue: 16,
            close_workers: 2,
            close_queue: 64,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of resources maintained by the housekeeper.
    pub fn min_count(mut self, val: usize) -> Self {
        self.min_count = val;
        self
    }

    /// The maximum number of live resources.
    pub fn max_count(mut self, val: usize) -> Self {
        self.max_count = val;
        self
    }

    /// How long `acquire` waits before failing with a timeout.
    pub fn acquire_timeout(mut self, val: Duration) -> Self {
        self.acquire_timeout = val;
        self
    }

    /// How long an entry may sit idle before the housekeeper retires it.
    pub fn idle_timeout(mut self, val: Duration) -> Self {
        self.idle_timeout = val;
        self
    }

    /// Retire entries older than this regardless of activity.
    pub fn max_lifetime(mut self, val: Duration) -> Self {
        self.max_lifetime = Some(val);
        self
    }

    /// Skip validation for entries idle for less than this window.
    pub fn validate_after_idle(mut self, val: Duration) -> Self {
        self.validate_after_idle = val;
        self
    }

    /// Upper bound handed to the factory's validation check.
    pub fn validate_timeout(mut self, val: Duration) -> Self {
        self.validate_timeout = val;
        self
    }

    /// Report resources held out of the pool for longer than this.
    pub fn leak_threshold(mut self, val: Duration) -> Self {
        self.leak_threshold = Some(val);
        self
    }

    /// Permit `suspend` / `resume` on the built pool.
    pub fn allow_suspend(mut self, val: bool) -> Self {
        self.allow_suspend = val;
        self
    }

    /// The period of the background maintenance sweep.
    pub fn housekeep_interval(mut self, val: Duration) -> Self {
        self.housekeep_interval = val;
        self
    }

    /// How long `shutdown` waits for borrowed resources to come back
    /// before force-aborting them.
    pub fn shutdown_grace(mut self, val: Duration) -> Self {
        self.shutdown_grace = val;
        self
    }

    /// Pause applied by a creation worker after a failed attempt.
    pub fn retry_interval(mut self, val: Duration) -> Self {
        self.retry_interval = val;
        self
    }

    /// Task count and queue bound for resource creation. Fill requests
    /// beyond the queue bound are dropped.
    pub fn create_workers(mut self, workers: usize, queue: usize) -> Self {
        self.create_workers = workers;
        self.create_queue = queue;
        self
    }

    /// Task count and queue bound for resource disposal. When the queue
    /// is full the close runs on the calling task instead.
    pub fn close_workers(mut self, workers: usize, queue: usize) -> Self {
        self.close_workers = workers;
        self.close_queue = queue;
        self
    }

    /// Construct the pool and begin filling it to the minimum size.
    pub fn build<F: ResourceFactory>(self, factory: F) -> Pool<F> {
        Pool::new(self, factory)
    }
}
