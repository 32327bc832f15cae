use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, Once};
use std::time::{Duration, Instant};

use corral::future::{block_on, sleep, spawn_ok, BoxFuture};
use corral::{Error, ErrorKind, Pool, PoolConfig, ResourceFactory};

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).try_init().ok();
    });
}

/// Shared between a test and its factory: lifecycle counters plus
/// switches for injecting failures.
#[derive(Default)]
struct TestState {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    fail_create: AtomicBool,
    fail_next_validate: AtomicBool,
}

impl TestState {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Issues sequential integers as resources.
struct TestFactory {
    state: Arc<TestState>,
}

impl ResourceFactory for TestFactory {
    type Resource = usize;

    fn create(&self) -> BoxFuture<'_, Result<usize, Error>> {
        Box::pin(async move {
            if self.state.fail_create.load(Ordering::SeqCst) {
                return Err(Error::from(ErrorKind::Resource));
            }
            Ok(self.state.created.fetch_add(1, Ordering::SeqCst) + 1)
        })
    }

    fn validate<'a>(&'a self, _res: &'a mut usize, _timeout: Duration) -> BoxFuture<'a, bool> {
        let ok = !self.state.fail_next_validate.swap(false, Ordering::SeqCst);
        Box::pin(async move { ok })
    }

    fn destroy(&self, _res: usize) -> BoxFuture<'_, Result<(), Error>> {
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

fn test_pool(config: PoolConfig) -> (Pool<TestFactory>, Arc<TestState>) {
    init();
    let state = Arc::new(TestState::default());
    (
        config.build(TestFactory {
            state: state.clone(),
        }),
        state,
    )
}

async fn wait_until(mut cond: impl FnMut() -> bool, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[test]
fn acquire_reuses_idle_resource() {
    let (pool, state) = test_pool(PoolConfig::new().max_count(2));
    block_on(async {
        let res = pool.acquire().await.expect("first acquire");
        assert_eq!(*res, 1);
        pool.release(res).await;
        assert_eq!(pool.idle_count(), 1);
        let res = pool.acquire().await.expect("second acquire");
        assert_eq!(*res, 1);
        assert_eq!(state.created(), 1);
        pool.release(res).await;
        pool.shutdown().await;
    });
}

#[test]
fn drop_returns_resource_to_pool() {
    let (pool, state) = test_pool(PoolConfig::new().max_count(2));
    block_on(async {
        let res = pool.acquire().await.expect("acquire");
        drop(res);
        assert!(wait_until(|| pool.idle_count() == 1, Duration::from_secs(2)).await);
        let res = pool.acquire().await.expect("reacquire");
        assert_eq!(*res, 1);
        assert_eq!(state.created(), 1);
        pool.release(res).await;
        pool.shutdown().await;
    });
}

#[test]
fn pool_bounds_total_resources() {
    let (pool, state) = test_pool(
        PoolConfig::new()
            .max_count(3)
            .acquire_timeout(Duration::from_secs(10)),
    );
    let held = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (send, recv) = mpsc::channel();
    for _ in 0..8 {
        let pool = pool.clone();
        let held = held.clone();
        let peak = peak.clone();
        let send = send.clone();
        spawn_ok(async move {
            for _ in 0..10 {
                let res = pool.acquire().await.expect("acquire under load");
                let now = held.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(2)).await;
                held.fetch_sub(1, Ordering::SeqCst);
                pool.release(res).await;
            }
            send.send(()).unwrap();
        });
    }
    for _ in 0..8 {
        recv.recv_timeout(Duration::from_secs(30))
            .expect("load task finished");
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(state.created() <= 3);
    assert!(pool.total_count() <= 3);
    block_on(pool.shutdown());
}

#[test]
fn waiting_callers_served_in_arrival_order() {
    let (pool, _state) = test_pool(
        PoolConfig::new()
            .max_count(1)
            .acquire_timeout(Duration::from_secs(10)),
    );
    block_on(async {
        let held = pool.acquire().await.expect("warm-up acquire");
        let order = Arc::new(Mutex::new(Vec::new()));
        let (send, recv) = mpsc::channel();
        for name in ["first", "second"].iter() {
            let pool = pool.clone();
            let order = order.clone();
            let send = send.clone();
            let name = *name;
            spawn_ok(async move {
                let res = pool.acquire().await.expect("queued acquire");
                order.lock().unwrap().push(name);
                pool.release(res).await;
                send.send(()).unwrap();
            });
            // let this waiter enqueue before starting the next
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(pool.waiting_count(), 2);
        pool.release(held).await;
        recv.recv_timeout(Duration::from_secs(5)).unwrap();
        recv.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        pool.shutdown().await;
    });
}

#[test]
fn exhausted_pool_times_out_then_hands_off() {
    let (pool, state) = test_pool(
        PoolConfig::new()
            .min_count(1)
            .max_count(2)
            .acquire_timeout(Duration::from_millis(100)),
    );
    block_on(async {
        assert!(wait_until(|| pool.total_count() == 1, Duration::from_secs(2)).await);
        let first = pool.acquire().await.expect("first acquire");
        let second = pool.acquire().await.expect("second acquire");
        assert_eq!(state.created(), 2);

        let started = Instant::now();
        let err = pool.acquire().await.expect_err("pool is exhausted");
        let elapsed = started.elapsed();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
        // the timeout surfaces the capacity condition as its cause
        assert!(err.to_string().contains("maximum of 2"));

        // a queued caller receives the released resource directly
        pool.set_acquire_timeout(Duration::from_secs(10));
        let first_value = *first;
        let (send, recv) = mpsc::channel();
        {
            let pool = pool.clone();
            spawn_ok(async move {
                let started = Instant::now();
                let res = pool.acquire().await.expect("handed-off acquire");
                send.send((*res, started.elapsed())).unwrap();
                pool.release(res).await;
            });
        }
        sleep(Duration::from_millis(100)).await;
        pool.release(first).await;
        let (value, waited) = recv.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(value, first_value);
        assert!(waited < Duration::from_secs(2));
        assert_eq!(state.created(), 2);

        pool.release(second).await;
        pool.shutdown().await;
    });
}

#[test]
fn housekeeper_replaces_expired_idle_resource() {
    let (pool, state) = test_pool(
        PoolConfig::new()
            .min_count(1)
            .max_count(2)
            .idle_timeout(Duration::from_millis(50))
            .housekeep_interval(Duration::from_millis(50)),
    );
    block_on(async {
        assert!(wait_until(|| pool.total_count() == 1, Duration::from_secs(2)).await);
        // the idle resource expires and is replaced to hold the minimum
        assert!(
            wait_until(
                || state.destroyed() >= 1 && state.created() >= 2,
                Duration::from_secs(5)
            )
            .await
        );
        assert!(wait_until(|| pool.total_count() == 1, Duration::from_secs(2)).await);
        pool.shutdown().await;
    });
}

#[test]
fn evicted_resource_discarded_on_release() {
    let (pool, state) = test_pool(PoolConfig::new().max_count(2));
    block_on(async {
        let res = pool.acquire().await.expect("acquire");
        res.evict();
        pool.release(res).await;
        assert!(wait_until(|| state.destroyed() == 1, Duration::from_secs(2)).await);
        assert_eq!(pool.total_count(), 0);
        assert_eq!(pool.idle_count(), 0);
        let res = pool.acquire().await.expect("acquire after evict");
        assert_eq!(*res, 2);
        pool.release(res).await;
        pool.shutdown().await;
    });
}

#[test]
fn stale_resource_validated_and_replaced() {
    let (pool, state) = test_pool(
        PoolConfig::new()
            .max_count(2)
            .validate_after_idle(Duration::from_millis(20)),
    );
    block_on(async {
        let res = pool.acquire().await.expect("acquire");
        pool.release(res).await;
        // let the idle time pass the validation grace window
        sleep(Duration::from_millis(50)).await;
        // fail exactly one validation: the stale idle resource is
        // discarded and a fresh one is created in the same acquire
        state.fail_next_validate.store(true, Ordering::SeqCst);
        let res = pool.acquire().await.expect("acquire with validation");
        assert_eq!(*res, 2);
        assert_eq!(state.created(), 2);
        assert!(wait_until(|| state.destroyed() == 1, Duration::from_secs(2)).await);
        pool.release(res).await;
        pool.shutdown().await;
    });
}

#[test]
fn shutdown_is_idempotent_and_drains() {
    let (pool, state) = test_pool(
        PoolConfig::new()
            .min_count(2)
            .max_count(4)
            .shutdown_grace(Duration::from_secs(2)),
    );
    block_on(async {
        assert!(wait_until(|| pool.total_count() == 2, Duration::from_secs(2)).await);
        pool.shutdown().await;
        assert_eq!(pool.total_count(), 0);
        assert!(
            wait_until(
                || state.destroyed() == state.created(),
                Duration::from_secs(2)
            )
            .await
        );
        pool.shutdown().await;
        assert_eq!(pool.total_count(), 0);
        let err = pool.acquire().await.expect_err("acquire after shutdown");
        assert_eq!(err.kind(), ErrorKind::Shutdown);
    });
}

#[test]
fn shutdown_force_aborts_held_resources() {
    let (pool, _state) = test_pool(
        PoolConfig::new()
            .max_count(2)
            .shutdown_grace(Duration::from_millis(200)),
    );
    block_on(async {
        let held = pool.acquire().await.expect("acquire");
        let started = Instant::now();
        pool.shutdown().await;
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(pool.total_count(), 0);
        drop(held);
    });
}

#[test]
fn suspend_gates_acquire_until_resume() {
    let (pool, _state) = test_pool(
        PoolConfig::new()
            .max_count(2)
            .allow_suspend(true)
            .acquire_timeout(Duration::from_millis(100)),
    );
    block_on(async {
        pool.suspend().await.expect("suspend");
        let err = pool.acquire().await.expect_err("acquire while suspended");
        assert_eq!(err.kind(), ErrorKind::Suspended);
        pool.resume();
        let res = pool.acquire().await.expect("acquire after resume");
        pool.release(res).await;
        pool.shutdown().await;
    });
}

#[test]
fn suspend_requires_configuration() {
    let (pool, _state) = test_pool(PoolConfig::new().max_count(2));
    block_on(async {
        let err = pool.suspend().await.expect_err("suspension not permitted");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        pool.shutdown().await;
    });
}

#[test]
fn failed_creation_surfaces_in_timeout() {
    let (pool, state) = test_pool(
        PoolConfig::new()
            .max_count(2)
            .acquire_timeout(Duration::from_millis(150))
            .retry_interval(Duration::from_millis(10)),
    );
    block_on(async {
        state.fail_create.store(true, Ordering::SeqCst);
        let err = pool.acquire().await.expect_err("creation fails");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("Resource error"));
        assert_eq!(state.created(), 0);
        assert_eq!(pool.total_count(), 0);
        // creation recovers once the factory does
        state.fail_create.store(false, Ordering::SeqCst);
        pool.set_acquire_timeout(Duration::from_secs(5));
        let res = pool.acquire().await.expect("acquire after recovery");
        pool.release(res).await;
        pool.shutdown().await;
    });
}
