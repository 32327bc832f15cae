use std::{future::Future, pin::Pin, time::Duration, time::Instant};

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

static RUNTIME: Lazy<Runtime> = Lazy::new(|| Runtime::new().expect("Error creating tokio runtime"));

/// Block the current thread on an async task, when not running inside the scheduler.
pub fn block_on<R>(f: impl Future<Output = R>) -> R {
    RUNTIME.block_on(f)
}

/// Spawn an async task into the runtime.
#[inline]
pub fn spawn_ok(fut: impl Future<Output = ()> + Send + 'static) {
    RUNTIME.spawn(fut);
}

/// Wait until a specific duration has passed.
pub async fn sleep(dur: Duration) {
    let fut = {
        let _rt = RUNTIME.enter();
        tokio::time::sleep(dur)
    };
    fut.await
}

/// Cancel an async task if it does not complete after a timeout.
pub async fn timeout<R>(dur: Duration, f: impl Future<Output = R>) -> Option<R> {
    let fut = {
        let _rt = RUNTIME.enter();
        tokio::time::timeout(dur, f)
    };
    fut.await.ok()
}

/// Cancel an async task if it does not complete before a deadline.
pub async fn timeout_at<R>(deadline: Instant, f: impl Future<Output = R>) -> Option<R> {
    let fut = {
        let _rt = RUNTIME.enter();
        tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), f)
    };
    fut.await.ok()
}
