use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::future::{sleep, spawn_ok};

/// A one-shot watchdog armed for the lifetime of one borrow.
///
/// If the borrow outlives the configured threshold a diagnostic is logged
/// with the stack captured at acquire time. The resource itself is left
/// alone; detection is observability only.
pub(crate) struct LeakGuard {
    returned: Arc<AtomicBool>,
}

impl LeakGuard {
    pub fn watch(entry_id: usize, threshold: Duration) -> Self {
        let returned = Arc::new(AtomicBool::new(false));
        let flag = returned.clone();
        let origin = Backtrace::capture();
        spawn_ok(async move {
            sleep(threshold).await;
            if !flag.load(Ordering::SeqCst) {
                warn!(
                    "possible resource leak: resource {} not returned within {:?}; acquired at:\n{}",
                    entry_id, threshold, origin
                );
            }
        });
        Self { returned }
    }
}

impl Drop for LeakGuard {
    fn drop(&mut self) {
        self.returned.store(true, Ordering::SeqCst);
    }
}
