use std::sync::Weak;

use super::factory::ResourceFactory;
use super::future::{sleep, spawn_ok};
use super::manager::Shared;

/// Start the periodic maintenance task for a pool. The task holds only a
/// weak reference and stops once the pool is shut down or dropped.
pub(crate) fn run<F: ResourceFactory>(shared: Weak<Shared<F>>) {
    spawn_ok(async move {
        loop {
            let interval = match shared.upgrade() {
                Some(shared) if !shared.is_shutdown() => shared.housekeep_interval(),
                _ => break,
            };
            sleep(interval).await;
            match shared.upgrade() {
                Some(shared) if !shared.is_shutdown() => {
                    shared.sweep().await;
                    shared.fill();
                }
                _ => break,
            }
        }
        trace!("housekeeper stopped");
    });
}
