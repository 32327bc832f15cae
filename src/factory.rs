use std::time::Duration;

use super::error::Error;
use super::future::BoxFuture;

/// The capability interface for one resource type.
///
/// The pool never embeds resource-specific protocol logic; opening,
/// health-checking and closing a physical resource all happen here.
pub trait ResourceFactory: Send + Sync + 'static {
    /// The physical resource handed out by the pool
    type Resource: Send + 'static;

    /// Construct and fully prepare one physical resource.
    fn create(&self) -> BoxFuture<'_, Result<Self::Resource, Error>>;

    /// Check that an idle resource is still usable, bounded by `timeout`.
    /// The default implementation accepts every resource.
    fn validate<'a>(
        &'a self,
        res: &'a mut Self::Resource,
        timeout: Duration,
    ) -> BoxFuture<'a, bool> {
        let _ = (res, timeout);
        Box::pin(async { true })
    }

    /// Release a physical resource. Errors are logged by the pool and
    /// otherwise ignored.
    fn destroy(&self, res: Self::Resource) -> BoxFuture<'_, Result<(), Error>> {
        drop(res);
        Box::pin(async { Ok(()) })
    }
}
