//! Concurrent pooling for expensive, slow-to-create resources.
//!
//! A [`Pool`] hands out exclusive use of resources produced by a
//! [`ResourceFactory`], bounding the total number of live resources,
//! validating and retiring stale ones in the background, reporting
//! suspected leaks, and shutting down cleanly under load.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use corral::{future::BoxFuture, Error, PoolConfig, ResourceFactory};
//!
//! struct Numbers(AtomicUsize);
//!
//! impl ResourceFactory for Numbers {
//!     type Resource = usize;
//!
//!     fn create(&self) -> BoxFuture<'_, Result<usize, Error>> {
//!         Box::pin(async move { Ok(self.0.fetch_add(1, Ordering::SeqCst)) })
//!     }
//! }
//!
//! corral::future::block_on(async {
//!     let pool = PoolConfig::new()
//!         .max_count(2)
//!         .build(Numbers(AtomicUsize::new(0)));
//!     let res = pool.acquire().await.unwrap();
//!     assert_eq!(*res, 0);
//!     drop(res);
//!     pool.shutdown().await;
//! });
//! ```

#[macro_use]
mod error;
pub use self::error::{Error, ErrorKind};

#[macro_use]
mod macros;

#[cfg(any(test, feature = "logger"))]
extern crate env_logger;
#[cfg(any(test, feature = "log"))]
#[macro_use]
extern crate log;

mod config;
pub use self::config::PoolConfig;

mod entry;

mod factory;
pub use self::factory::ResourceFactory;

pub mod future;

mod housekeeper;

mod leak;

mod manager;
pub use self::manager::{Pool, PoolStatus, Pooled};

mod pool;

mod util;

mod worker;
