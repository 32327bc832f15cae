use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_channel::mpsc;
use futures_lite::StreamExt;

use super::future::spawn_ok;

/// A bounded queue drained by a fixed set of background tasks.
///
/// The queue holds at most `capacity + 1` pending items; `submit` never
/// blocks and hands a refused item back to the caller, which applies its
/// own overflow policy (drop it, or run the work itself).
pub(crate) struct WorkQueue<T> {
    sender: Mutex<mpsc::Sender<T>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new<F, O>(workers: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(T) -> O + Send + Sync + 'static,
        O: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(async_lock::Mutex::new(receiver));
        let handler = Arc::new(handler);
        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let handler = handler.clone();
            spawn_ok(async move {
                loop {
                    let item = receiver.lock().await.next().await;
                    match item {
                        Some(item) => handler(item).await,
                        None => break,
                    }
                }
            });
        }
        Self {
            sender: Mutex::new(sender),
        }
    }

    /// Enqueue an item, returning it when the queue is full or the
    /// workers have stopped.
    pub fn submit(&self, item: T) -> Result<(), T> {
        self.sender
            .lock()
            .unwrap()
            .try_send(item)
            .map_err(|err| err.into_inner())
    }
}
