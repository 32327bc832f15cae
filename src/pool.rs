use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_channel::oneshot;

use super::entry::{Entry, State};

/// The result of a borrow attempt.
pub(crate) enum Borrowed<R> {
    /// An idle entry was claimed without blocking
    Entry(Arc<Entry<R>>),
    /// No entry was available; the caller was enqueued for direct handoff
    Wait(oneshot::Receiver<Handoff<R>>),
    /// The pool is closed and no longer lends entries
    Closed,
}

/// An entry in transit to a specific waiter. The entry remains claimed
/// during the transfer; if the waiter gave up before taking delivery the
/// entry is re-published on drop instead of being stranded.
pub(crate) struct Handoff<R> {
    entry: Option<Arc<Entry<R>>>,
    pool: ResourcePool<R>,
}

impl<R> Handoff<R> {
    pub fn take(mut self) -> Arc<Entry<R>> {
        // the entry is always present until taken or dropped
        self.entry.take().unwrap()
    }
}

impl<R> Drop for Handoff<R> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.requite(&entry);
        }
    }
}

/// The synchronized collection of pool entries.
///
/// Entry states are advanced by compare-and-swap; the mutex guards only the
/// entry index, the idle list and the waiter queue, and is never held across
/// an await point. A freed entry is handed directly to the oldest waiter
/// while still claimed, so new borrowers cannot race a queued caller.
pub(crate) struct ResourcePool<R> {
    state: Arc<BagState<R>>,
}

impl<R> Clone for ResourcePool<R> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

struct BagState<R> {
    inner: Mutex<Inner<R>>,
    // live entry counts for NOT_IN_USE / IN_USE / RESERVED
    counts: [AtomicUsize; 3],
    // cumulative count of removed entries
    removed: AtomicUsize,
}

struct Inner<R> {
    entries: HashMap<usize, Arc<Entry<R>>>,
    idle: VecDeque<usize>,
    waiters: VecDeque<oneshot::Sender<Handoff<R>>>,
    closed: bool,
}

impl<R> ResourcePool<R> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BagState {
                inner: Mutex::new(Inner {
                    entries: HashMap::new(),
                    idle: VecDeque::new(),
                    waiters: VecDeque::new(),
                    closed: false,
                }),
                counts: [
                    AtomicUsize::new(0),
                    AtomicUsize::new(0),
                    AtomicUsize::new(0),
                ],
                removed: AtomicUsize::new(0),
            }),
        }
    }

    /// Insert a freshly created entry, handing it to the oldest waiter when
    /// one is queued. Returns false if the pool is closed, leaving the
    /// entry with the caller for disposal.
    pub fn add(&self, entry: Arc<Entry<R>>) -> bool {
        let mut inner = self.state.inner.lock().unwrap();
        if inner.closed {
            return false;
        }
        inner.entries.insert(entry.id(), entry.clone());
        self.state.counts[State::NotInUse as usize].fetch_add(1, Ordering::SeqCst);
        if self.try_transition(&entry, State::NotInUse, State::InUse) {
            self.release_claim(&mut inner, entry);
        }
        true
    }

    /// Claim an idle entry, or enqueue the caller for the next freed one.
    pub fn borrow(&self) -> Borrowed<R> {
        let mut inner = self.state.inner.lock().unwrap();
        if inner.closed {
            return Borrowed::Closed;
        }
        if !inner.waiters.is_empty() {
            // drop waiters whose borrow timed out
            inner.waiters.retain(|waiter| !waiter.is_canceled());
        }
        if inner.waiters.is_empty() {
            while let Some(id) = inner.idle.pop_front() {
                if let Some(entry) = inner.entries.get(&id).cloned() {
                    if self.try_transition(&entry, State::NotInUse, State::InUse) {
                        return Borrowed::Entry(entry);
                    }
                    // lost to a concurrent reserve or removal
                }
            }
        }
        let (send, recv) = oneshot::channel();
        inner.waiters.push_back(send);
        Borrowed::Wait(recv)
    }

    /// Return a borrowed entry to the pool. Returns false if the entry is
    /// no longer held in the `IN_USE` state, in which case the caller keeps
    /// responsibility for the physical resource.
    pub fn requite(&self, entry: &Arc<Entry<R>>) -> bool {
        let mut inner = self.state.inner.lock().unwrap();
        if entry.state() != State::InUse {
            return false;
        }
        self.release_claim(&mut inner, entry.clone());
        true
    }

    /// Attempt to claim an idle entry for background inspection.
    pub fn reserve(&self, entry: &Arc<Entry<R>>) -> bool {
        self.try_transition(entry, State::NotInUse, State::Reserved)
    }

    /// Release a reservation, re-publishing the entry to waiters.
    pub fn unreserve(&self, entry: &Arc<Entry<R>>) {
        if self.try_transition(entry, State::Reserved, State::InUse) {
            let mut inner = self.state.inner.lock().unwrap();
            self.release_claim(&mut inner, entry.clone());
        }
    }

    /// Remove an idle or reserved entry. Returns false when the entry is
    /// currently borrowed or was already removed; the losing caller treats
    /// this as "someone else handled it".
    pub fn remove(&self, entry: &Arc<Entry<R>>) -> bool {
        if self.try_transition(entry, State::NotInUse, State::Removed)
            || self.try_transition(entry, State::Reserved, State::Removed)
        {
            self.state.inner.lock().unwrap().entries.remove(&entry.id());
            true
        } else {
            false
        }
    }

    /// Remove an entry out of the `IN_USE` state. Reserved for the holder
    /// of the borrow and for the shutdown force-abort path.
    pub fn retire(&self, entry: &Arc<Entry<R>>) -> bool {
        if self.try_transition(entry, State::InUse, State::Removed) {
            self.state.inner.lock().unwrap().entries.remove(&entry.id());
            true
        } else {
            false
        }
    }

    /// Stop lending entries and wake all queued waiters.
    pub fn close(&self) {
        let mut inner = self.state.inner.lock().unwrap();
        inner.closed = true;
        // dropping the senders resolves the waiters' receivers
        inner.waiters.clear();
    }

    pub fn count(&self, state: State) -> usize {
        match state {
            State::Removed => self.state.removed.load(Ordering::Acquire),
            other => self.state.counts[other as usize].load(Ordering::Acquire),
        }
    }

    pub fn waiter_count(&self) -> usize {
        let mut inner = self.state.inner.lock().unwrap();
        inner.waiters.retain(|waiter| !waiter.is_canceled());
        inner.waiters.len()
    }

    pub fn snapshot(&self) -> Vec<Arc<Entry<R>>> {
        let inner = self.state.inner.lock().unwrap();
        inner.entries.values().cloned().collect()
    }

    // The caller holds the IN_USE claim on the entry. Hand it to the oldest
    // live waiter without releasing the claim, or publish it as idle.
    fn release_claim(&self, inner: &mut Inner<R>, mut entry: Arc<Entry<R>>) {
        while let Some(waiter) = inner.waiters.pop_front() {
            let handoff = Handoff {
                entry: Some(entry),
                pool: self.clone(),
            };
            match waiter.send(handoff) {
                Ok(()) => return,
                Err(mut back) => {
                    // take the entry back without triggering the drop
                    // handler while the lock is held
                    entry = back.entry.take().unwrap();
                }
            }
        }
        if self.try_transition(&entry, State::InUse, State::NotInUse) {
            inner.idle.push_back(entry.id());
        }
    }

    fn try_transition(&self, entry: &Entry<R>, from: State, to: State) -> bool {
        if entry.transition(from, to) {
            self.state.counts[from as usize].fetch_sub(1, Ordering::SeqCst);
            match to {
                State::Removed => {
                    self.state.removed.fetch_add(1, Ordering::SeqCst);
                }
                other => {
                    self.state.counts[other as usize].fetch_add(1, Ordering::SeqCst);
                }
            }
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::block_on;

    fn entry(val: u32) -> Arc<Entry<u32>> {
        Arc::new(Entry::new(val))
    }

    #[test]
    fn borrow_claims_idle_entry() {
        let pool = ResourcePool::new();
        assert!(pool.add(entry(1)));
        let borrowed = match pool.borrow() {
            Borrowed::Entry(e) => e,
            _ => panic!("expected immediate claim"),
        };
        assert_eq!(borrowed.state(), State::InUse);
        assert_eq!(pool.count(State::InUse), 1);
        assert_eq!(pool.count(State::NotInUse), 0);
        assert!(pool.requite(&borrowed));
        assert_eq!(pool.count(State::NotInUse), 1);
    }

    #[test]
    fn waiters_served_in_fifo_order() {
        let pool = ResourcePool::new();
        let first = match pool.borrow() {
            Borrowed::Wait(recv) => recv,
            _ => panic!("expected wait"),
        };
        let second = match pool.borrow() {
            Borrowed::Wait(recv) => recv,
            _ => panic!("expected wait"),
        };
        assert_eq!(pool.waiter_count(), 2);
        assert!(pool.add(entry(1)));
        assert!(pool.add(entry(2)));
        block_on(async move {
            let a = first.await.unwrap().take();
            let b = second.await.unwrap().take();
            assert_eq!(a.take_handle(), Some(1));
            assert_eq!(b.take_handle(), Some(2));
        });
    }

    #[test]
    fn requite_hands_off_before_new_borrowers() {
        let pool = ResourcePool::new();
        assert!(pool.add(entry(7)));
        let held = match pool.borrow() {
            Borrowed::Entry(e) => e,
            _ => panic!("expected claim"),
        };
        let waiter = match pool.borrow() {
            Borrowed::Wait(recv) => recv,
            _ => panic!("expected wait"),
        };
        assert!(pool.requite(&held));
        // the freed entry went to the queued waiter, not the idle list
        assert_eq!(pool.count(State::NotInUse), 0);
        block_on(async move {
            let entry = waiter.await.unwrap().take();
            assert_eq!(entry.state(), State::InUse);
        });
    }

    #[test]
    fn abandoned_handoff_is_republished() {
        let pool = ResourcePool::new();
        let waiter = match pool.borrow() {
            Borrowed::Wait(recv) => recv,
            _ => panic!("expected wait"),
        };
        // the entry is handed to the waiter, which then gives up without
        // taking delivery
        assert!(pool.add(entry(5)));
        drop(waiter);
        match pool.borrow() {
            Borrowed::Entry(e) => assert_eq!(e.take_handle(), Some(5)),
            _ => panic!("expected the abandoned entry to return"),
        }
    }

    #[test]
    fn reserve_excludes_borrowers() {
        let pool = ResourcePool::new();
        let e = entry(3);
        assert!(pool.add(e.clone()));
        assert!(pool.reserve(&e));
        assert!(!pool.reserve(&e));
        // a borrow during the reservation queues instead of claiming
        let waiter = match pool.borrow() {
            Borrowed::Wait(recv) => recv,
            _ => panic!("expected wait"),
        };
        pool.unreserve(&e);
        block_on(async move {
            let handed = waiter.await.unwrap().take();
            assert_eq!(handed.id(), e.id());
        });
    }

    #[test]
    fn reserve_and_borrow_race_has_one_winner() {
        use std::thread;
        for _ in 0..50 {
            let pool = Arc::new(ResourcePool::new());
            let e = entry(1);
            assert!(pool.add(e.clone()));
            let racer = {
                let pool = pool.clone();
                let e = e.clone();
                thread::spawn(move || pool.reserve(&e))
            };
            let borrowed = match pool.borrow() {
                Borrowed::Entry(_) => true,
                _ => false,
            };
            let reserved = racer.join().unwrap();
            assert!(borrowed ^ reserved);
        }
    }

    #[test]
    fn remove_refuses_in_use_entries() {
        let pool = ResourcePool::new();
        let e = entry(4);
        assert!(pool.add(e.clone()));
        let borrowed = match pool.borrow() {
            Borrowed::Entry(e) => e,
            _ => panic!("expected claim"),
        };
        assert!(!pool.remove(&borrowed));
        assert!(pool.requite(&borrowed));
        assert!(pool.remove(&e));
        assert!(!pool.remove(&e));
        assert_eq!(pool.count(State::Removed), 1);
    }

    #[test]
    fn close_wakes_pending_waiters() {
        let pool = ResourcePool::<u32>::new();
        let waiter = match pool.borrow() {
            Borrowed::Wait(recv) => recv,
            _ => panic!("expected wait"),
        };
        pool.close();
        block_on(async move {
            assert!(waiter.await.is_err());
        });
        match pool.borrow() {
            Borrowed::Closed => (),
            _ => panic!("expected closed"),
        }
    }

    #[test]
    fn canceled_waiters_do_not_block_idle_entries() {
        let pool = ResourcePool::new();
        let waiter = match pool.borrow() {
            Borrowed::Wait(recv) => recv,
            _ => panic!("expected wait"),
        };
        drop(waiter);
        assert!(pool.add(entry(9)));
        match pool.borrow() {
            Borrowed::Entry(_) => (),
            _ => panic!("expected claim after waiter cancellation"),
        }
    }
}
