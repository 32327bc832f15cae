use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The lifecycle state of a pooled entry. Transitions are compare-and-swap
/// operations; `Removed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum State {
    NotInUse = 0,
    InUse = 1,
    Reserved = 2,
    Removed = 3,
}

impl State {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::NotInUse,
            1 => Self::InUse,
            2 => Self::Reserved,
            _ => Self::Removed,
        }
    }
}

static ENTRY_ID: AtomicUsize = AtomicUsize::new(0);

/// Bookkeeping wrapper around one physical resource.
///
/// The handle is present while the entry sits in the pool and is taken by
/// the borrower on checkout, or by the closer when the entry is removed.
pub(crate) struct Entry<R> {
    id: usize,
    handle: Mutex<Option<R>>,
    state: AtomicU8,
    // milliseconds since `created`, updated on return to the pool
    last_access: AtomicU64,
    marked: AtomicBool,
    created: Instant,
    borrow_count: AtomicUsize,
}

impl<R> Entry<R> {
    pub fn new(handle: R) -> Self {
        Self {
            id: ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            handle: Mutex::new(Some(handle)),
            state: AtomicU8::new(State::NotInUse as u8),
            last_access: AtomicU64::new(0),
            marked: AtomicBool::new(false),
            created: Instant::now(),
            borrow_count: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Attempt the state transition `from -> to`, failing if another
    /// caller transitioned the entry first.
    pub fn transition(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn take_handle(&self) -> Option<R> {
        self.handle.lock().unwrap().take()
    }

    pub fn restore_handle(&self, handle: R) {
        self.handle.lock().unwrap().replace(handle);
    }

    pub fn mark(&self) {
        self.marked.store(true, Ordering::SeqCst);
    }

    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::SeqCst)
    }

    /// Record the current time as the latest access.
    pub fn touch(&self) {
        self.last_access
            .store(millis(self.created.elapsed()), Ordering::SeqCst);
    }

    /// Time elapsed since the entry was last returned to the pool.
    pub fn idle_time(&self) -> Duration {
        let total = millis(self.created.elapsed());
        Duration::from_millis(total.saturating_sub(self.last_access.load(Ordering::SeqCst)))
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn begin_borrow(&self) -> usize {
        self.borrow_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn borrow_count(&self) -> usize {
        self.borrow_count.load(Ordering::Acquire)
    }
}

#[inline]
fn millis(dur: Duration) -> u64 {
    dur.as_millis() as u64
}
