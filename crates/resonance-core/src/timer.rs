//! One-shot delayed timers
//!
//! A [`TimerQueue`] holds payloads that come due after a delay. The owner
//! advances it once per frame and handles whatever payloads fall out.

/// Handle to a registered timer. Stays valid (but inert) after the timer
/// fires or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// A handle that never refers to a registration.
    pub const INVALID: TimerHandle = TimerHandle(0);

    /// The raw handle value.
    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug)]
struct Entry<T> {
    handle: TimerHandle,
    due: f64,
    payload: T,
}

/// Queue of one-shot timers keyed by [`TimerHandle`].
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    now: f64,
    entries: Vec<Entry<T>>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            now: 0.0,
            entries: Vec::new(),
        }
    }

    /// Register `payload` to come due `seconds` from now.
    pub fn register(&mut self, seconds: f32, payload: T) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            handle,
            due: self.now + seconds.max(0.0) as f64,
            payload,
        });
        handle
    }

    /// Cancel a registration. Returns `false` for unknown, expired or
    /// already-cancelled handles.
    pub fn unregister(&mut self, handle: TimerHandle) -> bool {
        match self.entries.iter().position(|e| e.handle == handle) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Advance the queue and return every payload that came due, earliest first.
    pub fn advance(&mut self, delta: f32) -> Vec<T> {
        self.now += delta.max(0.0) as f64;

        let now = self.now;
        let mut fired: Vec<Entry<T>> = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].due <= now {
                fired.push(self.entries.swap_remove(index));
            } else {
                index += 1;
            }
        }

        fired.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.handle.cmp(&b.handle)));
        fired.into_iter().map(|e| e.payload).collect()
    }

    /// Whether the handle is still waiting to fire.
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.entries.iter().any(|e| e.handle == handle)
    }

    /// Seconds left before the handle fires, if it is pending.
    pub fn remaining(&self, handle: TimerHandle) -> Option<f32> {
        self.entries
            .iter()
            .find(|e| e.handle == handle)
            .map(|e| (e.due - self.now) as f32)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
