//! Bounded hand-off between a source thread and the notifier worker.
//!
//! Live sources must never fall behind the detector: when the queue is full
//! the oldest pending batch is discarded so the worker always sees the most
//! recent observations. Replay sources instead wait for room, so no input
//! line is lost.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// What a producer does when the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overflow {
    /// Discard the oldest pending item (live streams).
    DropOldest,
    /// Wait until the consumer makes room (replays).
    Block,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    /// Nothing arrived within the wait.
    Empty,
    /// Closed and fully drained.
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

pub struct BatchQueue<T> {
    capacity: usize,
    overflow: Overflow,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BatchQueue<T> {
    pub fn new(capacity: usize, overflow: Overflow) -> Self {
        Self {
            capacity: capacity.max(1),
            overflow,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue `item`. Returns false if the queue was closed and the item
    /// discarded.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.lock();
        if state.items.len() >= self.capacity {
            match self.overflow {
                Overflow::DropOldest => {
                    state.items.pop_front();
                    state.dropped += 1;
                    log::debug!("detection queue full; dropped oldest batch");
                }
                Overflow::Block => {
                    while state.items.len() >= self.capacity && !state.closed {
                        state = self
                            .not_full
                            .wait(state)
                            .unwrap_or_else(|e| e.into_inner());
                    }
                }
            }
        }
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Take the oldest pending item, waiting up to `wait`.
    pub fn pop_timeout(&self, wait: Duration) -> Pop<T> {
        let mut state = self.lock();
        if state.items.is_empty() && !state.closed {
            state = self
                .not_empty
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        match state.items.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Pop::Item(item)
            }
            None if state.closed => Pop::Closed,
            None => Pop::Empty,
        }
    }

    /// No further items will be accepted; blocked producers are released.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
