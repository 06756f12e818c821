use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::JobStatus;
use crate::sync_ext::{CondvarExt, MutexExt};

/// §4.8: state transition event. Never dropped, regardless of subscriber
/// speed.
#[derive(Debug, Clone)]
pub struct JobStateChanged {
    pub job_id: Uuid,
    pub old: JobStatus,
    pub new: JobStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Load,
    Asr,
    Align,
    Diarize,
    Merge,
}

/// §4.8: progress tick. May be dropped (oldest-first) if a subscriber falls
/// behind.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub phase: Phase,
    pub fraction: f64,
    pub message: Option<String>,
}

/// §4.8: one line of subprocess output. Same drop policy as `JobProgress`.
#[derive(Debug, Clone)]
pub struct JobLogLine {
    pub job_id: Uuid,
    pub line: String,
}

/// Bounded, drop-oldest-when-full queue backing the lossy channels
/// (`progress`/`log`). `state` events use `Unbounded` instead so they are
/// never lost.
enum Capacity {
    Unbounded,
    Bounded(usize),
}

struct LossyQueue<T> {
    items: Mutex<VecDeque<T>>,
    cv: std::sync::Condvar,
    capacity: Capacity,
}

impl<T> LossyQueue<T> {
    fn new(capacity: Capacity) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            cv: std::sync::Condvar::new(),
            capacity,
        }
    }

    fn push(&self, item: T) {
        let mut items = self.items.lock_unpoisoned();
        if let Capacity::Bounded(max) = self.capacity {
            while items.len() >= max {
                items.pop_front();
            }
        }
        items.push_back(item);
        self.cv.notify_one();
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let mut items = self.items.lock_unpoisoned();
        if items.is_empty() {
            let (guard, _) = self.cv.wait_timeout_unpoisoned(items, timeout);
            items = guard;
        }
        items.pop_front()
    }

    fn try_recv(&self) -> Option<T> {
        self.items.lock_unpoisoned().pop_front()
    }
}

/// One subscriber's view of the bus: a handle an SSE bridge (or a test)
/// polls for events belonging to every job, in the order they occurred
/// per-job (§4.8's ordering guarantee; no cross-job guarantee).
pub struct Subscription {
    state: LossyQueue<JobStateChanged>,
    progress: LossyQueue<JobProgress>,
    log: LossyQueue<JobLogLine>,
}

impl Subscription {
    fn new(progress_capacity: usize, log_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: LossyQueue::new(Capacity::Unbounded),
            progress: LossyQueue::new(Capacity::Bounded(progress_capacity)),
            log: LossyQueue::new(Capacity::Bounded(log_capacity)),
        })
    }

    pub fn recv_state_timeout(&self, timeout: Duration) -> Option<JobStateChanged> {
        self.state.recv_timeout(timeout)
    }

    pub fn try_recv_progress(&self) -> Option<JobProgress> {
        self.progress.try_recv()
    }

    pub fn try_recv_log(&self) -> Option<JobLogLine> {
        self.log.try_recv()
    }
}

const DEFAULT_PROGRESS_CAPACITY: usize = 256;
const DEFAULT_LOG_CAPACITY: usize = 1024;

/// In-process publish/subscribe fan-out (§4.8). Publishers never block on
/// subscribers: each publish is a mutex-guarded push onto a per-subscriber
/// queue, never a wait on the subscriber to drain it.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<Subscription>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Arc<Subscription> {
        let sub = Subscription::new(DEFAULT_PROGRESS_CAPACITY, DEFAULT_LOG_CAPACITY);
        self.subscribers.lock_unpoisoned().push(sub.clone());
        sub
    }

    pub fn publish_state_changed(&self, event: JobStateChanged) {
        for sub in self.subscribers.lock_unpoisoned().iter() {
            sub.state.push(event.clone());
        }
    }

    pub fn publish_progress(&self, event: JobProgress) {
        for sub in self.subscribers.lock_unpoisoned().iter() {
            sub.progress.push(event.clone());
        }
    }

    pub fn publish_log_line(&self, event: JobLogLine) {
        for sub in self.subscribers.lock_unpoisoned().iter() {
            sub.log.push(event.clone());
        }
    }
}
