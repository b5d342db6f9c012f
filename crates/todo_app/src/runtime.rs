use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use todo_domain::notifications::{TimerCallback, TimerHandle, TimerHost};

#[derive(Default)]
struct LoopState {
    next_id: u64,
    queue: BTreeMap<(Instant, u64), TimerCallback>,
    deadlines: HashMap<u64, Instant>,
}

/// Timer host for a single-threaded loop: callbacks run only from [`EventLoop::run_due`].
#[derive(Default)]
pub struct EventLoop {
    state: Mutex<LoopState>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// How long the loop may block before a timer is due, capped at `cap`.
    pub fn time_until_next(&self, cap: Duration) -> Duration {
        match self.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(cap),
            None => cap,
        }
    }

    /// Runs every callback whose deadline has passed. Callbacks may install new timers.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = Instant::now();
            let callback = {
                let mut state = self.state.lock();
                let Some(entry) = state.queue.first_entry() else {
                    break;
                };
                if entry.key().0 > now {
                    break;
                }
                let ((_, id), callback) = entry.remove_entry();
                state.deadlines.remove(&id);
                callback
            };
            callback();
            ran += 1;
        }
        ran
    }
}

impl TimerHost for EventLoop {
    fn set_timer(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or(now + Duration::from_secs(86_400 * 365));
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.queue.insert((deadline, id), callback);
        state.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    fn clear_timer(&self, handle: TimerHandle) {
        let mut state = self.state.lock();
        if let Some(deadline) = state.deadlines.remove(&handle.0) {
            state.queue.remove(&(deadline, handle.0));
        }
    }
}
