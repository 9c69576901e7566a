/*! Jiffy-based one-shot timer wheel.

Expiry only moves a timer onto a global elapsed list; actual callback
invocation is deferred to the tick loop so that every timer callback runs
on the single tick thread, serialized with all other per-session protocol
work. This is the key simplification that keeps session state out of
reach of concurrent timer firings.

The C engine modeled this as a timer struct embedded in each session with
a back-pointer, and a global elapsed list holding raw pointers. Here the
wheel owns all timer state keyed by an opaque [`TimerId`], and the
elapsed list holds only `(TimerId, session_id, TimerKind)` tuples — the
session itself is looked up by the tick loop, never reached into from
inside the wheel.
*/

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic jiffy count.
pub type Jiffies = u64;

/// Lifecycle state of a single timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Not running.
    Idle,
    /// Armed, counting down to `deadline`.
    Pending,
    /// Deadline reached; queued for the tick loop to invoke its callback.
    Elapsed,
    /// Paused; `remaining` holds the jiffies left when suspended.
    Suspended,
    /// Torn down. No further transitions are permitted.
    Destroyed,
}

/// Which session-level timer this is. Matches the three timers carried by
/// a LAPB [`crate::session::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Retransmission timer.
    T1,
    /// Keep-alive (idle link) timer.
    T3,
    /// Link redundancy / teardown timer.
    T4,
}

/// Opaque handle to a timer owned by a [`TimerWheel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Entry {
    state: TimerState,
    duration: Jiffies,
    deadline: Jiffies,
    remaining: Jiffies,
    session_id: u64,
    kind: TimerKind,
}

/// Owns every timer in the process and the global elapsed list.
pub struct TimerWheel {
    now: AtomicU64,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
    elapsed: Mutex<VecDeque<TimerId>>,
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerWheel {
    /// Create a new, empty timer wheel with jiffies starting at zero.
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            elapsed: Mutex::new(VecDeque::new()),
        }
    }

    /// Current jiffy count.
    pub fn now(&self) -> Jiffies {
        self.now.load(Ordering::SeqCst)
    }

    /// Advance the wheel by `by` jiffies, moving any timer whose deadline
    /// has been reached from `Pending` to `Elapsed` and onto the global
    /// elapsed list. Called once per heartbeat by the tick dispatcher.
    pub fn advance(&self, by: Jiffies) {
        let now = self.now.fetch_add(by, Ordering::SeqCst) + by;
        let mut entries = self.entries.lock().unwrap();
        let mut elapsed = self.elapsed.lock().unwrap();
        for (&id, e) in entries.iter_mut() {
            if e.state == TimerState::Pending && e.deadline <= now {
                e.state = TimerState::Elapsed;
                elapsed.push_back(TimerId(id));
            }
        }
    }

    /// Create an idle timer for `session_id` of the given kind and
    /// duration, in jiffies.
    pub fn create(&self, session_id: u64, kind: TimerKind, duration: Jiffies) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(
            id,
            Entry {
                state: TimerState::Idle,
                duration,
                deadline: 0,
                remaining: 0,
                session_id,
                kind,
            },
        );
        TimerId(id)
    }

    /// Arm the timer: deadline becomes `now + duration`, state becomes
    /// `Pending`. Valid from any state except `Destroyed`.
    pub fn start(&self, id: TimerId) {
        let now = self.now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&id.0)
            && e.state != TimerState::Destroyed
        {
            e.deadline = now + e.duration;
            e.state = TimerState::Pending;
        }
    }

    /// Re-arm with a new duration, overriding the one set at creation
    /// (used for T1's backoff policy).
    pub fn start_with_duration(&self, id: TimerId, duration: Jiffies) {
        let now = self.now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&id.0)
            && e.state != TimerState::Destroyed
        {
            e.duration = duration;
            e.deadline = now + duration;
            e.state = TimerState::Pending;
        }
    }

    /// Cancel the timer, returning it to `Idle`.
    pub fn stop(&self, id: TimerId) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&id.0)
            && e.state != TimerState::Destroyed
        {
            e.state = TimerState::Idle;
        }
        drop(entries);
        self.elapsed.lock().unwrap().retain(|&t| t != id);
    }

    /// Pause the timer, capturing the jiffies remaining until its
    /// deadline.
    pub fn suspend(&self, id: TimerId) {
        let now = self.now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&id.0)
            && e.state == TimerState::Pending
        {
            e.remaining = e.deadline.saturating_sub(now);
            e.state = TimerState::Suspended;
        }
    }

    /// Resume a suspended timer, re-arming it with the captured
    /// remaining time.
    pub fn resume(&self, id: TimerId) {
        let now = self.now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&id.0)
            && e.state == TimerState::Suspended
        {
            e.deadline = now + e.remaining;
            e.state = TimerState::Pending;
        }
    }

    /// Tear the timer down permanently. All further operations on this
    /// id are no-ops.
    pub fn destroy(&self, id: TimerId) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&id.0) {
            e.state = TimerState::Destroyed;
        }
        drop(entries);
        self.elapsed.lock().unwrap().retain(|&t| t != id);
    }

    /// Current state of a timer.
    pub fn state(&self, id: TimerId) -> Option<TimerState> {
        self.entries.lock().unwrap().get(&id.0).map(|e| e.state)
    }

    /// Pop one elapsed timer for the tick loop to invoke, transitioning
    /// it back to `Idle` (the callback having now effectively run).
    /// Returns `(session_id, kind)` so the caller can route to the right
    /// session without the wheel knowing about sessions at all.
    pub fn pop_elapsed(&self) -> Option<(u64, TimerKind)> {
        let id = self.elapsed.lock().unwrap().pop_front()?;
        let mut entries = self.entries.lock().unwrap();
        let e = entries.get_mut(&id.0)?;
        if e.state != TimerState::Elapsed {
            return None;
        }
        e.state = TimerState::Idle;
        Some((e.session_id, e.kind))
    }
}
