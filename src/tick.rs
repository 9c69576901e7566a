/*! The heartbeat thread.

One thread drains the timer wheel's elapsed list and every registered
[`TickListener`], giving every protocol callback — timer expiry, inbound
primitive delivery — a single serialized execution context. Modules
register themselves once at startup and are polled every heartbeat for
the rest of the process lifetime; there is no per-call registration.
*/

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::timer::{TimerKind, TimerWheel};

/// Something the tick thread polls once per heartbeat.
pub trait TickListener: Send + Sync {
    /// Run one unit of work. Called from the tick thread; must not
    /// block for long, since it holds up every other listener and timer
    /// delivery on the same heartbeat.
    fn tick(&self);
}

/// A listener reached by session id, used to deliver an elapsed timer to
/// the session that owns it without the wheel knowing about sessions.
pub trait TimerSink: Send + Sync {
    /// Deliver an elapsed timer of the given kind for `session_id`.
    fn on_timer(&self, session_id: u64, kind: TimerKind);
}

struct Inner {
    listeners: Vec<Arc<dyn TickListener>>,
    timer_sinks: Vec<Arc<dyn TimerSink>>,
}

/// Drives the timer wheel and every registered listener on a fixed
/// period.
pub struct TickDispatcher {
    wheel: Arc<TimerWheel>,
    period: Duration,
    inner: Mutex<Inner>,
}

impl TickDispatcher {
    /// Create a dispatcher over `wheel`, firing every `period`.
    pub fn new(wheel: Arc<TimerWheel>, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            wheel,
            period,
            inner: Mutex::new(Inner {
                listeners: Vec::new(),
                timer_sinks: Vec::new(),
            }),
        })
    }

    /// The configured heartbeat period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// The timer wheel this dispatcher advances. Anything creating
    /// timers that should fire through this dispatcher's
    /// [`TimerSink`]s must create them on this wheel.
    pub fn timer_wheel(&self) -> Arc<TimerWheel> {
        self.wheel.clone()
    }

    /// Register a tick listener. Listeners are polled in registration
    /// order every heartbeat until the process exits; there is no
    /// matching unregister, mirroring the original engine's
    /// register-for-life module lifetime.
    pub fn register_listener(&self, listener: Arc<dyn TickListener>) {
        self.inner.lock().unwrap().listeners.push(listener);
    }

    /// Register a sink that receives elapsed timers.
    pub fn register_timer_sink(&self, sink: Arc<dyn TimerSink>) {
        self.inner.lock().unwrap().timer_sinks.push(sink);
    }

    /// Run exactly one heartbeat: advance the wheel by one jiffy, drain
    /// every elapsed timer to the registered sinks, then poll every
    /// listener. Exposed directly so tests can drive the dispatcher
    /// without a real thread and sleeps.
    pub fn fire(&self) {
        self.wheel.advance(1);
        let inner = self.inner.lock().unwrap();
        while let Some((session_id, kind)) = self.wheel.pop_elapsed() {
            for sink in &inner.timer_sinks {
                sink.on_timer(session_id, kind);
            }
        }
        for listener in &inner.listeners {
            listener.tick();
        }
    }

    /// Spawn the heartbeat thread. Runs until the process exits; there
    /// is no graceful shutdown path, matching the original engine's
    /// single long-lived tick thread.
    pub fn spawn(self: Arc<Self>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            loop {
                self.fire();
                std::thread::sleep(self.period);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(AtomicUsize);
    impl TickListener for CountingListener {
        fn tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RecordingSink(Mutex<Vec<(u64, TimerKind)>>);
    impl TimerSink for RecordingSink {
        fn on_timer(&self, session_id: u64, kind: TimerKind) {
            self.0.lock().unwrap().push((session_id, kind));
        }
    }

    #[test]
    fn fire_polls_every_listener() {
        let wheel = Arc::new(TimerWheel::new());
        let dispatcher = TickDispatcher::new(wheel, Duration::from_millis(10));
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        dispatcher.register_listener(listener.clone());

        dispatcher.fire();
        dispatcher.fire();
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fire_delivers_elapsed_timers_to_sinks() {
        let wheel = Arc::new(TimerWheel::new());
        let dispatcher = TickDispatcher::new(wheel.clone(), Duration::from_millis(10));
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        dispatcher.register_timer_sink(sink.clone());

        let id = wheel.create(42, TimerKind::T1, 2);
        wheel.start(id);
        dispatcher.fire();
        assert!(sink.0.lock().unwrap().is_empty());
        dispatcher.fire();
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[(42, TimerKind::T1)]);
    }
}
