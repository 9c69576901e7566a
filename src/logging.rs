/*! Ring-buffered asynchronous logging sink.

Implements [`log::Log`] directly instead of depending on a pre-built
backend: every call formats into a string and pushes it onto a bounded
queue, returning immediately even if the queue is full (the entry is
dropped and counted). A single drain thread owns the only writer to
stderr, decoupling slow terminal I/O from hot call sites the way the
ring buffer in [`crate::ringbuffer`] decouples a byte source from its
tick-driven consumer.
*/

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, OnceLock};

use log::{Level, LevelFilter, Log, Metadata, Record};

struct Entry {
    line: String,
}

fn level_tag(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'D',
    }
}

/// An async logger backed by a bounded channel and a drain thread.
pub struct AsyncLogger {
    tx: Mutex<SyncSender<Entry>>,
    lost: Arc<std::sync::atomic::AtomicU64>,
}

impl Log for AsyncLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {}: {}",
            level_tag(record.level()),
            record.target(),
            record.args()
        );
        let tx = self.tx.lock().unwrap();
        match tx.try_send(Entry { line }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.lost.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn flush(&self) {}
}

static LOST: OnceLock<Arc<std::sync::atomic::AtomicU64>> = OnceLock::new();

/// Total log lines dropped so far because the queue was full.
pub fn lost_count() -> u64 {
    LOST.get()
        .map(|l| l.load(std::sync::atomic::Ordering::Relaxed))
        .unwrap_or(0)
}

/// Install the async logger as the global `log` backend and spawn its
/// drain thread. `level` is the initial filter; `capacity` bounds the
/// queue depth before entries are dropped (and counted via
/// [`lost_count`]).
pub fn init(level: LevelFilter, capacity: usize) -> Result<(), log::SetLoggerError> {
    let (tx, rx): (SyncSender<Entry>, Receiver<Entry>) = mpsc::sync_channel(capacity);
    let lost = Arc::new(std::sync::atomic::AtomicU64::new(0));
    LOST.set(lost.clone()).ok();

    let logger = Box::new(AsyncLogger {
        tx: Mutex::new(tx),
        lost: lost.clone(),
    });
    let logger: &'static AsyncLogger = Box::leak(logger);

    std::thread::spawn(move || {
        let mut last_reported_lost = 0u64;
        for entry in rx.iter() {
            eprintln!("{}", entry.line);
            let current_lost = lost.load(std::sync::atomic::Ordering::Relaxed);
            if current_lost != last_reported_lost {
                eprintln!("W logging: {current_lost} messages lost to a full queue");
                last_reported_lost = current_lost;
            }
        }
    });

    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_tags_are_single_letters() {
        assert_eq!(level_tag(Level::Error), 'E');
        assert_eq!(level_tag(Level::Warn), 'W');
        assert_eq!(level_tag(Level::Info), 'I');
        assert_eq!(level_tag(Level::Debug), 'D');
    }
}
