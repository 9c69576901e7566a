/*! Single-producer/single-consumer byte ring buffer.

Decouples a synchronous byte source (a serial port, a UDP socket) from the
AX.25 module's tick-driven consumer. The original engine split the state
across a spinlock-guarded `(used, tail, lost)` triple plus separate
read/write mutexes and condition variables; here a single [`Mutex`] guards
all of it and two [`Condvar`]s signal "space freed" and "data available" —
the same externally observable semantics with one lock instead of three,
which is the idiomatic collapse for a buffer that's never actually
accessed from more than one reader and one writer at a time.
*/

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

struct State {
    buf: VecDeque<u8>,
    capacity: usize,
    lost: usize,
    closed: bool,
}

/// A bounded byte ring buffer shared between a producer and a consumer
/// thread.
pub struct RingBuffer {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RingBuffer {
    /// Create a new ring buffer of the given capacity, in bytes.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                buf: VecDeque::with_capacity(capacity),
                capacity,
                lost: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    /// Total capacity of the ring buffer.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().capacity
    }

    /// Bytes currently held in the ring buffer.
    pub fn used(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    /// Free space currently available in the ring buffer.
    pub fn free(&self) -> usize {
        let s = self.state.lock().unwrap();
        s.capacity - s.buf.len()
    }

    /// Total bytes ever explicitly declared dropped via [`Self::loose`].
    pub fn lost(&self) -> usize {
        self.state.lock().unwrap().lost
    }

    /// Declare `n` bytes lost without copying them. Used by a producer
    /// that chose to drop data rather than block.
    pub fn loose(&self, n: usize) -> usize {
        let mut s = self.state.lock().unwrap();
        s.lost += n;
        s.lost
    }

    /// Wake up any blocked reader/writer so they can observe `closed` and
    /// return promptly. Mirrors the `alive` flag poll at every blocking
    /// wait (§5).
    pub fn close(&self) {
        let mut s = self.state.lock().unwrap();
        s.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Write up to `bytes.len()` bytes, blocking until all of them are
    /// delivered or the buffer is closed. Returns the number of bytes
    /// actually delivered (less than requested only if closed mid-write).
    pub fn write_block(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.len() > self.size() {
            return Err(Error::TooBig(bytes.len()));
        }
        let mut s = self.state.lock().unwrap();
        let mut written = 0;
        while written < bytes.len() {
            if s.closed {
                break;
            }
            let space = s.capacity - s.buf.len();
            if space == 0 {
                s = self.not_full.wait(s).unwrap();
                continue;
            }
            let n = space.min(bytes.len() - written);
            s.buf.extend(&bytes[written..written + n]);
            written += n;
            self.not_empty.notify_all();
        }
        Ok(written)
    }

    /// All-or-nothing non-blocking write.
    pub fn write_nonblock(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.len() > self.size() {
            return Err(Error::TooBig(bytes.len()));
        }
        let mut s = self.state.lock().unwrap();
        let space = s.capacity - s.buf.len();
        if bytes.len() > space {
            return Err(Error::NotEnoughSpace {
                need: bytes.len(),
                have: space,
            });
        }
        s.buf.extend(bytes);
        self.not_empty.notify_all();
        Ok(bytes.len())
    }

    /// Read up to `max` bytes, blocking until at least one byte is
    /// available or the buffer is closed with nothing left to read. May
    /// return a short read if the buffer empties mid-call.
    pub fn read_block(&self, max: usize) -> Result<Vec<u8>> {
        let mut s = self.state.lock().unwrap();
        loop {
            if !s.buf.is_empty() {
                let n = max.min(s.buf.len());
                let out: Vec<u8> = s.buf.drain(..n).collect();
                self.not_full.notify_all();
                return Ok(out);
            }
            if s.closed {
                return Ok(Vec::new());
            }
            s = self.not_empty.wait(s).unwrap();
        }
    }

    /// Non-blocking read of up to `max` bytes. Fails with
    /// [`Error::WouldBlock`] if fewer than `max` bytes are currently
    /// available.
    pub fn read_nonblock(&self, max: usize) -> Result<Vec<u8>> {
        let mut s = self.state.lock().unwrap();
        if max > s.buf.len() {
            return Err(Error::WouldBlock);
        }
        let out: Vec<u8> = s.buf.drain(..max).collect();
        self.not_full.notify_all();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_scenario() {
        // Scenario from the testable-properties list: size 250, write
        // 50 bytes five times, then read 10/40/60, then non-blocking
        // writes of 100.
        let rb = RingBuffer::new(250);
        let mut all = Vec::new();
        for i in 0..5u8 {
            let chunk = vec![i; 50];
            all.extend_from_slice(&chunk);
            assert_eq!(rb.write_block(&chunk).unwrap(), 50);
        }
        assert_eq!(rb.used(), 250);
        assert_eq!(rb.free(), 0);

        let r1 = rb.read_nonblock(10).unwrap();
        let r2 = rb.read_nonblock(40).unwrap();
        let r3 = rb.read_nonblock(60).unwrap();
        let mut got = Vec::new();
        got.extend(r1);
        got.extend(r2);
        got.extend(r3);
        assert_eq!(got, all[..110]);
        assert_eq!(rb.used(), 140);

        assert_eq!(rb.write_nonblock(&vec![0u8; 100]).unwrap(), 100);
        assert_eq!(rb.used(), 240);

        let err = rb.write_nonblock(&vec![0u8; 100]).unwrap_err();
        assert!(matches!(err, Error::NotEnoughSpace { .. }));
    }

    #[test]
    fn used_plus_free_invariant() {
        let rb = RingBuffer::new(64);
        rb.write_nonblock(&[1, 2, 3, 4]).unwrap();
        assert_eq!(rb.used() + rb.free(), rb.size());
        rb.read_nonblock(2).unwrap();
        assert_eq!(rb.used() + rb.free(), rb.size());
    }

    #[test]
    fn too_big_rejected() {
        let rb = RingBuffer::new(8);
        let err = rb.write_nonblock(&vec![0u8; 9]).unwrap_err();
        assert!(matches!(err, Error::TooBig(9)));
    }

    #[test]
    fn loose_accounts_bytes() {
        let rb = RingBuffer::new(8);
        assert_eq!(rb.loose(5), 5);
        assert_eq!(rb.lost(), 5);
        assert_eq!(rb.loose(3), 8);
    }
}
