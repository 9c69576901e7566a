/*! Physical-layer transport: the boundary between bytes and frames.

A [`Transport`] moves already-framed AX.25 bytes in and out of the
process; KISS escaping/deframing happens here, same layering as the
teacher's `KissEncode`/`KissDecode` blocks, adapted from a streaming
block pair into a synchronous encode/decode function pair since a
`Transport` is driven by its own RX/TX threads rather than a pull-based
graph.
*/

use std::io::Write;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::ringbuffer::RingBuffer;

const KISS_FEND: u8 = 0xC0;
const KISS_FESC: u8 = 0xDB;
const KISS_TFEND: u8 = 0xDC;
const KISS_TFESC: u8 = 0xDD;
/// KISS command nibble for a data frame on port 0.
const KISS_CMD_DATA: u8 = 0x00;

/// Escape `frame` into a complete KISS datagram: `FEND cmd <escaped
/// payload> FEND`.
pub fn kiss_encode(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 16);
    out.push(KISS_FEND);
    out.push(KISS_CMD_DATA);
    for &b in frame {
        match b {
            KISS_FEND => out.extend([KISS_FESC, KISS_TFEND]),
            KISS_FESC => out.extend([KISS_FESC, KISS_TFESC]),
            b => out.push(b),
        }
    }
    out.push(KISS_FEND);
    out
}

/// Incrementally decodes a byte stream into complete KISS frames.
#[derive(Default)]
pub struct KissDecoder {
    buf: Vec<u8>,
    in_frame: bool,
    escaping: bool,
}

impl KissDecoder {
    /// Feed bytes read off the wire, returning every complete frame
    /// (command byte stripped) decoded so far.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &b in bytes {
            match b {
                KISS_FEND => {
                    if self.in_frame && !self.buf.is_empty() {
                        let mut frame = std::mem::take(&mut self.buf);
                        if !frame.is_empty() {
                            frame.remove(0); // strip the command byte.
                            frames.push(frame);
                        }
                    }
                    self.buf.clear();
                    self.in_frame = true;
                    self.escaping = false;
                }
                KISS_FESC if self.in_frame => self.escaping = true,
                KISS_TFEND if self.in_frame && self.escaping => {
                    self.buf.push(KISS_FEND);
                    self.escaping = false;
                }
                KISS_TFESC if self.in_frame && self.escaping => {
                    self.buf.push(KISS_FESC);
                    self.escaping = false;
                }
                b if self.in_frame => {
                    self.buf.push(b);
                    self.escaping = false;
                }
                _ => {}
            }
        }
        frames
    }
}

/// A byte-level physical-layer connection: one already-framed AX.25
/// datagram in, one out.
pub trait Transport: Send + Sync {
    /// Send one AX.25 frame (KISS-encoded internally as needed).
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Receive the next complete frame, blocking until one arrives or
    /// the transport is closed (in which case `None` is returned).
    fn recv(&self) -> Option<Vec<u8>>;

    /// Tear the transport down, unblocking any pending `recv`.
    fn close(&self);
}

/// An in-process transport backed by a pair of ring buffers, for tests
/// and for wiring two sessions together without real I/O.
pub struct LoopbackTransport {
    outbound: Arc<Mutex<std::collections::VecDeque<Vec<u8>>>>,
    inbound: Arc<Mutex<std::collections::VecDeque<Vec<u8>>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl LoopbackTransport {
    /// Build a connected pair: frames sent on one arrive via `recv` on
    /// the other.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a_to_b = Arc::new(Mutex::new(std::collections::VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(std::collections::VecDeque::new()));
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let a = Arc::new(Self {
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
            closed: closed.clone(),
        });
        let b = Arc::new(Self {
            outbound: b_to_a,
            inbound: a_to_b,
            closed,
        });
        (a, b)
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, frame: &[u8]) -> Result<()> {
        self.outbound.lock().unwrap().push_back(frame.to_vec());
        Ok(())
    }

    fn recv(&self) -> Option<Vec<u8>> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return None;
        }
        self.inbound.lock().unwrap().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Tunnels KISS-framed AX.25 over UDP, for testing the stack between
/// two processes without real radio hardware.
pub struct UdpTransport {
    socket: UdpSocket,
    rx: Arc<RingBuffer>,
}

impl UdpTransport {
    /// Bind locally and target `peer` for outbound datagrams.
    pub fn connect(bind: &str, peer: &str) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind)?;
        socket.connect(peer)?;
        let rx = RingBuffer::new(1 << 20);
        let transport = Arc::new(Self { socket, rx });
        Ok(transport)
    }

    /// Run the receive loop on the calling thread: reads datagrams,
    /// KISS-decodes them, and pushes frames into the internal ring
    /// buffer. Intended to be spawned onto its own thread.
    pub fn run_receiver(self: &Arc<Self>) -> Result<()> {
        let mut buf = [0u8; 4096];
        let mut decoder = KissDecoder::default();
        loop {
            let n = self.socket.recv(&mut buf)?;
            if n == 0 {
                continue;
            }
            for frame in decoder.feed(&buf[..n]) {
                let mut encoded = (frame.len() as u32).to_le_bytes().to_vec();
                encoded.extend(frame);
                self.rx.write_block(&encoded)?;
            }
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: &[u8]) -> Result<()> {
        let encoded = kiss_encode(frame);
        let mut w = &self.socket;
        w.write_all(&encoded)?;
        Ok(())
    }

    fn recv(&self) -> Option<Vec<u8>> {
        let len_bytes = self.rx.read_block(4).ok()?;
        if len_bytes.len() < 4 {
            return None;
        }
        let len = u32::from_le_bytes(len_bytes.try_into().ok()?) as usize;
        self.rx.read_block(len).ok()
    }

    fn close(&self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kiss_round_trip_escapes_fend_and_fesc() {
        let frame = vec![0x01, KISS_FEND, 0x02, KISS_FESC, 0x03];
        let encoded = kiss_encode(&frame);
        let mut decoder = KissDecoder::default();
        let mut frames = decoder.feed(&encoded);
        // A single complete datagram between two FENDs with a leading
        // FEND to open the next one; feed the closing FEND explicitly.
        frames.extend(decoder.feed(&[KISS_FEND]));
        assert_eq!(frames[0], frame);
    }

    #[test]
    fn loopback_transport_delivers_across_the_pair() {
        let (a, b) = LoopbackTransport::pair();
        a.send(b"hello").unwrap();
        assert_eq!(b.recv(), Some(b"hello".to_vec()));
        b.send(b"world").unwrap();
        assert_eq!(a.recv(), Some(b"world".to_vec()));
    }

    #[test]
    fn closed_loopback_returns_none() {
        let (a, b) = LoopbackTransport::pair();
        a.close();
        assert_eq!(a.recv(), None);
        let _ = b;
    }
}
