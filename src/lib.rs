#![warn(missing_docs)]
/*! A user-space AX.25 v2.2 packet-radio link layer.

This crate provides the pieces a packet-radio node needs above the
physical layer: reference-counted message primitives crossing a DLSAP
boundary, a per-connection LAPB state machine with mod-8/mod-128
windowing and retransmission, the AX.25 frame and callsign codecs, and
the small amount of concurrency infrastructure (ring buffers, a timer
wheel, a single tick dispatcher) that lets all of it run without a
lock held across a callback.

# Architecture overview

```text
[ Transport (KISS/UDP) ]
         ↓  bytes
[ Frame codec ]            (frame.rs, callsign.rs)
         ↓  Frame
[ LAPB session per peer ]  (session.rs)
         ↓  Action
[ ax25_module glue ]       (ax25_module.rs)
         ↓  Primitive
[ DLSAP registry ]         (dlsap.rs)
         ↓
[ client (terminal, routing, ...) ]
```

A single tick thread ([`tick::TickDispatcher`]) drains each module's RX
and TX primitive queues and the shared timer wheel, so no two callbacks
for the same session ever run concurrently — the state machine in
[`session`] can stay free of its own internal locking.

# Modules

- [`error`] — the crate-wide error enum.
- [`primitive`] — reference-counted DLSAP messages.
- [`ringbuffer`] — SPSC byte ring buffer.
- [`primbuffer`] — dual-priority primitive FIFO.
- [`dlsap`] — the process-wide endpoint registry.
- [`timer`] / [`tick`] — the timer wheel and heartbeat dispatcher.
- [`callsign`] / [`frame`] — wire-format codecs.
- [`session`] — the LAPB state machine.
- [`ax25_module`] — binds the above into one runnable module.
- [`monitor`] — human-readable frame tracing.
- [`config`] / [`plugin`] — XML configuration and the plugin/instance
  lifecycle.
- [`transport`] — KISS framing and the loopback/UDP transports.
- [`logging`] — the async logging sink.
*/

pub mod ax25_module;
pub mod callsign;
pub mod config;
pub mod dlsap;
pub mod error;
pub mod frame;
pub mod logging;
pub mod monitor;
pub mod plugin;
pub mod primbuffer;
pub mod primitive;
pub mod ringbuffer;
pub mod session;
pub mod tick;
pub mod timer;
pub mod transport;

pub use error::{Error, Result};
