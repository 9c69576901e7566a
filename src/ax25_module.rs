/*! The AX.25 module: binds primitives, DLSAP, timers, and sessions.

This is the one loadable unit the rest of this crate exists to support:
it owns a pool of [`Session`]s, routes inbound/outbound primitives to
the right one by handle, drives the timer wheel, and exposes itself as
a [`DlsEndpoint`] so other modules (a terminal, a routing layer) can
talk to it without depending on its internals.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::callsign::Address;
use crate::dlsap::{DlsEndpoint, QueueStats};
use crate::error::{Error, Result};
use crate::frame::{Frame, Modulo};
use crate::monitor::Monitor;
use crate::primbuffer::PrimBuffer;
use crate::primitive::{DlCmd, Primitive, Protocol};
use crate::session::{Action, DisconnectReason, Session, SessionState};
use crate::tick::{TickListener, TimerSink};
use crate::timer::{TimerKind, TimerWheel};
use crate::transport::Transport;

struct SessionEntry {
    session: Session,
    client_handle: u16,
    server_handle: u16,
    t1: crate::timer::TimerId,
    t3: crate::timer::TimerId,
    t4: crate::timer::TimerId,
}

struct State {
    sessions: HashMap<u64, SessionEntry>,
    next_session_id: u64,
    by_handle: HashMap<u16, u64>,
}

/// The running AX.25 module instance: one per configured interface.
pub struct Ax25Module {
    name: String,
    state: Mutex<State>,
    rx: Arc<PrimBuffer>,
    tx: Arc<PrimBuffer>,
    wheel: Arc<TimerWheel>,
    transport: Arc<dyn Transport>,
    monitor: Arc<Monitor>,
    local_addr: Address,
    peer: Mutex<Option<Arc<dyn DlsEndpoint>>>,
}

impl Ax25Module {
    /// Build a new module instance bound to a transport and local
    /// callsign, with empty RX/TX primitive queues. `wheel` must be the
    /// same timer wheel driven by the [`crate::tick::TickDispatcher`]
    /// this module is registered with as a
    /// [`crate::tick::TimerSink`], since the dispatcher only delivers
    /// timers elapsed on its own wheel.
    pub fn new(
        name: &str,
        local_addr: Address,
        transport: Arc<dyn Transport>,
        monitor: Arc<Monitor>,
        wheel: Arc<TimerWheel>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(State {
                sessions: HashMap::new(),
                next_session_id: 1,
                by_handle: HashMap::new(),
            }),
            rx: PrimBuffer::new(queue_capacity),
            tx: PrimBuffer::new(queue_capacity),
            wheel,
            transport,
            monitor,
            local_addr,
            peer: Mutex::new(None),
        })
    }

    /// The module's RX primitive queue, fed by the transport's receive
    /// loop after frame assembly.
    pub fn rx_queue(&self) -> Arc<PrimBuffer> {
        self.rx.clone()
    }

    /// The module's TX primitive queue, consumed by a thread that
    /// serializes frames back onto the transport.
    pub fn tx_queue(&self) -> Arc<PrimBuffer> {
        self.tx.clone()
    }

    /// The module's private timer wheel.
    pub fn timer_wheel(&self) -> Arc<TimerWheel> {
        self.wheel.clone()
    }

    fn new_session(&self, remote_addr: Address, modulo: Modulo) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_session_id;
        state.next_session_id += 1;
        let session = Session::new(self.local_addr.clone(), remote_addr, modulo);
        let t1 = self.wheel.create(id, TimerKind::T1, session.timing.initial_t1);
        let t3 = self.wheel.create(id, TimerKind::T3, session.timing.t3);
        let t4 = self.wheel.create(id, TimerKind::T4, session.timing.t4);
        state.sessions.insert(
            id,
            SessionEntry {
                session,
                client_handle: id as u16,
                server_handle: id as u16,
                t1,
                t3,
                t4,
            },
        );
        state.by_handle.insert(id as u16, id);
        id
    }

    fn carry_out(&self, session_id: u64, actions: Vec<Action>) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.sessions.get_mut(&session_id) else {
            return;
        };
        for action in actions {
            match action {
                Action::Transmit(frame) => {
                    let modulo = entry.session.modulo;
                    let bytes = frame.encode(modulo);
                    if let Ok(prim) = Primitive::new(Protocol::Ax25, 0, 0, 0, bytes.clone()) {
                        self.monitor.put(&prim, &self.name, true);
                    }
                    let _ = self.transport.send(&bytes);
                }
                Action::DeliverData(data) => {
                    if let Ok(prim) = Primitive::from_params(
                        Protocol::Dl,
                        DlCmd::DataIndication as u8,
                        entry.client_handle,
                        entry.server_handle,
                        &[&data],
                    ) {
                        let peer = self.peer.lock().unwrap().clone();
                        if let Some(peer) = peer {
                            let _ = peer.on_write(prim, false);
                        }
                    }
                }
                Action::NotifyConnect => self.notify_dlsap(entry, DlCmd::ConnectConfirm, None),
                Action::NotifyDisconnect(reason) => {
                    self.notify_dlsap(entry, DlCmd::DisconnectIndication, Some(reason));
                }
                Action::ArmT1 => self.wheel.start(entry.t1),
                Action::ArmT1With(timeout) => self.wheel.start_with_duration(entry.t1, timeout),
                Action::StopT1 => self.wheel.stop(entry.t1),
                Action::ArmT3 => self.wheel.start(entry.t3),
                Action::StopT3 => self.wheel.stop(entry.t3),
                Action::ArmT4 => self.wheel.start(entry.t4),
                Action::StopT4 => self.wheel.stop(entry.t4),
            }
        }
    }

    fn notify_dlsap(&self, entry: &SessionEntry, cmd: DlCmd, reason: Option<DisconnectReason>) {
        let reason_byte = reason.map(|r| match r {
            DisconnectReason::Normal => 0u8,
            DisconnectReason::Timeout => 1,
            DisconnectReason::FrameReject => 2,
            DisconnectReason::LinkReset => 3,
        });
        let params: Vec<&[u8]> = match &reason_byte {
            Some(b) => vec![std::slice::from_ref(b)],
            None => vec![],
        };
        if let Ok(prim) = Primitive::from_params(
            Protocol::Dl,
            cmd as u8,
            entry.client_handle,
            entry.server_handle,
            &params,
        ) {
            let peer = self.peer.lock().unwrap().clone();
            if let Some(peer) = peer {
                let _ = peer.on_write(prim, true);
            }
        }
    }

    /// Process one inbound AX.25 frame from the transport, routing it
    /// to the matching session (creating one if this is a fresh
    /// inbound SABM).
    pub fn handle_inbound_frame(&self, bytes: &[u8], modulo: Modulo) -> Result<()> {
        let frame = Frame::decode(bytes, modulo)?;
        if let Ok(prim) = Primitive::new(Protocol::Ax25, 0, 0, 0, bytes.to_vec()) {
            self.monitor.put(&prim, &self.name, false);
        }
        let session_id = {
            let mut state = self.state.lock().unwrap();
            let existing = state
                .sessions
                .iter()
                .find(|(_, e)| e.session.remote_addr == frame.source)
                .map(|(id, _)| *id);
            match existing {
                Some(id) => id,
                None => {
                    drop(state);
                    let id = self.new_session(frame.source.clone(), modulo);
                    state = self.state.lock().unwrap();
                    let _ = &mut state;
                    id
                }
            }
        };
        let actions = {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| Error::NotFound("session".into()))?;
            entry.session.on_receive(&frame, self.wheel.now())
        };
        self.carry_out(session_id, actions);
        Ok(())
    }

    /// Dispatch one elapsed timer for `session_id`.
    pub fn handle_timer(&self, session_id: u64, kind: TimerKind) {
        let actions = {
            let mut state = self.state.lock().unwrap();
            let Some(entry) = state.sessions.get_mut(&session_id) else {
                return;
            };
            match kind {
                TimerKind::T1 => entry.session.on_t1_timeout(),
                TimerKind::T3 => entry.session.on_t3_timeout(),
                TimerKind::T4 => entry.session.on_t4_timeout(),
            }
        };
        self.carry_out(session_id, actions);
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.sessions.get(&session_id)
            && entry.session.state == SessionState::Disconnected
        {
            let entry = state.sessions.remove(&session_id).unwrap();
            state.by_handle.remove(&entry.client_handle);
            self.wheel.destroy(entry.t1);
            self.wheel.destroy(entry.t3);
            self.wheel.destroy(entry.t4);
        }
    }

    /// Drain at most one RX primitive and one TX primitive, per the
    /// strict cooperative-scheduling contract: an inbound frame
    /// primitive is decoded and routed to its session; an outbound
    /// data primitive is routed by server handle to its session's
    /// `send_data`.
    pub fn drain_one_round(&self, modulo: Modulo) {
        if let Some((prim, _)) = self.rx.read_nonblock() {
            let _ = self.handle_inbound_frame(prim.payload(), modulo);
        }
        if let Some((prim, _)) = self.tx.read_nonblock() {
            let session_id = {
                let state = self.state.lock().unwrap();
                state.by_handle.get(&prim.server_handle).copied()
            };
            if let Some(session_id) = session_id {
                let actions = {
                    let mut state = self.state.lock().unwrap();
                    if let Some(entry) = state.sessions.get_mut(&session_id) {
                        entry.session.send_data(prim.payload().to_vec())
                    } else {
                        vec![]
                    }
                };
                self.carry_out(session_id, actions);
            }
        }
    }
}

impl DlsEndpoint for Ax25Module {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, back: Option<Arc<dyn DlsEndpoint>>) -> Result<()> {
        *self.peer.lock().unwrap() = back;
        Ok(())
    }

    fn close(&self) {
        *self.peer.lock().unwrap() = None;
    }

    fn on_write(&self, prim: Arc<Primitive>, expedited: bool) -> Result<()> {
        if !self.tx.write_nonblock(prim, expedited) {
            return Err(Error::NotEnoughSpace { need: 1, have: 0 });
        }
        Ok(())
    }

    fn get_queue_stats(&self) -> Result<QueueStats> {
        let tx = self.tx.stats();
        let rx = self.rx.stats();
        Ok(QueueStats {
            tx_queue_len: tx.used,
            rx_queue_len: rx.used,
        })
    }
}

impl TimerSink for Ax25Module {
    fn on_timer(&self, session_id: u64, kind: TimerKind) {
        self.handle_timer(session_id, kind);
    }
}

impl TickListener for Ax25Module {
    fn tick(&self) {
        self.drain_one_round(Modulo::Mod8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    #[test]
    fn inbound_sabm_creates_a_session_and_replies_ua() {
        let (transport, peer_transport) = LoopbackTransport::pair();
        let local = Address::new("N0CALL", 0, false).unwrap();
        let remote = Address::new("KI5ABC", 0, false).unwrap();
        let module = Ax25Module::new(
            "radio0",
            local.clone(),
            transport,
            Arc::new(Monitor::new()),
            Arc::new(crate::timer::TimerWheel::new()),
            16,
        );

        let mut remote_session = Session::new(remote.clone(), local.clone(), Modulo::Mod8);
        let connect = remote_session.connect_request();
        let crate::session::Action::Transmit(sabm) = &connect[0] else {
            panic!()
        };
        module
            .handle_inbound_frame(&sabm.encode(Modulo::Mod8), Modulo::Mod8)
            .unwrap();

        let reply = peer_transport.recv().expect("UA reply expected");
        let frame = Frame::decode(&reply, Modulo::Mod8).unwrap();
        assert!(matches!(
            frame.control,
            crate::frame::Control::Unnumbered {
                kind: crate::frame::UnnumberedKind::Ua,
                ..
            }
        ));
    }
}
