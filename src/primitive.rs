/*! Primitives: the typed messages that flow across a DLSAP.

A primitive is immutable after construction and shared by pointer across
threads. The original C engine reference-counted primitives by hand with
`mem_lock`/`mem_free` and a tail canary checked on the final free; in Rust
that's exactly `Arc::clone`/`drop`, so [`use_prim`] and [`del_prim`] are
thin, deliberately redundant wrappers kept only so callers can spell out
the lifetime contract the way the rest of this codebase does.
*/

use std::sync::Arc;

use crate::error::{Error, Result};

/// Maximum payload size of a primitive, in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 32_768;

/// Canary value written at construction and checked on drop. Catches an
/// overrun of the declared payload reaching past the end of the backing
/// allocation (which in the original C engine was a raw tail byte; here
/// it's a redundant but cheap belt-and-braces check since `Vec<u8>` can't
/// actually be overrun).
const CANARY: u32 = 0xA25C_CAFE;

/// Which protocol layer a primitive belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Data Link Layer.
    Dl,
    /// Data Link Layer Management.
    Mdl,
    /// Link Multiplexer.
    Lm,
    /// Physical Layer.
    Ph,
    /// AX.25 frame, carried raw in the payload.
    Ax25,
}

/// DL-protocol commands (ISO 8802/AX.25 §3 DLSAP primitive set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DlCmd {
    /// DL_CONNECT_REQUEST
    ConnectRequest = 0,
    /// DL_CONNECT_INDICATION
    ConnectIndication = 1,
    /// DL_CONNECT_CONFIRM
    ConnectConfirm = 2,
    /// DL_DISCONNECT_REQUEST
    DisconnectRequest = 3,
    /// DL_DISCONNECT_INDICATION
    DisconnectIndication = 4,
    /// DL_DISCONNECT_CONFIRM
    DisconnectConfirm = 5,
    /// DL_DATA_REQUEST
    DataRequest = 6,
    /// DL_DATA_INDICATION
    DataIndication = 7,
    /// DL_UNIT_DATA_REQUEST
    UnitDataRequest = 8,
    /// DL_UNIT_DATA_INDICATION
    UnitDataIndication = 9,
    /// DL_ERROR_INDICATION
    ErrorIndication = 10,
    /// DL_FLOW_OFF_REQUEST
    FlowOffRequest = 11,
    /// DL_FLOW_ON_REQUEST
    FlowOnRequest = 12,
    /// MDL_NEGOTIATE_REQUEST
    MdlNegotiateRequest = 13,
    /// MDL_NEGOTIATE_CONFIRM
    MdlNegotiateConfirm = 14,
    /// MDL_ERROR_INDICATION
    MdlErrorIndication = 15,
    /// TEST_REQUEST
    TestRequest = 16,
    /// TEST_INDICATION
    TestIndication = 17,
    /// TEST_CONFIRM
    TestConfirm = 18,
}

impl TryFrom<u8> for DlCmd {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        use DlCmd::*;
        Ok(match v {
            0 => ConnectRequest,
            1 => ConnectIndication,
            2 => ConnectConfirm,
            3 => DisconnectRequest,
            4 => DisconnectIndication,
            5 => DisconnectConfirm,
            6 => DataRequest,
            7 => DataIndication,
            8 => UnitDataRequest,
            9 => UnitDataIndication,
            10 => ErrorIndication,
            11 => FlowOffRequest,
            12 => FlowOnRequest,
            13 => MdlNegotiateRequest,
            14 => MdlNegotiateConfirm,
            15 => MdlErrorIndication,
            16 => TestRequest,
            17 => TestIndication,
            18 => TestConfirm,
            other => {
                return Err(Error::InvalidArgument(format!("unknown DL cmd {other}")));
            }
        })
    }
}

/// Reason code for a `DL_DISCONNECT_INDICATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Peer requested a normal disconnect.
    Normal,
    /// N2 retries were exhausted.
    Timeout,
    /// FRMR was sent or received.
    FrameReject,
    /// The local side initiated a T4-driven link reset.
    LinkReset,
}

/// An immutable-after-construction message carrying a protocol command
/// and its parameters across a DLSAP.
#[derive(Debug)]
pub struct Primitive {
    /// Protocol this primitive belongs to.
    pub protocol: Protocol,
    /// Protocol-specific command (a `DlCmd as u8`, or the AX.25 control
    /// octet for `Protocol::Ax25`).
    pub cmd: u8,
    /// Opaque token assigned by the client endpoint.
    pub client_handle: u16,
    /// Opaque token assigned by the server endpoint.
    pub server_handle: u16,
    payload: Vec<u8>,
    canary: u32,
}

impl Drop for Primitive {
    fn drop(&mut self) {
        debug_assert_eq!(self.canary, CANARY, "primitive payload canary corrupted");
    }
}

impl Primitive {
    /// Allocate a new primitive with an already-built payload.
    ///
    /// Fails with [`Error::PayloadTooLarge`] if `payload.len() >
    /// MAX_PAYLOAD_SIZE`.
    pub fn new(
        protocol: Protocol,
        cmd: u8,
        client_handle: u16,
        server_handle: u16,
        payload: Vec<u8>,
    ) -> Result<Arc<Self>> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        Ok(Arc::new(Self {
            protocol,
            cmd,
            client_handle,
            server_handle,
            payload,
            canary: CANARY,
        }))
    }

    /// Build a primitive whose payload is the concatenation of
    /// length-prefixed parameters (`u16` size, then that many bytes,
    /// repeating).
    pub fn from_params(
        protocol: Protocol,
        cmd: u8,
        client_handle: u16,
        server_handle: u16,
        params: &[&[u8]],
    ) -> Result<Arc<Self>> {
        let mut payload = Vec::new();
        for p in params {
            push_param(&mut payload, p)?;
        }
        Self::new(protocol, cmd, client_handle, server_handle, payload)
    }

    /// Raw payload bytes (e.g. an AX.25 wire frame, or the length-prefixed
    /// parameter stream of a DL primitive).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size of the payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Walk the length-prefixed parameter stream and return the `i`-th
    /// parameter's bytes, or `None` past the end.
    pub fn get_param(&self, i: usize) -> Option<&[u8]> {
        let mut o = 0usize;
        let mut remaining = i;
        loop {
            if o + 2 > self.payload.len() {
                return None;
            }
            let size = u16::from_le_bytes([self.payload[o], self.payload[o + 1]]) as usize;
            let data_start = o + 2;
            let data_end = data_start + size;
            if data_end > self.payload.len() {
                return None;
            }
            if remaining == 0 {
                return Some(&self.payload[data_start..data_end]);
            }
            remaining -= 1;
            o = data_end;
        }
    }

    /// Number of length-prefixed parameters encoded in the payload.
    pub fn param_count(&self) -> usize {
        let mut o = 0usize;
        let mut n = 0usize;
        while o + 2 <= self.payload.len() {
            let size = u16::from_le_bytes([self.payload[o], self.payload[o + 1]]) as usize;
            let end = o + 2 + size;
            if end > self.payload.len() {
                break;
            }
            n += 1;
            o = end;
        }
        n
    }
}

/// Append one length-prefixed parameter to `buf`.
pub fn push_param(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    if data.len() > u16::MAX as usize {
        return Err(Error::InvalidArgument("parameter too large".into()));
    }
    buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

/// Increment the reference count of a primitive. Must never be called
/// after the last [`del_prim`] on the same pointer — which in practice
/// means: never call this on a primitive you don't already hold an
/// `Arc` to.
pub fn use_prim(p: &Arc<Primitive>) -> Arc<Primitive> {
    Arc::clone(p)
}

/// Decrement the reference count of a primitive, releasing the backing
/// store when it reaches zero.
pub fn del_prim(p: Arc<Primitive>) {
    drop(p);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_round_trip() {
        let prim = Primitive::from_params(
            Protocol::Dl,
            DlCmd::UnitDataRequest as u8,
            1,
            2,
            &[b"APRS", b"N0CALL-0", b"hello"],
        )
        .unwrap();
        assert_eq!(prim.get_param(0).unwrap(), b"APRS");
        assert_eq!(prim.get_param(1).unwrap(), b"N0CALL-0");
        assert_eq!(prim.get_param(2).unwrap(), b"hello");
        assert!(prim.get_param(3).is_none());
        assert_eq!(prim.param_count(), 3);
    }

    #[test]
    fn payload_too_large_rejected() {
        let big = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = Primitive::new(Protocol::Ax25, 0, 0, 0, big).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge(_)));
    }

    #[test]
    fn param_size_invariant() {
        // For any primitive p with payload size n,
        // sum(param_size(i) + 2) == n.
        let prim =
            Primitive::from_params(Protocol::Dl, 0, 0, 0, &[b"a", b"bcd", b""]).unwrap();
        let mut sum = 0usize;
        let mut i = 0;
        while let Some(p) = prim.get_param(i) {
            sum += p.len() + 2;
            i += 1;
        }
        assert_eq!(sum, prim.payload_size());
    }

    #[test]
    fn use_and_del_share_ownership() {
        let prim = Primitive::new(Protocol::Ax25, 0, 0, 0, vec![1, 2, 3]).unwrap();
        let cloned = use_prim(&prim);
        assert_eq!(Arc::strong_count(&prim), 2);
        del_prim(cloned);
        assert_eq!(Arc::strong_count(&prim), 1);
    }
}
