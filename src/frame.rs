/*! AX.25 frame codec: address field, control field, FCS.

Frame layout on the wire (flags and bit-stuffing are the transport's
job, not this module's):

```text
| address field (14-70 octets) | control (1-2 octets) | PID (0-1) | info | FCS (2, low byte first) |
```
*/

use crate::callsign::Address;
use crate::error::{Error, Result};

/// No-layer-3 protocol id, used on UI frames carrying raw data.
pub const PID_NO_LAYER3: u8 = 0xF0;

/// CRC-16/X.25: poly 0x1021 reflected, init 0xFFFF, xor-out 0xFFFF.
pub fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Sequence modulus in effect for a link: 8 (one-octet control) or 128
/// (two-octet control, selected by a successful SABME exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulo {
    /// Classic AX.25, N(S)/N(R) in 3 bits.
    Mod8,
    /// Extended AX.25 v2.2, N(S)/N(R) in 7 bits.
    Mod128,
}

/// Supervisory frame subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisoryKind {
    /// Receiver ready.
    Rr,
    /// Receiver not ready.
    Rnr,
    /// Reject.
    Rej,
    /// Selective reject.
    Srej,
}

/// Unnumbered frame subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnnumberedKind {
    /// Set Asynchronous Balanced Mode.
    Sabm,
    /// Set Asynchronous Balanced Mode Extended (selects mod 128).
    Sabme,
    /// Disconnect.
    Disc,
    /// Disconnected Mode.
    Dm,
    /// Unnumbered Acknowledge.
    Ua,
    /// Frame Reject.
    Frmr,
    /// Unnumbered Information.
    Ui,
    /// Exchange Identification.
    Xid,
    /// Test.
    Test,
}

/// A decoded AX.25 control field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Information transfer frame.
    Information { ns: u8, nr: u8, pf: bool },
    /// Supervisory frame.
    Supervisory {
        kind: SupervisoryKind,
        nr: u8,
        pf: bool,
    },
    /// Unnumbered frame.
    Unnumbered { kind: UnnumberedKind, pf: bool },
}

impl Control {
    /// Encode into 1 (mod 8) or 2 (mod 128, I/S frames only) octets.
    pub fn encode(&self, modulo: Modulo) -> Vec<u8> {
        match (self, modulo) {
            (Control::Information { ns, nr, pf }, Modulo::Mod8) => {
                vec![(ns << 1) | ((*pf as u8) << 4) | (nr << 5)]
            }
            (Control::Information { ns, nr, pf }, Modulo::Mod128) => {
                vec![(ns << 1), (nr << 1) | (*pf as u8)]
            }
            (Control::Supervisory { kind, nr, pf }, Modulo::Mod8) => {
                vec![0x01 | (supervisory_bits(*kind) << 2) | ((*pf as u8) << 4) | (nr << 5)]
            }
            (Control::Supervisory { kind, nr, pf }, Modulo::Mod128) => {
                vec![0x01 | (supervisory_bits(*kind) << 2), (nr << 1) | (*pf as u8)]
            }
            (Control::Unnumbered { kind, pf }, _) => {
                // Bits 0-1 are always 0b11 for a U frame; `unnumbered_bits`
                // only carries the modifier bits (2,3,5,6,7).
                vec![unnumbered_bits(*kind) | 0x03 | ((*pf as u8) << 4)]
            }
        }
    }

    /// Decode a control field. `modulo` disambiguates one- vs two-octet
    /// I/S frames; unnumbered frames are always one octet regardless.
    /// Returns the control and the number of octets consumed.
    pub fn decode(bytes: &[u8], modulo: Modulo) -> Result<(Self, usize)> {
        let first = *bytes
            .first()
            .ok_or_else(|| Error::FrameReject("empty control field".into()))?;
        if first & 0x01 == 0 {
            // I frame.
            match modulo {
                Modulo::Mod8 => Ok((
                    Control::Information {
                        ns: (first >> 1) & 0x07,
                        nr: (first >> 5) & 0x07,
                        pf: first & 0x10 != 0,
                    },
                    1,
                )),
                Modulo::Mod128 => {
                    let second = *bytes
                        .get(1)
                        .ok_or_else(|| Error::FrameReject("truncated mod128 I control".into()))?;
                    Ok((
                        Control::Information {
                            ns: (first >> 1) & 0x7F,
                            nr: (second >> 1) & 0x7F,
                            pf: second & 0x01 != 0,
                        },
                        2,
                    ))
                }
            }
        } else if first & 0x03 == 0x01 {
            // S frame.
            let kind = supervisory_kind((first >> 2) & 0x03)?;
            match modulo {
                Modulo::Mod8 => Ok((
                    Control::Supervisory {
                        kind,
                        nr: (first >> 5) & 0x07,
                        pf: first & 0x10 != 0,
                    },
                    1,
                )),
                Modulo::Mod128 => {
                    let second = *bytes
                        .get(1)
                        .ok_or_else(|| Error::FrameReject("truncated mod128 S control".into()))?;
                    Ok((
                        Control::Supervisory {
                            kind,
                            nr: (second >> 1) & 0x7F,
                            pf: second & 0x01 != 0,
                        },
                        2,
                    ))
                }
            }
        } else {
            // U frame: modifier bits are 2,3,5,6,7; P/F is bit 4.
            let modifier = first & 0xEC;
            let kind = unnumbered_kind(modifier)?;
            Ok((
                Control::Unnumbered {
                    kind,
                    pf: first & 0x10 != 0,
                },
                1,
            ))
        }
    }
}

fn supervisory_bits(kind: SupervisoryKind) -> u8 {
    match kind {
        SupervisoryKind::Rr => 0b00,
        SupervisoryKind::Rnr => 0b01,
        SupervisoryKind::Rej => 0b10,
        SupervisoryKind::Srej => 0b11,
    }
}

fn supervisory_kind(bits: u8) -> Result<SupervisoryKind> {
    Ok(match bits {
        0b00 => SupervisoryKind::Rr,
        0b01 => SupervisoryKind::Rnr,
        0b10 => SupervisoryKind::Rej,
        0b11 => SupervisoryKind::Srej,
        _ => return Err(Error::FrameReject("impossible supervisory bits".into())),
    })
}

fn unnumbered_bits(kind: UnnumberedKind) -> u8 {
    match kind {
        UnnumberedKind::Sabm => 0x2C,
        UnnumberedKind::Sabme => 0x6C,
        UnnumberedKind::Disc => 0x40,
        UnnumberedKind::Dm => 0x0C,
        UnnumberedKind::Ua => 0x60,
        UnnumberedKind::Frmr => 0x84,
        UnnumberedKind::Ui => 0x00,
        UnnumberedKind::Xid => 0xAC,
        UnnumberedKind::Test => 0xE0,
    }
}

fn unnumbered_kind(modifier: u8) -> Result<UnnumberedKind> {
    Ok(match modifier {
        0x2C => UnnumberedKind::Sabm,
        0x6C => UnnumberedKind::Sabme,
        0x40 => UnnumberedKind::Disc,
        0x0C => UnnumberedKind::Dm,
        0x60 => UnnumberedKind::Ua,
        0x84 => UnnumberedKind::Frmr,
        0x00 => UnnumberedKind::Ui,
        0xAC => UnnumberedKind::Xid,
        0xE0 => UnnumberedKind::Test,
        other => {
            return Err(Error::FrameReject(format!(
                "unrecognized unnumbered modifier bits 0x{other:02x}"
            )));
        }
    })
}

/// A fully decoded AX.25 frame, excluding flags and bit-stuffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination address.
    pub destination: Address,
    /// Source address.
    pub source: Address,
    /// Digipeater path, in transmission order.
    pub digipeaters: Vec<Address>,
    /// True if this frame is a command (vs. a response).
    pub command: bool,
    /// Control field.
    pub control: Control,
    /// Protocol id, present on I and UI frames only.
    pub pid: Option<u8>,
    /// Information field.
    pub info: Vec<u8>,
}

impl Frame {
    /// Encode into bytes ready for bit-stuffing and flag framing,
    /// including the trailing FCS.
    pub fn encode(&self, modulo: Modulo) -> Vec<u8> {
        let mut out = Vec::new();
        let dest_c = self.command;
        let src_c = !self.command;
        out.extend(
            Address {
                c_or_h_bit: dest_c,
                ..self.destination.clone()
            }
            .encode(self.digipeaters.is_empty()),
        );
        out.extend(
            Address {
                c_or_h_bit: src_c,
                ..self.source.clone()
            }
            .encode(false),
        );
        // Overwrite the source's extension bit: it is the last octet
        // only when there are no digipeaters.
        if self.digipeaters.is_empty() {
            let last = out.len() - 1;
            out[last] |= 0x01;
        }
        for (i, digi) in self.digipeaters.iter().enumerate() {
            let last = i + 1 == self.digipeaters.len();
            out.extend(digi.encode(last));
        }
        out.extend(self.control.encode(modulo));
        if let Some(pid) = self.pid {
            out.push(pid);
        }
        out.extend(&self.info);
        let fcs = crc16_x25(&out);
        out.push((fcs & 0xFF) as u8);
        out.push((fcs >> 8) as u8);
        out
    }

    /// Decode a frame, verifying the FCS and address field structure.
    /// `modulo` disambiguates one- vs. two-octet I/S control fields.
    pub fn decode(bytes: &[u8], modulo: Modulo) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::FrameReject("frame shorter than FCS".into()));
        }
        let (body, fcs_bytes) = bytes.split_at(bytes.len() - 2);
        let received_fcs = fcs_bytes[0] as u16 | ((fcs_bytes[1] as u16) << 8);
        if crc16_x25(body) != received_fcs {
            return Err(Error::FrameReject("FCS mismatch".into()));
        }

        let mut offset = 0;
        let mut addresses = Vec::new();
        loop {
            let chunk: &[u8; 7] = body
                .get(offset..offset + 7)
                .ok_or_else(|| Error::FrameReject("truncated address field".into()))?
                .try_into()
                .unwrap();
            let (addr, last) = Address::decode(chunk)?;
            addresses.push(addr);
            offset += 7;
            if last {
                break;
            }
            if addresses.len() > 10 {
                return Err(Error::FrameReject("address field too long".into()));
            }
        }
        if addresses.len() < 2 {
            return Err(Error::FrameReject(
                "address field needs at least destination and source".into(),
            ));
        }
        let destination = addresses.remove(0);
        let source = addresses.remove(0);
        let command = destination.c_or_h_bit && !source.c_or_h_bit;
        let digipeaters = addresses;

        let (control, consumed) = Control::decode(&body[offset..], modulo)?;
        offset += consumed;

        let pid = match &control {
            Control::Information { .. } => Some(
                *body
                    .get(offset)
                    .ok_or_else(|| Error::FrameReject("missing PID on I frame".into()))?,
            ),
            Control::Unnumbered {
                kind: UnnumberedKind::Ui,
                ..
            } => Some(
                *body
                    .get(offset)
                    .ok_or_else(|| Error::FrameReject("missing PID on UI frame".into()))?,
            ),
            _ => None,
        };
        if pid.is_some() {
            offset += 1;
        }
        let info = body[offset..].to_vec();

        Ok(Frame {
            destination,
            source,
            digipeaters,
            command,
            control,
            pid,
            info,
        })
    }
}
