/*! Human-readable frame tracing.

A per-protocol registry of one formatter each, fanned out synchronously
to every registered listener. Used by a terminal front-end or a packet
logger to watch traffic without coupling either to the wire format.
*/

use std::sync::{Arc, Mutex};

use crate::callsign::Address;
use crate::frame::{Control, Frame, SupervisoryKind, UnnumberedKind};
use crate::primitive::{Primitive, Protocol};

/// Maximum length of one formatted monitor line before truncation.
pub const MAX_LINE: usize = 256;

/// Formats a primitive of a given protocol into one text line.
pub trait MonitorFormatter: Send + Sync {
    /// Produce a single line describing `prim`, truncated to
    /// [`MAX_LINE`] with a trailing `…` if it would otherwise overflow.
    fn format(&self, prim: &Primitive) -> String;
}

/// Receives every formatted line handed to [`Monitor::put`]. Must not
/// block: monitor fan-out runs synchronously on whichever thread
/// produced the primitive.
pub trait MonitorListener: Send + Sync {
    /// Handle one formatted line, from the given service name, `tx`
    /// indicating direction (true = outbound).
    fn on_monitor(&self, service: &str, tx: bool, line: &str);
}

fn truncate(mut s: String) -> String {
    if s.chars().count() > MAX_LINE {
        s = s.chars().take(MAX_LINE.saturating_sub(1)).collect();
        s.push('…');
    }
    s
}

/// AX.25 frame formatter: `SRC->DST[ via DIGI...] ctrl info`.
pub struct Ax25Formatter;

impl MonitorFormatter for Ax25Formatter {
    fn format(&self, prim: &Primitive) -> String {
        let Ok(frame) = crate::frame::Frame::decode(prim.payload(), crate::frame::Modulo::Mod8)
        else {
            return truncate(format!("AX25: undecodable ({} byte)", prim.payload_size()));
        };
        truncate(format_frame(&frame))
    }
}

fn format_frame(frame: &Frame) -> String {
    let mut out = format!("{}->{}", frame.source, frame.destination);
    if !frame.digipeaters.is_empty() {
        out.push_str(" via ");
        let via: Vec<String> = frame.digipeaters.iter().map(Address::to_string).collect();
        out.push_str(&via.join(","));
    }
    out.push(' ');
    out.push_str(&control_label(&frame.control));
    if !frame.info.is_empty() {
        out.push_str(" \"");
        for &b in &frame.info {
            if b.is_ascii_graphic() || b == b' ' {
                out.push(b as char);
            } else {
                out.push('.');
            }
        }
        out.push('"');
    }
    out
}

fn control_label(control: &Control) -> String {
    match control {
        Control::Information { ns, nr, pf } => format!("I{} N(S)={ns} N(R)={nr}", pf_suffix(*pf)),
        Control::Supervisory { kind, nr, pf } => {
            let k = match kind {
                SupervisoryKind::Rr => "RR",
                SupervisoryKind::Rnr => "RNR",
                SupervisoryKind::Rej => "REJ",
                SupervisoryKind::Srej => "SREJ",
            };
            format!("{k}{} N(R)={nr}", pf_suffix(*pf))
        }
        Control::Unnumbered { kind, pf } => {
            let k = match kind {
                UnnumberedKind::Sabm => "SABM",
                UnnumberedKind::Sabme => "SABME",
                UnnumberedKind::Disc => "DISC",
                UnnumberedKind::Dm => "DM",
                UnnumberedKind::Ua => "UA",
                UnnumberedKind::Frmr => "FRMR",
                UnnumberedKind::Ui => "UI",
                UnnumberedKind::Xid => "XID",
                UnnumberedKind::Test => "TEST",
            };
            format!("{k}{}", pf_suffix(*pf))
        }
    }
}

fn pf_suffix(pf: bool) -> &'static str {
    if pf { "^" } else { "" }
}

struct State {
    formatters: std::collections::HashMap<Protocol, Arc<dyn MonitorFormatter>>,
    listeners: Vec<Arc<dyn MonitorListener>>,
}

/// Process-wide monitor registry and fan-out point.
pub struct Monitor {
    state: Mutex<State>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Create a monitor with the built-in AX.25 formatter pre-registered.
    pub fn new() -> Self {
        let mut formatters: std::collections::HashMap<Protocol, Arc<dyn MonitorFormatter>> =
            std::collections::HashMap::new();
        formatters.insert(Protocol::Ax25, Arc::new(Ax25Formatter));
        Self {
            state: Mutex::new(State {
                formatters,
                listeners: Vec::new(),
            }),
        }
    }

    /// Register (or replace) the formatter for a protocol.
    pub fn register_formatter(&self, protocol: Protocol, formatter: Arc<dyn MonitorFormatter>) {
        self.state.lock().unwrap().formatters.insert(protocol, formatter);
    }

    /// Register a listener. Listeners are never unregistered
    /// individually; they live for the process lifetime, matching the
    /// DLSAP registry's module-lifetime model.
    pub fn register_listener(&self, listener: Arc<dyn MonitorListener>) {
        self.state.lock().unwrap().listeners.push(listener);
    }

    /// Format `prim` with the formatter registered for its protocol (if
    /// any) and fan it out to every listener, synchronously.
    pub fn put(&self, prim: &Primitive, service: &str, tx: bool) {
        let state = self.state.lock().unwrap();
        let Some(formatter) = state.formatters.get(&prim.protocol) else {
            return;
        };
        let line = formatter.format(prim);
        for listener in &state.listeners {
            listener.on_monitor(service, tx, &line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Control, Modulo, UnnumberedKind};
    use std::sync::Mutex as StdMutex;

    struct Recorder(StdMutex<Vec<String>>);
    impl MonitorListener for Recorder {
        fn on_monitor(&self, _service: &str, _tx: bool, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn formats_and_fans_out_a_ua_frame() {
        let monitor = Monitor::new();
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));
        monitor.register_listener(recorder.clone());

        let frame = Frame {
            destination: Address::new("N0CALL", 0, false).unwrap(),
            source: Address::new("KI5ABC", 0, false).unwrap(),
            digipeaters: vec![],
            command: false,
            control: Control::Unnumbered {
                kind: UnnumberedKind::Ua,
                pf: true,
            },
            pid: None,
            info: vec![],
        };
        let bytes = frame.encode(Modulo::Mod8);
        let prim = Primitive::new(Protocol::Ax25, 0, 0, 0, bytes).unwrap();
        monitor.put(&prim, "radio0", false);

        let lines = recorder.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("KI5ABC->N0CALL"));
        assert!(lines[0].contains("UA"));
    }

    #[test]
    fn truncates_overlong_lines() {
        let long = "x".repeat(MAX_LINE + 50);
        let truncated = truncate(long);
        assert_eq!(truncated.chars().count(), MAX_LINE);
        assert!(truncated.ends_with('…'));
    }
}
