/*! Data-Link Service Access Point registry.

A process-wide name→endpoint map. Independently loaded modules find each
other by name through [`Registry::lookup`] rather than holding direct
references, which is what lets the module/plugin runtime load and unload
components without the participants needing to know about each other's
lifetimes ahead of time.

The registry lock is never held across a callback into an endpoint:
[`Registry::lookup`] clones the `Arc` and releases the lock before
returning, so the caller always unlocks before invoking anything on the
peer.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::primitive::Primitive;

/// Queue occupancy returned by [`DlsEndpoint::get_queue_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Number of primitives queued for transmission.
    pub tx_queue_len: usize,
    /// Number of primitives queued for reception.
    pub rx_queue_len: usize,
}

/// Capability set of a Data-Link Service endpoint.
///
/// Each method is a capability that an endpoint may or may not provide —
/// a client-only endpoint has no `on_write` from the server side, a
/// server-only endpoint has no `set_default_local_addr`. Absence is
/// modeled by the default implementation returning
/// [`Error::NotProvided`], not by a null function pointer.
pub trait DlsEndpoint: Send + Sync {
    /// Endpoint name, as registered.
    fn name(&self) -> &str;

    /// Set the default local address (callsign) for this endpoint,
    /// returning its normalized string form.
    fn set_default_local_addr(&self, _addr: &str) -> Result<String> {
        Err(Error::NotProvided("set_default_local_addr"))
    }

    /// Set the default remote address (destination + digipeaters) for
    /// this endpoint, returning its normalized string form.
    fn set_default_remote_addr(&self, _addr: &str) -> Result<String> {
        Err(Error::NotProvided("set_default_remote_addr"))
    }

    /// Open a channel to this endpoint, optionally providing a back
    /// channel the peer can use to write primitives in the other
    /// direction.
    fn open(&self, _back: Option<Arc<dyn DlsEndpoint>>) -> Result<()> {
        Err(Error::NotProvided("open"))
    }

    /// Close the channel. After this call nothing more arrives on any
    /// back channel previously supplied to `open`.
    fn close(&self) {}

    /// Deliver a primitive to this endpoint.
    fn on_write(&self, _prim: Arc<Primitive>, _expedited: bool) -> Result<()> {
        Err(Error::NotProvided("on_write"))
    }

    /// Report queue occupancy.
    fn get_queue_stats(&self) -> Result<QueueStats> {
        Err(Error::NotProvided("get_queue_stats"))
    }
}

/// Process-wide name→endpoint registry.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Arc<dyn DlsEndpoint>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Register an endpoint under its own name. Fails with
    /// [`Error::AlreadyExists`] on a duplicate name.
    pub fn register(&self, endpoint: Arc<dyn DlsEndpoint>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let name = endpoint.name().to_string();
        if entries.contains_key(&name) {
            return Err(Error::AlreadyExists(name));
        }
        entries.insert(name, endpoint);
        Ok(())
    }

    /// Remove a named registration.
    pub fn unregister(&self, name: &str) {
        self.entries.lock().unwrap().remove(name);
    }

    /// Look up an endpoint by name. The returned handle's validity is
    /// bounded by the registration lifetime of the callee: once
    /// [`Registry::unregister`] is called, existing clones remain valid
    /// (they hold their own `Arc`) but new lookups will fail.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn DlsEndpoint>> {
        self.entries.lock().unwrap().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        name: String,
    }
    impl DlsEndpoint for Stub {
        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let reg = Registry::new();
        reg.register(Arc::new(Stub { name: "a".into() })).unwrap();
        let err = reg
            .register(Arc::new(Stub { name: "a".into() }))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn lookup_after_unregister_fails_but_handle_stays_valid() {
        let reg = Registry::new();
        reg.register(Arc::new(Stub { name: "a".into() })).unwrap();
        let handle = reg.lookup("a").unwrap();
        reg.unregister("a");
        assert!(reg.lookup("a").is_none());
        assert_eq!(handle.name(), "a");
    }

    #[test]
    fn missing_capability_reports_not_provided() {
        let stub = Stub { name: "a".into() };
        let err = stub.set_default_local_addr("N0CALL").unwrap_err();
        assert!(matches!(err, Error::NotProvided("set_default_local_addr")));
    }
}
