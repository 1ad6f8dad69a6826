//! OS network-path change events
//!
//! Mobile clients switch between interfaces (Wi-Fi, cellular) without the
//! transports noticing quickly. A [`ConnectivityListener`] surfaces those OS
//! events so the engine can reconnect proactively instead of waiting for ICE
//! to fail.

use tokio::sync::mpsc;

/// A network-path switch observed by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    /// Name of the interface the path moved to, when known
    pub interface: Option<String>,
}

/// Source of OS network-path-change events.
///
/// Implementations are platform-specific and out of scope for the engine;
/// the engine only subscribes and reacts.
pub trait ConnectivityListener: Send + Sync {
    /// Subscribe to path-change events. Each call returns an independent
    /// stream; events published before subscription are not replayed.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PathChange>;
}
