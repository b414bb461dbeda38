use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the transport and command layers.
///
/// Every failure is returned to the immediate caller of the failing
/// operation; nothing is swallowed inside the crate. Logging is a side
/// channel for diagnostics only.
#[derive(Debug, Error)]
pub enum Error {
    /// No Bluetooth adapter was found on this host.
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    /// Scanning or enumerating peripherals failed at the platform level.
    #[error("device discovery failed: {0}")]
    DiscoveryFailed(#[source] btleplug::Error),

    /// A scan completed without finding a matching printer.
    #[error("no matching device found")]
    DeviceNotFound,

    /// `connect()` was called before a device was bound.
    #[error("no device bound; call request_device() first")]
    NotDiscovered,

    /// Establishing the link or enumerating GATT services failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] btleplug::Error),

    /// The device does not expose the configured service.
    #[error("service {0} not found on device")]
    ServiceNotFound(Uuid),

    /// No writable RX characteristic was found under the service.
    #[error("no writable RX characteristic found")]
    CharacteristicNotFound,

    /// A write was attempted with no live connection or RX binding.
    #[error("not connected")]
    NotConnected,

    /// A chunk write failed; the remaining chunks of the payload were
    /// not sent. Retrying means restarting the whole payload.
    #[error("write failed: {0}")]
    WriteFailed(#[source] btleplug::Error),

    /// No notification chunk arrived within the idle window after the
    /// last chunk of the request was written.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// A request/response exchange is already in flight.
    #[error("a command is already in progress")]
    CommandInProgress,

    /// The exchange was cancelled, normally by a disconnect.
    #[error("command cancelled")]
    Cancelled,
}
