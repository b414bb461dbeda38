//! labelprinter: drive TSC Alpha-2R class label printers over BLE.
//!
//! Main modules:
//! - ble: transport (discovery, GATT binding, chunked writes, notification routing)
//! - command: single-flight request/response exchanges with idle-timeout framing
//! - assembler: notification chunk reassembly
//! - tspl: TSPL command-string builders
//! - error: error taxonomy

pub mod assembler;
pub mod ble;
pub mod command;
pub mod error;
pub mod tspl;

/// BLE transport API: scan, bind, connect, write
pub use ble::{DeviceInfo, PrinterTransport, RX_UUID, SERVICE_UUID, TX_UUID, TransportConfig};
/// Exchange layer and its injectable write primitive
pub use command::{ChunkWriter, CommandManager, DEFAULT_CHUNK_SIZE, DEFAULT_IDLE_TIMEOUT};
/// Chunk reassembly
pub use assembler::ChunkAssembler;
pub use error::Error;
