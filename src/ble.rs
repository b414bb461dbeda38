//! BLE transport for Alpha-2R class label printers.
//!
//! Owns the physical connection and the RX/TX characteristic bindings, and
//! is the single place that decides whether an inbound notification chunk
//! belongs to a pending command exchange or is unsolicited printer output.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use chrono::Local;
use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::command::{
    ChunkWriter, CommandManager, DEFAULT_CHUNK_SIZE, DEFAULT_IDLE_TIMEOUT, write_chunked,
};
use crate::error::Error;

/// Primary service exposed by the printer's BLE serial bridge.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
/// Characteristic commands are written to (printer's receive side).
pub const RX_UUID: Uuid = Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);
/// Characteristic the printer notifies responses on (printer's transmit side).
pub const TX_UUID: Uuid = Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616);

/// A discovered printer candidate.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: String,
    pub name: Option<String>,
}

/// Transport parameters. `Default` matches the Alpha-2R serial bridge.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub service_uuid: Uuid,
    pub rx_uuid: Uuid,
    pub tx_uuid: Uuid,
    /// Largest single GATT write, in bytes.
    pub chunk_size: usize,
    /// Quiet period that terminates an inbound response frame.
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            rx_uuid: RX_UUID,
            tx_uuid: TX_UUID,
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Timestamped diagnostic sink, mirrored to the `log` facade.
#[derive(Clone, Default)]
struct LogSink {
    sink: Arc<RwLock<Option<Box<dyn Fn(String) + Send + Sync>>>>,
}

impl LogSink {
    fn set(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        if let Ok(mut guard) = self.sink.write() {
            *guard = Some(Box::new(callback));
        }
    }

    fn line(&self, message: &str) {
        debug!("{message}");
        if let Ok(guard) = self.sink.read() {
            if let Some(sink) = guard.as_ref() {
                sink(format!("{}: {message}", Local::now().format("%H:%M:%S")));
            }
        }
    }
}

/// Callback for notification chunks that arrive outside any exchange.
#[derive(Clone, Default)]
struct UnsolicitedSink {
    sink: Arc<RwLock<Option<Box<dyn Fn(Vec<u8>) + Send + Sync>>>>,
}

impl UnsolicitedSink {
    fn set(&self, callback: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        if let Ok(mut guard) = self.sink.write() {
            *guard = Some(Box::new(callback));
        }
    }

    fn dispatch(&self, chunk: Vec<u8>) {
        if let Ok(guard) = self.sink.read() {
            if let Some(sink) = guard.as_ref() {
                sink(chunk);
            }
        }
    }
}

/// Everything tied to one physical connection. Cleared as a unit on
/// disconnect so a pending exchange can never outlive its channel.
#[derive(Default)]
struct Link {
    device: Option<Peripheral>,
    rx: Option<Characteristic>,
    tx: Option<Characteristic>,
    notify_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
}

impl Link {
    fn clear(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
        self.device = None;
        self.rx = None;
        self.tx = None;
    }
}

/// Writes chunks to the bound RX characteristic.
struct GattWriter {
    device: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl ChunkWriter for GattWriter {
    async fn write_chunk(&self, chunk: &[u8]) -> Result<(), Error> {
        self.device
            .write(&self.characteristic, chunk, WriteType::WithResponse)
            .await
            .map_err(Error::WriteFailed)
    }
}

/// Picks the RX and TX bindings out of a characteristic list.
///
/// RX must match the configured UUID and carry a write capability; TX is
/// matched by UUID alone, as some firmware revisions misreport its flags.
/// First match wins for each role.
fn classify_characteristics(
    characteristics: &[Characteristic],
    config: &TransportConfig,
) -> (Option<Characteristic>, Option<Characteristic>) {
    let mut rx = None;
    let mut tx = None;
    for characteristic in characteristics {
        let writable = characteristic
            .properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE);
        if rx.is_none() && characteristic.uuid == config.rx_uuid && writable {
            rx = Some(characteristic.clone());
        }
        if tx.is_none() && characteristic.uuid == config.tx_uuid {
            tx = Some(characteristic.clone());
        }
    }
    (rx, tx)
}

/// One logical session to one printer.
///
/// Owns the adapter handle, the bound peripheral and characteristics, and a
/// [`CommandManager`] for request/response exchanges. A second concurrent
/// printer needs a second `PrinterTransport`.
pub struct PrinterTransport {
    adapter: Adapter,
    config: TransportConfig,
    cmd: Arc<CommandManager>,
    link: Arc<Mutex<Link>>,
    log: LogSink,
    unsolicited: UnsolicitedSink,
}

impl PrinterTransport {
    /// Acquires the first Bluetooth adapter with the default Alpha-2R config.
    pub async fn new() -> Result<Self, Error> {
        Self::with_config(TransportConfig::default()).await
    }

    pub async fn with_config(config: TransportConfig) -> Result<Self, Error> {
        let manager = Manager::new().await.map_err(Error::DiscoveryFailed)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(Error::DiscoveryFailed)?
            .into_iter()
            .next()
            .ok_or(Error::NoAdapter)?;
        let cmd = Arc::new(CommandManager::new(config.chunk_size, config.idle_timeout));
        Ok(Self {
            adapter,
            config,
            cmd,
            link: Arc::default(),
            log: LogSink::default(),
            unsolicited: UnsolicitedSink::default(),
        })
    }

    /// Receives notification chunks that arrive while no exchange is
    /// pending (printer-initiated status lines and the like).
    pub fn set_unsolicited_callback(&self, callback: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        self.unsolicited.set(callback);
    }

    /// Receives timestamped diagnostic lines. Diagnostics only; failures
    /// are always returned to the caller as errors as well.
    pub fn set_log_callback(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        self.log.set(callback);
    }

    /// Unfiltered scan, for letting a user pick from a device list.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DeviceInfo>, Error> {
        self.log.line("searching for devices...");
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::DiscoveryFailed)?;
        tokio::time::sleep(duration).await;
        self.adapter
            .stop_scan()
            .await
            .map_err(Error::DiscoveryFailed)?;

        let mut devices = Vec::new();
        for peripheral in self
            .adapter
            .peripherals()
            .await
            .map_err(Error::DiscoveryFailed)?
        {
            let properties = peripheral
                .properties()
                .await
                .map_err(Error::DiscoveryFailed)?;
            devices.push(DeviceInfo {
                id: peripheral.id().to_string(),
                name: properties.and_then(|p| p.local_name),
            });
        }
        self.log.line(&format!("scan finished, {} device(s)", devices.len()));
        Ok(devices)
    }

    /// Scans for printers advertising the configured service and binds the
    /// first one found. Registers a disconnect observer for the device.
    pub async fn request_device(&self, scan_timeout: Duration) -> Result<DeviceInfo, Error> {
        self.log.line("searching for devices...");
        let filter = ScanFilter {
            services: vec![self.config.service_uuid],
        };
        self.adapter
            .start_scan(filter)
            .await
            .map_err(Error::DiscoveryFailed)?;
        tokio::time::sleep(scan_timeout).await;
        self.adapter
            .stop_scan()
            .await
            .map_err(Error::DiscoveryFailed)?;

        for peripheral in self
            .adapter
            .peripherals()
            .await
            .map_err(Error::DiscoveryFailed)?
        {
            let properties = peripheral
                .properties()
                .await
                .map_err(Error::DiscoveryFailed)?;
            // Scan filters are advisory on some platforms; re-check the
            // advertised services before binding.
            let advertises_service = properties
                .as_ref()
                .map(|p| p.services.contains(&self.config.service_uuid))
                .unwrap_or(false);
            if advertises_service {
                return self.bind_device(peripheral).await;
            }
        }
        self.log.line("device discovery failed");
        Err(Error::DeviceNotFound)
    }

    /// Binds a device previously returned by [`scan`](Self::scan) by id.
    pub async fn request_device_by_id(&self, id: &str) -> Result<DeviceInfo, Error> {
        for peripheral in self
            .adapter
            .peripherals()
            .await
            .map_err(Error::DiscoveryFailed)?
        {
            if peripheral.id().to_string() == id {
                return self.bind_device(peripheral).await;
            }
        }
        Err(Error::DeviceNotFound)
    }

    async fn bind_device(&self, peripheral: Peripheral) -> Result<DeviceInfo, Error> {
        let properties = peripheral.properties().await.ok().flatten();
        let info = DeviceInfo {
            id: peripheral.id().to_string(),
            name: properties.and_then(|p| p.local_name),
        };
        let watch_task = self.spawn_disconnect_watch(peripheral.id()).await?;

        let mut link = self.link.lock().await;
        link.clear();
        link.watch_task = Some(watch_task);
        link.device = Some(peripheral);
        drop(link);

        self.log.line(&format!(
            "device found: {}",
            info.name.as_deref().unwrap_or("<unnamed>")
        ));
        Ok(info)
    }

    /// Watches the adapter event stream; an unexpected link loss performs
    /// the same cleanup as an explicit `disconnect`.
    async fn spawn_disconnect_watch(&self, id: PeripheralId) -> Result<JoinHandle<()>, Error> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(Error::DiscoveryFailed)?;
        let link = Arc::clone(&self.link);
        let cmd = Arc::clone(&self.cmd);
        let log = self.log.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event {
                    if disconnected == id {
                        log.line("device has been disconnected");
                        let mut link = link.lock().await;
                        // Skip aborting our own task; it ends right after.
                        if let Some(task) = link.notify_task.take() {
                            task.abort();
                        }
                        link.watch_task = None;
                        link.device = None;
                        link.rx = None;
                        link.tx = None;
                        cmd.cancel();
                        break;
                    }
                }
            }
        }))
    }

    /// Establishes the link to the bound device and resolves the RX/TX
    /// characteristic bindings.
    ///
    /// RX (writable) is required. TX is optional: without it the printer
    /// can still be written to, just never read from. With a TX binding,
    /// notifications are subscribed and every chunk is routed to the
    /// command manager; chunks arriving outside an exchange additionally go
    /// to the unsolicited callback.
    pub async fn connect(&self) -> Result<(), Error> {
        // The lock is held for the whole sequence so a concurrent
        // disconnect cannot interleave between subscribing and storing the
        // bindings; it simply waits and then tears down the finished link.
        let mut link = self.link.lock().await;
        let device = link.device.clone().ok_or(Error::NotDiscovered)?;

        self.log.line("connecting...");
        device.connect().await.map_err(Error::ConnectFailed)?;
        self.log.line("connected to GATT server");

        device
            .discover_services()
            .await
            .map_err(Error::ConnectFailed)?;
        let service_uuid = self.config.service_uuid;
        let service = device
            .services()
            .into_iter()
            .find(|service| service.uuid == service_uuid)
            .ok_or(Error::ServiceNotFound(service_uuid))?;
        self.log.line("service found");

        let characteristics: Vec<Characteristic> = service.characteristics.into_iter().collect();
        self.log.line(&format!(
            "found {} characteristics, searching for writable...",
            characteristics.len()
        ));
        let (rx, tx) = classify_characteristics(&characteristics, &self.config);
        let rx = rx.ok_or(Error::CharacteristicNotFound)?;
        self.log.line(&format!("bound RX characteristic {}", rx.uuid));

        let notify_task = match &tx {
            Some(tx) => {
                device.subscribe(tx).await.map_err(Error::ConnectFailed)?;
                let mut notifications = device
                    .notifications()
                    .await
                    .map_err(Error::ConnectFailed)?;
                let cmd = Arc::clone(&self.cmd);
                let unsolicited = self.unsolicited.clone();
                let tx_uuid = tx.uuid;
                let task = tokio::spawn(async move {
                    while let Some(notification) = notifications.next().await {
                        if notification.uuid != tx_uuid {
                            continue;
                        }
                        // Capture before receive(): the chunk that resolves
                        // an exchange still belongs to that exchange.
                        let command_waiting = cmd.is_busy();
                        cmd.receive(&notification.value);
                        if !command_waiting {
                            unsolicited.dispatch(notification.value);
                        }
                    }
                });
                self.log.line("TX notifications enabled");
                Some(task)
            }
            None => {
                warn!("no TX characteristic; responses will not be readable");
                None
            }
        };

        if let Some(task) = link.notify_task.take() {
            task.abort();
        }
        link.rx = Some(rx);
        link.tx = tx;
        link.notify_task = notify_task;
        Ok(())
    }

    /// Tears down the physical link and cancels any in-flight exchange.
    /// Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        let device = link.device.take();
        link.clear();
        drop(link);

        if let Some(device) = device {
            if device.is_connected().await.unwrap_or(false) {
                if device.disconnect().await.is_ok() {
                    self.log.line("disconnected from device");
                }
            }
        }
        self.cmd.cancel();
    }

    /// True while a request/response exchange is in flight.
    pub fn is_busy(&self) -> bool {
        self.cmd.is_busy()
    }

    pub async fn is_connected(&self) -> bool {
        let link = self.link.lock().await;
        match (&link.device, &link.rx) {
            (Some(device), Some(_)) => device.is_connected().await.unwrap_or(false),
            _ => false,
        }
    }

    async fn rx_writer(&self) -> Result<GattWriter, Error> {
        let link = self.link.lock().await;
        let device = link.device.clone().ok_or(Error::NotConnected)?;
        let characteristic = link.rx.clone().ok_or(Error::NotConnected)?;
        Ok(GattWriter {
            device,
            characteristic,
        })
    }

    /// Sends a payload and waits for the idle-timeout framed response.
    pub async fn send_with_response(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let writer = self.rx_writer().await?;
        self.log.line(&format!(
            "sending {} bytes, waiting for a reply...",
            payload.len()
        ));
        let reply = self.cmd.send(&writer, payload).await?;
        self.log.line(&format!("reply received ({} bytes)", reply.len()));
        Ok(reply)
    }

    /// UTF-8 convenience wrapper around [`send_with_response`](Self::send_with_response).
    pub async fn send_utf8_with_response(&self, text: &str) -> Result<Vec<u8>, Error> {
        self.send_with_response(text.as_bytes()).await
    }

    /// Fire-and-forget chunked write; no response is correlated and no
    /// idle timer is armed. Chunks are still written sequentially.
    pub async fn send(&self, payload: &[u8]) -> Result<(), Error> {
        let writer = self.rx_writer().await?;
        self.log.line(&format!(
            "starting transmission: {} bytes in {} chunk(s)...",
            payload.len(),
            payload.len().div_ceil(self.config.chunk_size.max(1))
        ));
        write_chunked(&writer, payload, self.config.chunk_size, || false).await?;
        self.log.line("all chunks sent");
        Ok(())
    }

    /// UTF-8 convenience wrapper around [`send`](Self::send).
    pub async fn send_utf8(&self, text: &str) -> Result<(), Error> {
        self.send(text.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn characteristic(uuid: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid: SERVICE_UUID,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn rx_requires_a_write_capability() {
        let config = TransportConfig::default();
        let chars = vec![characteristic(RX_UUID, CharPropFlags::NOTIFY)];
        let (rx, tx) = classify_characteristics(&chars, &config);
        assert!(rx.is_none());
        assert!(tx.is_none());
    }

    #[test]
    fn write_without_response_satisfies_rx() {
        let config = TransportConfig::default();
        let chars = vec![characteristic(
            RX_UUID,
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
        )];
        let (rx, _) = classify_characteristics(&chars, &config);
        assert_eq!(rx.unwrap().uuid, RX_UUID);
    }

    #[test]
    fn tx_is_matched_by_uuid_alone() {
        let config = TransportConfig::default();
        let chars = vec![
            characteristic(RX_UUID, CharPropFlags::WRITE),
            characteristic(TX_UUID, CharPropFlags::empty()),
        ];
        let (rx, tx) = classify_characteristics(&chars, &config);
        assert_eq!(rx.unwrap().uuid, RX_UUID);
        assert_eq!(tx.unwrap().uuid, TX_UUID);
    }

    #[test]
    fn first_match_wins_per_role() {
        let config = TransportConfig::default();
        let first = characteristic(RX_UUID, CharPropFlags::WRITE);
        let second = characteristic(RX_UUID, CharPropFlags::WRITE_WITHOUT_RESPONSE);
        let (rx, _) = classify_characteristics(&[first, second], &config);
        assert_eq!(rx.unwrap().properties, CharPropFlags::WRITE);
    }

    #[tokio::test]
    async fn cleared_link_keeps_no_bindings_or_tasks() {
        let mut link = Link::default();
        link.rx = Some(characteristic(RX_UUID, CharPropFlags::WRITE));
        link.tx = Some(characteristic(TX_UUID, CharPropFlags::NOTIFY));
        let notify = tokio::spawn(std::future::pending::<()>());
        let watch = tokio::spawn(std::future::pending::<()>());
        link.notify_task = Some(notify);
        link.watch_task = Some(watch);

        link.clear();

        assert!(link.device.is_none());
        assert!(link.rx.is_none());
        assert!(link.tx.is_none());
        assert!(link.notify_task.is_none());
        assert!(link.watch_task.is_none());

        // Idempotent, like an already-disconnected disconnect().
        link.clear();
        assert!(link.rx.is_none());
    }

    #[test]
    fn unrelated_characteristics_are_ignored() {
        let config = TransportConfig::default();
        let chars = vec![characteristic(
            Uuid::from_u128(0xdead_beef),
            CharPropFlags::WRITE | CharPropFlags::NOTIFY,
        )];
        let (rx, tx) = classify_characteristics(&chars, &config);
        assert!(rx.is_none());
        assert!(tx.is_none());
    }
}
