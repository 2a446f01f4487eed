//! Scripted BLE peripheral that behaves like a Bluefruit module running the
//! legacy DFU bootloader.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use uuid::Uuid;

use crate::device_info::{
    DEVICE_INFORMATION_SERVICE_UUID, FIRMWARE_REVISION_UUID, MANUFACTURER_NAME_UUID,
    MODEL_NUMBER_UUID, SOFTWARE_REVISION_UUID,
};
use crate::dfu::config::{
    DFU_CONTROL_POINT_UUID, DFU_PACKET_UUID, DFU_SERVICE_UUID, DFU_VERSION_UUID,
};
use crate::traits::{Central, LinkError, Notifications, PeripheralConnection, WriteKind};

/// Device Information Service contents
#[derive(Debug, Clone)]
pub struct FakeDeviceInfo {
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
}

impl Default for FakeDeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: Some("Adafruit Industries".to_string()),
            model_number: Some("BLEFRIEND32".to_string()),
            firmware_revision: Some("0.6.5, 0.1".to_string()),
            software_revision: Some("S110 8.0.0".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeOptions {
    pub in_bootloader: bool,
    pub dfu_service: bool,
    /// Fail every connection attempt
    pub refuse_connection: bool,
    pub device_info: Option<FakeDeviceInfo>,
    /// Never answer service discovery
    pub stall_discovery: bool,
    /// Send packet receipt notifications
    pub send_receipts: bool,
    /// Bytes under-reported in every receipt
    pub receipt_shortfall: u32,
    /// Number of packet writes that fail before writes succeed (`usize::MAX`: all)
    pub packet_failures: usize,
    /// Status byte answered to Validate
    pub validate_status: u8,
    /// Skip the image-received response
    pub silent_after_image: bool,
    /// Added to the byte count in the received-size report
    pub reported_size_delta: i64,
}

impl FakeOptions {
    /// Application firmware with buttonless DFU
    pub fn application() -> Self {
        Self {
            in_bootloader: false,
            dfu_service: true,
            refuse_connection: false,
            device_info: Some(FakeDeviceInfo::default()),
            stall_discovery: false,
            send_receipts: true,
            receipt_shortfall: 0,
            packet_failures: 0,
            validate_status: 0x01,
            silent_after_image: false,
            reported_size_delta: 0,
        }
    }

    /// Already running the bootloader
    pub fn bootloader() -> Self {
        Self {
            in_bootloader: true,
            ..Self::application()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketSink {
    Ignore,
    ImageSizes,
    InitPacket,
    Image,
}

#[derive(Debug)]
struct FakeState {
    connected: bool,
    in_bootloader: bool,
    notifier: Option<UnboundedSender<Vec<u8>>>,
    sink: PacketSink,
    sizes: Vec<u8>,
    expected_image_size: usize,
    init_packet: Vec<u8>,
    image: Vec<u8>,
    image_packets: usize,
    packets_since_receipt: u16,
    receipt_interval: u16,
    receipts_sent: usize,
    control_point_writes: Vec<Vec<u8>>,
    activated: bool,
}

pub struct FakeDfuPeripheral {
    options: FakeOptions,
    state: Mutex<FakeState>,
    packet_attempts: AtomicUsize,
    remaining_packet_failures: AtomicUsize,
}

impl FakeDfuPeripheral {
    pub fn new(options: FakeOptions) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                connected: false,
                in_bootloader: options.in_bootloader,
                notifier: None,
                sink: PacketSink::Ignore,
                sizes: Vec::new(),
                expected_image_size: 0,
                init_packet: Vec::new(),
                image: Vec::new(),
                image_packets: 0,
                packets_since_receipt: 0,
                receipt_interval: 0,
                receipts_sent: 0,
                control_point_writes: Vec::new(),
                activated: false,
            }),
            packet_attempts: AtomicUsize::new(0),
            remaining_packet_failures: AtomicUsize::new(options.packet_failures),
            options,
        })
    }

    /// Push a raw control point notification
    pub fn notify(&self, value: Vec<u8>) {
        let state = self.state.lock().unwrap();
        Self::send(&state, value);
    }

    pub fn received_image(&self) -> Vec<u8> {
        self.state.lock().unwrap().image.clone()
    }

    pub fn received_init_packet(&self) -> Vec<u8> {
        self.state.lock().unwrap().init_packet.clone()
    }

    pub fn image_packets(&self) -> usize {
        self.state.lock().unwrap().image_packets
    }

    pub fn receipts_sent(&self) -> usize {
        self.state.lock().unwrap().receipts_sent
    }

    pub fn packet_write_attempts(&self) -> usize {
        self.packet_attempts.load(Ordering::SeqCst)
    }

    pub fn control_point_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().control_point_writes.clone()
    }

    pub fn activated(&self) -> bool {
        self.state.lock().unwrap().activated
    }

    pub fn abort_received(&self) -> bool {
        self.control_point_writes().iter().any(|w| w == &[0x06])
    }

    fn send(state: &FakeState, value: Vec<u8>) {
        if let Some(tx) = &state.notifier {
            let _ = tx.send(value);
        }
    }

    fn respond(state: &FakeState, request: u8, status: u8) {
        Self::send(state, vec![0x10, request, status]);
    }

    fn handle_command(&self, state: &mut FakeState, command: &[u8]) {
        state.control_point_writes.push(command.to_vec());

        if !state.in_bootloader {
            if command == [0x01, 0x04] {
                // Buttonless jump: reset into the bootloader.
                state.in_bootloader = true;
                state.connected = false;
                state.notifier = None;
            }
            return;
        }

        match command {
            [0x01, _] => {
                state.sink = PacketSink::ImageSizes;
                state.sizes.clear();
            }
            [0x02, 0x00] => state.sink = PacketSink::InitPacket,
            [0x02, 0x01] => {
                state.sink = PacketSink::Ignore;
                Self::respond(state, 0x02, 0x01);
            }
            [0x08, lo, hi] => state.receipt_interval = u16::from_le_bytes([*lo, *hi]),
            [0x03] => state.sink = PacketSink::Image,
            [0x07] => {
                let mut response = vec![0x10, 0x07, 0x01];
                let reported = state.image.len() as i64 + self.options.reported_size_delta;
                response.extend_from_slice(&(reported.max(0) as u32).to_le_bytes());
                Self::send(state, response);
            }
            [0x04] => Self::respond(state, 0x04, self.options.validate_status),
            [0x05] => {
                state.activated = true;
                state.connected = false;
                state.notifier = None;
            }
            _ => {}
        }
    }

    fn handle_packet(&self, state: &mut FakeState, data: &[u8]) {
        match state.sink {
            PacketSink::Ignore => {}
            PacketSink::ImageSizes => {
                state.sizes.extend_from_slice(data);
                if state.sizes.len() >= 12 {
                    let app = &state.sizes[8..12];
                    state.expected_image_size =
                        u32::from_le_bytes([app[0], app[1], app[2], app[3]]) as usize;
                    state.sink = PacketSink::Ignore;
                    Self::respond(state, 0x01, 0x01);
                }
            }
            PacketSink::InitPacket => state.init_packet.extend_from_slice(data),
            PacketSink::Image => {
                state.image.extend_from_slice(data);
                state.image_packets += 1;
                state.packets_since_receipt += 1;

                if self.options.send_receipts
                    && state.receipt_interval > 0
                    && state.packets_since_receipt == state.receipt_interval
                {
                    state.packets_since_receipt = 0;
                    state.receipts_sent += 1;
                    let reported =
                        (state.image.len() as u32).saturating_sub(self.options.receipt_shortfall);
                    let mut receipt = vec![0x11];
                    receipt.extend_from_slice(&reported.to_le_bytes());
                    Self::send(state, receipt);
                }

                if state.image.len() >= state.expected_image_size {
                    state.sink = PacketSink::Ignore;
                    if !self.options.silent_after_image {
                        Self::respond(state, 0x03, 0x01);
                    }
                }
            }
        }
    }

    fn take_packet_failure(&self) -> bool {
        self.remaining_packet_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl PeripheralConnection for FakeDfuPeripheral {
    fn id(&self) -> String {
        "fake-dfu-0001".to_string()
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn connect(&self) -> Result<(), LinkError> {
        if self.options.refuse_connection {
            return Err(LinkError::Operation("connection refused".to_string()));
        }
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.notifier = None;
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, LinkError> {
        if !self.state.lock().unwrap().connected {
            return Err(LinkError::NotConnected);
        }
        if self.options.stall_discovery {
            std::future::pending::<()>().await;
        }
        let mut services = Vec::new();
        if self.options.dfu_service {
            services.push(DFU_SERVICE_UUID);
        }
        if self.options.device_info.is_some() {
            services.push(DEVICE_INFORMATION_SERVICE_UUID);
        }
        Ok(services)
    }

    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Uuid>, LinkError> {
        if service == DFU_SERVICE_UUID {
            return Ok(vec![DFU_CONTROL_POINT_UUID, DFU_PACKET_UUID, DFU_VERSION_UUID]);
        }
        let Some(dis) = &self.options.device_info else {
            return Ok(Vec::new());
        };
        let mut characteristics = Vec::new();
        for (uuid, value) in [
            (MANUFACTURER_NAME_UUID, &dis.manufacturer),
            (MODEL_NUMBER_UUID, &dis.model_number),
            (FIRMWARE_REVISION_UUID, &dis.firmware_revision),
            (SOFTWARE_REVISION_UUID, &dis.software_revision),
        ] {
            if value.is_some() {
                characteristics.push(uuid);
            }
        }
        Ok(characteristics)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, LinkError> {
        let state = self.state.lock().unwrap();
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        if characteristic == DFU_VERSION_UUID {
            let version: u16 = if state.in_bootloader { 0x0008 } else { 0x0001 };
            return Ok(version.to_le_bytes().to_vec());
        }
        let dis = self.options.device_info.clone().unwrap_or(FakeDeviceInfo {
            manufacturer: None,
            model_number: None,
            firmware_revision: None,
            software_revision: None,
        });
        let value = match characteristic {
            c if c == MANUFACTURER_NAME_UUID => dis.manufacturer,
            c if c == MODEL_NUMBER_UUID => dis.model_number,
            c if c == FIRMWARE_REVISION_UUID => dis.firmware_revision,
            c if c == SOFTWARE_REVISION_UUID => dis.software_revision,
            _ => None,
        };
        value
            .map(String::into_bytes)
            .ok_or(LinkError::CharacteristicNotFound(characteristic))
    }

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        _kind: WriteKind,
    ) -> Result<(), LinkError> {
        if characteristic == DFU_PACKET_UUID {
            self.packet_attempts.fetch_add(1, Ordering::SeqCst);
            if self.take_packet_failure() {
                return Err(LinkError::Operation("write queue full".to_string()));
            }
        }

        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        match characteristic {
            c if c == DFU_CONTROL_POINT_UUID => self.handle_command(&mut state, data),
            c if c == DFU_PACKET_UUID => self.handle_packet(&mut state, data),
            other => return Err(LinkError::CharacteristicNotFound(other)),
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<Notifications, LinkError> {
        if characteristic != DFU_CONTROL_POINT_UUID {
            return Err(LinkError::CharacteristicNotFound(characteristic));
        }
        let (tx, rx) = unbounded_channel();
        self.state.lock().unwrap().notifier = Some(tx);
        Ok(rx)
    }
}

/// Central that finds the same fake peripheral again after it resets
pub struct FakeCentral {
    peripheral: Arc<FakeDfuPeripheral>,
    visible: bool,
    lookups: AtomicUsize,
}

impl FakeCentral {
    pub fn new(peripheral: Arc<FakeDfuPeripheral>) -> Self {
        Self {
            peripheral,
            visible: true,
            lookups: AtomicUsize::new(0),
        }
    }

    /// A central that never sees the peripheral advertise
    pub fn hidden(peripheral: Arc<FakeDfuPeripheral>) -> Self {
        Self {
            visible: false,
            ..Self::new(peripheral)
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Central for FakeCentral {
    async fn find(&self, id: &str) -> Result<Option<Arc<dyn PeripheralConnection>>, LinkError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.visible && id == self.peripheral.id() {
            let found: Arc<dyn PeripheralConnection> = self.peripheral.clone();
            Ok(Some(found))
        } else {
            Ok(None)
        }
    }
}
