//! Gateway service: the hexagonal core.
//!
//! [`GatewayService`] owns the Rx/Tx state machines, the device list and
//! the command registry.  Everything is driven from [`GatewayService::tick`]
//! on one execution context; the serial line, clock and event sink are
//! injected at call sites so the whole service runs against mocks.
//!
//! ```text
//!  SerialPort ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                 │        GatewayService         │
//!   ClockPort ──▶ │ Rx · Tx · Devices · Commands  │ ──▶ ValuePublisher
//!                 └──────────────────────────────┘
//! ```

use alloc::format;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;
use core::mem;

use log::{debug, error, info, warn};
use serde_json::{Map, Value as Json, json};

use crate::command::{CommandFlags, CommandRegistry, CommandRet, Output, parse_command_string};
use crate::config::GatewayConfig;
use crate::device::library::{self, BOILER_ADDRESS, UBA_DEVICES_TYPE, VERSION_LENGTH, VERSION_TYPE};
use crate::device::{DeviceInfo, DeviceList, DeviceType, Dispatch, EmsDevice, circuit_from_id};
use crate::ems::crc::checksum;
use crate::ems::telegram::{FrameBytes, MAX_EXTENDED_PAYLOAD, MAX_PAYLOAD, MAX_TELEGRAM_LEN};
use crate::ems::{
    BusState, BusStatus, Dialect, RequestId, RxFrame, RxService, Telegram, TxEvent, TxOutcome, TxService, Watch,
    watch,
};
use crate::error::{self, CommandError, Error, TxFailure};

use super::commands;
use super::events::{GatewayEvent, HealthReport};
use super::ports::{ClockPort, EventSink, SerialPort, ValuePublisher};

const READ_CHUNK: usize = 64;

/// Upper bound on line reads per tick.
const MAX_READS_PER_TICK: usize = 8;

// ───────────────────────────────────────────────────────────────
// GatewayCore
// ───────────────────────────────────────────────────────────────

/// Bus, devices and request bookkeeping.  Command handlers receive
/// `&mut GatewayCore`.
pub struct GatewayCore {
    config: GatewayConfig,
    bus: BusState,
    rx: RxService,
    tx: TxService,
    devices: DeviceList,
    watch: Watch,
    status: BusStatus,
    /// Addresses already asked for their version.
    queried: Vec<u8>,
    /// Devices whose setters are not in the registry yet.
    unregistered: Vec<u8>,
    next_unique_id: u8,
    last_request: Option<RequestId>,
    publish_request: Option<Option<DeviceType>>,
    waiters: u8,
}

impl GatewayCore {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            bus: BusState::new(&config),
            rx: RxService::new(&config),
            tx: TxService::new(&config),
            devices: DeviceList::new(),
            watch: Watch::default(),
            status: BusStatus::Offline,
            queried: Vec::new(),
            unregistered: Vec::new(),
            next_unique_id: 1,
            last_request: None,
            publish_request: None,
            waiters: 0,
            config,
        }
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Pull line bytes, dispatch completed frames, advance Tx, re-evaluate
    /// health.
    pub fn tick<L: SerialPort + ClockPort>(&mut self, line: &mut L, sink: &mut impl EventSink) {
        let now = line.now_ms();

        let framed = line.delivers_frames();
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_TICK {
            match line.read(&mut buf) {
                Ok(0) => break,
                Ok(n) if framed => self.rx.feed_frame(&buf[..n], now),
                Ok(n) => self.rx.feed(&buf[..n], now),
                Err(e) => {
                    error!("Rx: line read failed: {:?}", e);
                    break;
                }
            }
            self.dispatch_frames(now, sink);
        }
        self.dispatch_frames(now, sink);

        let idle = self.rx.line_idle_ms(now);
        if let Some(event) = self.tx.service(now, idle, line) {
            self.on_tx_event(event, now, sink);
        }

        self.update_health(now, sink);
    }

    fn dispatch_frames(&mut self, now: u64, sink: &mut impl EventSink) {
        while let Some(frame) = self.rx.poll(now) {
            self.handle_frame(frame, now, sink);
        }
    }

    fn handle_frame(&mut self, frame: RxFrame, now: u64, sink: &mut impl EventSink) {
        match frame {
            RxFrame::Telegram { telegram, raw } => {
                if self.watch.wants_raw_telegram(&telegram) {
                    sink.emit(&GatewayEvent::Watch(watch::format_raw(&raw, None)));
                }
                self.handle_telegram(&telegram, now, sink);
            }
            RxFrame::Control(byte) => {
                if self.watch.wants_raw() {
                    sink.emit(&GatewayEvent::Watch(watch::format_raw(&[byte], None)));
                }
                if let Some(event) = self.tx.on_control(byte, now) {
                    self.on_tx_event(event, now, sink);
                }
            }
            RxFrame::Rejected { raw, error } => {
                if self.watch.wants_raw() {
                    let note = error.to_string();
                    sink.emit(&GatewayEvent::Watch(watch::format_raw(&raw, Some(&note))));
                }
            }
        }
    }

    fn handle_telegram(&mut self, telegram: &Telegram, now: u64, sink: &mut impl EventSink) {
        self.bus.mark_rx(now, telegram.is_extended());
        let known = self.devices.contains_address(telegram.src());

        if self.watch.wants_telegram(telegram, known) {
            let own = self.bus.bus_id();
            let line = watch::format_telegram(
                telegram,
                self.devices.address_name(telegram.src(), own),
                self.devices.address_name(telegram.dest_addr(), own),
                self.devices.handler_name(telegram),
            );
            sink.emit(&GatewayEvent::Watch(line));
        }

        if let Some(event) = self.tx.on_telegram(telegram) {
            self.on_tx_event(event, now, sink);
        }

        if telegram.type_id() == VERSION_TYPE && !known && self.on_version_reply(telegram, sink) {
            return;
        }

        let dispatch = self.devices.dispatch(telegram);
        if telegram.type_id() == UBA_DEVICES_TYPE && telegram.src() == BOILER_ADDRESS {
            self.on_device_bitmap(telegram);
        }
        if dispatch == Dispatch::UnknownSource
            && self.config.auto_discover
            && library::is_device_address(telegram.src())
        {
            self.request_version(telegram.src());
        }
    }

    fn on_tx_event(&mut self, event: TxEvent, now: u64, sink: &mut impl EventSink) {
        match event {
            TxEvent::Transmitted { .. } | TxEvent::Sent { .. } | TxEvent::Collision { .. } => {
                self.rx.note_line_activity(now);
            }
            TxEvent::Retrying { id, attempt } => {
                debug!("Tx: request {} attempt {}", id, attempt);
            }
            TxEvent::Acknowledged { id } => {
                debug!("Tx: request {} acked", id);
            }
            TxEvent::Validated { id, type_id } => {
                sink.emit(&GatewayEvent::RequestValidated { id, type_id });
            }
            TxEvent::Failed { id, type_id, reason } => {
                sink.emit(&GatewayEvent::RequestFailed { id, type_id, reason });
            }
        }
    }

    fn update_health(&mut self, now: u64, sink: &mut impl EventSink) {
        let timed_out = self.bus.timed_out(now, self.config.bus_timeout_ms);
        let poor_quality =
            self.rx.quality_settled() && self.rx.quality() < self.config.rx_min_quality_percent;
        let connected = !timed_out && !poor_quality;

        if self.bus.set_connected(connected) {
            if connected {
                info!("Bus: connected");
            } else if poor_quality {
                warn!("Bus: rx quality {}%, marking disconnected", self.rx.quality());
            } else {
                warn!("Bus: no valid telegram for {} ms", self.config.bus_timeout_ms);
            }
        }

        let status = BusStatus::evaluate(
            connected,
            self.tx.sent_count(),
            self.tx.fail_count(),
            self.config.tx_error_limit_percent,
        );
        if status != self.status {
            sink.emit(&GatewayEvent::BusStatusChanged {
                from: self.status,
                to: status,
            });
            self.status = status;
        }
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Register the sender of a version reply.  `false` when `telegram`
    /// is not a complete reply.
    fn on_version_reply(&mut self, telegram: &Telegram, sink: &mut impl EventSink) -> bool {
        let Some(version) = library::parse_version(telegram) else {
            return false;
        };
        let address = telegram.src();
        let Some(product) = library::lookup(version.product_id) else {
            warn!(
                "Discovery: unknown product {} at 0x{:02X}",
                version.product_id, address
            );
            sink.emit(&GatewayEvent::UnknownDevice {
                address,
                product_id: version.product_id,
            });
            return true;
        };
        if self.add_device(address, version.product_id, &version.version).is_some() {
            sink.emit(&GatewayEvent::DeviceDiscovered {
                device_type: product.device_type,
                address,
                product_id: version.product_id,
                name: product.name,
            });
        }
        true
    }

    fn on_device_bitmap(&mut self, telegram: &Telegram) {
        for address in library::present_addresses(telegram) {
            if address != self.bus.bus_id() && !self.devices.contains_address(address) {
                self.request_version(address);
            }
        }
    }

    /// Ask `address` for its version, once.
    fn request_version(&mut self, address: u8) -> bool {
        if self.queried.contains(&address) {
            return false;
        }
        self.queried.push(address);
        debug!("Discovery: asking 0x{:02X} for its version", address);
        Telegram::read_request(self.bus.bus_id(), address, VERSION_TYPE, 0, VERSION_LENGTH)
            .ok()
            .and_then(|t| self.tx.enqueue(t, true))
            .is_some()
    }

    /// Register a device by product id.  Returns its unique id, or
    /// `None` for unknown products and occupied addresses.
    pub fn add_device(&mut self, address: u8, product_id: u8, version: &str) -> Option<u8> {
        if self.devices.contains_address(address) {
            return None;
        }
        let product = library::lookup(product_id)?;
        let unique_id = self.next_unique_id;
        self.next_unique_id = self.next_unique_id.wrapping_add(1).max(1);

        info!(
            "Device: {} {} at 0x{:02X} (product {}, version {})",
            product.device_type, product.name, address, product_id, version
        );
        self.devices.add(EmsDevice::new(DeviceInfo {
            device_type: product.device_type,
            address,
            product_id,
            version: heapless::String::try_from(version).unwrap_or_default(),
            unique_id,
            flags: product.flags,
            name: product.name,
        }));
        self.unregistered.push(address);
        self.fetch_device(address);
        Some(unique_id)
    }

    /// Ask the boiler which addresses are present; each one is then
    /// queried for its version.
    pub fn scan_devices(&mut self) -> bool {
        self.queried.clear();
        info!("Discovery: scanning bus");
        self.enqueue_read(BOILER_ADDRESS, UBA_DEVICES_TYPE).is_some()
    }

    // ── Requests ──────────────────────────────────────────────

    fn enqueue_read(&mut self, address: u8, type_id: u16) -> Option<RequestId> {
        let length = (if type_id > 0xFF { MAX_EXTENDED_PAYLOAD } else { MAX_PAYLOAD }) as u8;
        let request = Telegram::read_request(self.bus.bus_id(), address, type_id, 0, length).ok()?;
        self.tx.enqueue(request, true)
    }

    fn fetch_device(&mut self, address: u8) -> usize {
        let Some(device) = self.devices.get(address) else {
            return 0;
        };
        let types: Vec<u16> = device.fetch_types().collect();
        let mut queued = 0;
        for type_id in types {
            if self.enqueue_read(address, type_id).is_some() {
                queued += 1;
            }
        }
        queued
    }

    /// Queue reads for every fetchable record of the matching devices.
    /// Returns the number of requests queued.
    pub fn fetch_values(&mut self, device_type: Option<DeviceType>) -> usize {
        let addresses: Vec<u8> = self
            .devices
            .iter()
            .filter(|d| device_type.is_none_or(|t| d.device_type() == t))
            .map(EmsDevice::address)
            .collect();
        let queued = addresses.into_iter().map(|a| self.fetch_device(a)).sum();
        debug!("Tx: fetch queued {} reads", queued);
        queued
    }

    /// Run a device setter and queue the resulting write.
    pub fn write_device_value(
        &mut self,
        device_type: DeviceType,
        name: &str,
        value: &str,
        id: i8,
    ) -> Result<RequestId, CommandError> {
        let device = self
            .devices
            .for_command(device_type, id)
            .ok_or(CommandError::NotFound)?;
        let command = device.command(name).ok_or(CommandError::NotFound)?;
        let circuit = circuit_from_id(id).or(device.circuit());
        let write = (command.setter)(device, value, circuit)?;
        let telegram = device.build_write(self.bus.bus_id(), &write)?;

        info!(
            "Command: {}/{} = {} -> type 0x{:02X} offset {}",
            device_type, name, value, write.type_id, write.offset
        );
        let request = self.tx.enqueue(telegram, true).ok_or(CommandError::Failed)?;
        self.last_request = Some(request);
        Ok(request)
    }

    /// Queue a raw telegram.  `bytes` is the frame without checksum; the
    /// source is replaced by our own bus id.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<RequestId, CommandError> {
        if bytes.len() < 4 || bytes.len() >= MAX_TELEGRAM_LEN {
            return Err(CommandError::InvalidValue);
        }
        let mut frame = FrameBytes::from_slice(bytes).map_err(|()| CommandError::InvalidValue)?;
        frame[0] = self.bus.bus_id();
        let crc = checksum(&frame);
        frame.push(crc).map_err(|_| CommandError::InvalidValue)?;
        let telegram = Telegram::parse(&frame).map_err(|_| CommandError::InvalidValue)?;

        info!("Tx: raw send {}", telegram);
        let expects_response = !telegram.is_broadcast();
        let request = self
            .tx
            .enqueue(telegram, expects_response)
            .ok_or(CommandError::Failed)?;
        self.last_request = Some(request);
        Ok(request)
    }

    pub fn request_publish(&mut self, device_type: Option<DeviceType>) {
        self.publish_request = Some(device_type);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn bus(&self) -> &BusState {
        &self.bus
    }

    pub fn rx(&self) -> &RxService {
        &self.rx
    }

    pub fn tx(&self) -> &TxService {
        &self.tx
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    pub fn watch(&self) -> &Watch {
        &self.watch
    }

    pub fn watch_mut(&mut self) -> &mut Watch {
        &mut self.watch
    }

    pub fn bus_status(&self) -> BusStatus {
        self.status
    }

    /// Synchronous callers currently inside `wait_validate`.
    pub fn waiters(&self) -> u8 {
        self.waiters
    }

    pub fn enter_wait(&mut self) {
        self.waiters = self.waiters.saturating_add(1);
    }

    pub fn leave_wait(&mut self) {
        self.waiters = self.waiters.saturating_sub(1);
    }

    /// Pin the outcome of `id` until [`release_outcome`](Self::release_outcome).
    pub fn hold_outcome(&mut self, id: RequestId) {
        if !self.tx.hold_outcome(id) {
            warn!("Tx: too many held outcomes, request {} may age out", id);
        }
    }

    pub fn release_outcome(&mut self, id: RequestId) {
        self.tx.release_outcome(id);
    }

    pub fn health(&self) -> HealthReport {
        let protocol = if self.bus.dialect() == Dialect::EmsPlus || self.bus.ems_plus_seen() {
            "EMS+"
        } else {
            "EMS"
        };
        HealthReport {
            bus_status: self.status,
            bus_id: self.bus.bus_id(),
            bus_protocol: protocol,
            rx_received: self.rx.telegram_count(),
            rx_fails: self.rx.error_count(),
            rx_quality: self.rx.quality(),
            tx_reads: self.tx.read_count(),
            tx_writes: self.tx.write_count(),
            tx_fails: self.tx.fail_count(),
            tx_collisions: self.tx.collision_count(),
            tx_quality: self.tx.quality(),
            tx_queue: self.tx.queue_len(),
            devices: self.devices.len(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// GatewayService
// ───────────────────────────────────────────────────────────────

/// The gateway: core state plus the command registry.
pub struct GatewayService {
    core: GatewayCore,
    commands: CommandRegistry<GatewayCore>,
}

impl GatewayService {
    pub fn new(config: GatewayConfig) -> Self {
        let mut registry = CommandRegistry::new();
        commands::register_system_commands(&mut registry);
        info!(
            "Gateway: bus id 0x{:02X}, dialect {:?}, tx {}",
            config.bus_id,
            config.dialect,
            if config.tx_enabled { "on" } else { "listen-only" }
        );
        Self {
            core: GatewayCore::new(config),
            commands: registry,
        }
    }

    pub fn core(&self) -> &GatewayCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut GatewayCore {
        &mut self.core
    }

    pub fn commands(&self) -> &CommandRegistry<GatewayCore> {
        &self.commands
    }

    pub fn health(&self) -> HealthReport {
        self.core.health()
    }

    /// One cooperative iteration.
    pub fn tick<L: SerialPort + ClockPort>(&mut self, line: &mut L, sink: &mut impl EventSink) {
        self.core.tick(line, sink);
        self.register_device_commands();
    }

    pub fn add_device(&mut self, address: u8, product_id: u8, version: &str) -> Option<u8> {
        let unique_id = self.core.add_device(address, product_id, version);
        self.register_device_commands();
        unique_id
    }

    fn register_device_commands(&mut self) {
        for address in mem::take(&mut self.core.unregistered) {
            let Some(device) = self.core.devices.get(address) else {
                continue;
            };
            for command in device.commands() {
                self.commands.add(
                    device.device_type(),
                    command.name,
                    commands::device_command,
                    command.description,
                    CommandFlags::ADMIN_ONLY | CommandFlags::SUBSCRIBE,
                );
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────

    /// Run a command.  `commands` lists what `device_type` offers.
    pub fn call(
        &mut self,
        device_type: DeviceType,
        cmd: &str,
        value: &str,
        authenticated: bool,
        id: i8,
        output: &mut Output,
    ) -> CommandRet {
        if cmd.eq_ignore_ascii_case("commands") {
            self.commands.list(device_type, output);
            return CommandRet::Ok;
        }
        self.commands
            .call(&mut self.core, device_type, cmd, value, authenticated, id, output)
    }

    /// Write-value entry point: parse a circuit prefix, run the command,
    /// then wait for the bus to confirm any write it queued.
    pub fn write_value<L: SerialPort + ClockPort>(
        &mut self,
        device_type: DeviceType,
        cmd: &str,
        value: &str,
        line: &mut L,
        sink: &mut impl EventSink,
        output: &mut Output,
    ) -> CommandRet {
        let result = self.set_value(device_type, cmd, value, line, sink, output);
        report_write(device_type, cmd, result, output)
    }

    /// [`write_value`](Self::write_value) with a typed result.
    pub fn set_value<L: SerialPort + ClockPort>(
        &mut self,
        device_type: DeviceType,
        cmd: &str,
        value: &str,
        line: &mut L,
        sink: &mut impl EventSink,
        output: &mut Output,
    ) -> error::Result<()> {
        let mut id = -1;
        let name = parse_command_string(cmd, &mut id);
        self.take_last_request();

        self.call(device_type, name, value, true, id, output).into_result()?;
        let Some(request) = self.take_last_request() else {
            return Ok(());
        };
        outcome_result(self.wait_validate(request, self.validate_timeout_ms(), line, sink))
    }

    /// Deadline covering every retry of one request.
    pub fn validate_timeout_ms(&self) -> u64 {
        let config = self.core.config();
        u64::from(config.tx_response_timeout_ms) * (u64::from(config.tx_retry_limit) + 1)
    }

    /// Pump the bus until request `id` resolves or `timeout_ms` passes.
    ///
    /// Returns the last known outcome; a non-final one means the deadline
    /// hit first.
    pub fn wait_validate<L: SerialPort + ClockPort>(
        &mut self,
        id: RequestId,
        timeout_ms: u64,
        line: &mut L,
        sink: &mut impl EventSink,
    ) -> TxOutcome {
        self.core.enter_wait();
        self.core.hold_outcome(id);
        let deadline = line.now_ms().saturating_add(timeout_ms);
        let outcome = loop {
            self.tick(line, sink);
            match self.core.tx.outcome(id) {
                Some(outcome) if outcome.is_final() => break outcome,
                Some(outcome) if line.now_ms() >= deadline => break outcome,
                Some(_) => core::hint::spin_loop(),
                None => break TxOutcome::Failed(TxFailure::Dropped),
            }
        };
        self.core.release_outcome(id);
        self.core.leave_wait();
        outcome
    }

    /// Request queued by the most recent command, if any.
    pub fn take_last_request(&mut self) -> Option<RequestId> {
        self.core.last_request.take()
    }

    // ── Publishing ────────────────────────────────────────────

    /// Publish changed values (all values when `force`), one
    /// `<type>_data` topic per device type.  Deferred while a caller
    /// waits for a write to validate.  Returns the topics published.
    pub fn publish_values(&mut self, publisher: &mut impl ValuePublisher, force: bool) -> usize {
        if self.core.waiters > 0 && !force {
            return 0;
        }
        self.publish_types(None, force, publisher)
    }

    /// Serve a `publish` command queued since the last call.
    pub fn publish_pending(&mut self, publisher: &mut impl ValuePublisher) -> usize {
        match self.core.publish_request.take() {
            Some(filter) => self.publish_types(filter, true, publisher),
            None => 0,
        }
    }

    fn publish_types(
        &mut self,
        filter: Option<DeviceType>,
        force: bool,
        publisher: &mut impl ValuePublisher,
    ) -> usize {
        let mut topics = 0;
        for device_type in DeviceType::ALL {
            if device_type == DeviceType::System || filter.is_some_and(|f| f != device_type) {
                continue;
            }
            let mut out = Map::new();
            let mut any = false;
            for device in self
                .core
                .devices
                .iter_mut()
                .filter(|d| d.device_type() == device_type)
            {
                any |= device.publish_values(&mut out, force);
            }
            if any {
                let topic = format!("{}_data", device_type.name());
                publisher.publish(&topic, &Json::Object(out));
                topics += 1;
            }
        }
        topics
    }

    // ── Device data ───────────────────────────────────────────

    /// Values of the device with `unique_id` for the web UI.
    pub fn generate_values_web(&self, unique_id: u8, out: &mut Map<alloc::string::String, Json>) -> bool {
        match self
            .core
            .devices
            .iter()
            .find(|d| d.info().unique_id == unique_id)
        {
            Some(device) => {
                device.generate_values_web(out);
                true
            }
            None => false,
        }
    }

    /// One console line per device of `device_type`.
    pub fn show_telegram_handlers(&self, device_type: DeviceType, out: &mut impl fmt::Write) -> fmt::Result {
        for device in self.core.devices.of_type(device_type) {
            write!(out, "{} (0x{:02X}): ", device.info().name, device.address())?;
            device.show_telegram_handlers(out)?;
            out.write_char('\n')?;
        }
        Ok(())
    }
}

/// Map a finished wait to the caller's result; a non-final outcome means
/// the deadline passed first.
pub(crate) fn outcome_result(outcome: TxOutcome) -> error::Result<()> {
    match outcome {
        TxOutcome::Validated | TxOutcome::Sent => Ok(()),
        TxOutcome::Failed(reason) => Err(reason.into()),
        TxOutcome::Queued | TxOutcome::InFlight => Err(TxFailure::ValidationTimeout.into()),
    }
}

/// Fold a typed write result into the command call contract.  Command
/// errors already carry their message from the registry.
pub(crate) fn report_write(
    device_type: DeviceType,
    cmd: &str,
    result: error::Result<()>,
    output: &mut Output,
) -> CommandRet {
    match result {
        Ok(()) => CommandRet::Ok,
        Err(Error::Command(e)) => CommandRet::from(Err(e)),
        Err(e) => {
            let mut id = -1;
            let name = parse_command_string(cmd, &mut id);
            output.insert(
                "message".to_string(),
                json!(format!("{}/{}: {}", device_type, name, e)),
            );
            CommandRet::Error
        }
    }
}
