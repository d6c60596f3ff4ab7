//! Simulated EMS bus for integration tests.
//!
//! [`MockLine`] plays every device on the line: it answers version
//! requests, serves record reads from a per-device byte map, applies
//! writes and acknowledges them with a lone 0x01 byte, the way a real
//! device does; the gateway has to read the record back.  The clock advances one
//! millisecond each time the gateway looks at it, so any loop that keeps
//! ticking eventually reaches its deadline.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};

use emsgate::app::events::GatewayEvent;
use emsgate::app::ports::{ClockPort, EventSink, SerialPort, ValuePublisher};
use emsgate::app::service::GatewayService;
use emsgate::ems::rx::RxState;
use emsgate::ems::tx::WRITE_ACK;
use emsgate::ems::{Dialect, Telegram};
use serde_json::Value;

pub const GATEWAY_ID: u8 = 0x0B;

/// Delay between one of our requests and the device's answer.
const REPLY_DELAY_MS: u64 = 8;
/// Minimum silence the line keeps between two inbound frames.
const FRAME_SPACING_MS: u64 = 6;

// ── Simulated device ──────────────────────────────────────────

pub struct SimDevice {
    pub product_id: u8,
    pub records: HashMap<u16, Vec<u8>>,
}

impl SimDevice {
    pub fn new(product_id: u8) -> Self {
        Self {
            product_id,
            records: HashMap::new(),
        }
    }

    pub fn with_record(mut self, type_id: u16, data: &[u8]) -> Self {
        self.records.insert(type_id, data.to_vec());
        self
    }
}

// ── MockLine ──────────────────────────────────────────────────

pub struct MockLine {
    now: Cell<u64>,
    inbound: VecDeque<(u64, Vec<u8>)>,
    last_delivery: Option<u64>,
    pub sent: Vec<Vec<u8>>,
    pub devices: HashMap<u8, SimDevice>,
    /// Corrupt the echo of this many upcoming transmissions.
    pub collisions: usize,
    /// Devices stop answering.
    pub silent: bool,
    /// Hand out whole frames back to back, as a break-splitting driver
    /// does.
    pub framed: bool,
}

#[allow(dead_code)]
impl MockLine {
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            inbound: VecDeque::new(),
            last_delivery: None,
            sent: Vec::new(),
            devices: HashMap::new(),
            collisions: 0,
            silent: false,
            framed: false,
        }
    }

    pub fn with_device(mut self, address: u8, device: SimDevice) -> Self {
        self.devices.insert(address, device);
        self
    }

    pub fn elapsed(&self) -> u64 {
        self.now.get()
    }

    /// Queue raw bytes for delivery as soon as possible.
    pub fn inject(&mut self, bytes: &[u8]) {
        let at = self.now.get();
        self.inbound.push_back((at, bytes.to_vec()));
    }

    /// Queue a telegram some device puts on the line.
    pub fn inject_telegram(&mut self, src: u8, dest: u8, type_id: u16, offset: u8, data: &[u8]) {
        let frame = encode(src, dest, type_id, offset, data);
        self.inject(&frame);
    }

    /// Frames we transmitted that carry `type_id`.
    pub fn sent_of_type(&self, type_id: u16) -> Vec<Telegram> {
        self.sent
            .iter()
            .filter_map(|f| Telegram::parse(f).ok())
            .filter(|t| t.type_id() == type_id)
            .collect()
    }

    fn answer(&mut self, request: &Telegram) -> Option<Vec<u8>> {
        if self.silent || request.src() != GATEWAY_ID {
            return None;
        }
        let address = request.dest_addr();
        let device = self.devices.get_mut(&address)?;
        let type_id = request.type_id();
        let offset = usize::from(request.offset());

        if request.is_write() {
            let record = device.records.entry(type_id).or_default();
            let end = offset + request.payload().len();
            if record.len() < end {
                record.resize(end, 0);
            }
            record[offset..end].copy_from_slice(request.payload());
            return Some(vec![WRITE_ACK]);
        }

        let data = if type_id == 0x02 {
            vec![device.product_id, 1, 2]
        } else {
            let record = device.records.get(&type_id).cloned().unwrap_or_default();
            let wanted = usize::from(request.payload().first().copied().unwrap_or(0));
            record.into_iter().skip(offset).take(wanted).collect()
        };
        Some(encode(address, GATEWAY_ID, type_id, request.offset(), &data))
    }
}

pub fn encode(src: u8, dest: u8, type_id: u16, offset: u8, data: &[u8]) -> Vec<u8> {
    Telegram::new(src, dest, type_id, offset, data)
        .and_then(|t| t.serialize(Dialect::EmsPlus))
        .expect("test telegram must encode")
        .to_vec()
}

impl SerialPort for MockLine {
    type Error = ();

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ()> {
        let now = self.now.get();
        if !self.framed
            && self
                .last_delivery
                .is_some_and(|at| now < at + FRAME_SPACING_MS)
        {
            return Ok(0);
        }
        match self.inbound.front() {
            Some((at, _)) if *at <= now => {}
            _ => return Ok(0),
        }
        let Some((_, frame)) = self.inbound.pop_front() else {
            return Ok(0);
        };
        buf[..frame.len()].copy_from_slice(&frame);
        self.last_delivery = Some(now);
        Ok(frame.len())
    }

    fn delivers_frames(&self) -> bool {
        self.framed
    }

    fn transmit(&mut self, frame: &[u8], echo: &mut [u8]) -> Result<usize, ()> {
        echo[..frame.len()].copy_from_slice(frame);
        if self.collisions > 0 {
            self.collisions -= 1;
            echo[0] ^= 0xFF;
            return Ok(frame.len());
        }
        self.sent.push(frame.to_vec());
        if let Ok(request) = Telegram::parse(frame) {
            if let Some(reply) = self.answer(&request) {
                let at = self.now.get() + REPLY_DELAY_MS;
                self.inbound.push_back((at, reply));
            }
        }
        Ok(frame.len())
    }
}

impl ClockPort for MockLine {
    fn now_ms(&self) -> u64 {
        let t = self.now.get() + 1;
        self.now.set(t);
        t
    }
}

// ── Event and publish capture ─────────────────────────────────

#[derive(Default)]
pub struct EventLog {
    pub events: Vec<GatewayEvent>,
}

#[allow(dead_code)]
impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_lines(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::Watch(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: &GatewayEvent) {
        self.events.push(event.clone());
    }
}

#[derive(Default)]
pub struct Topics {
    pub published: Vec<(String, Value)>,
}

impl ValuePublisher for Topics {
    fn publish(&mut self, topic: &str, payload: &Value) {
        self.published.push((topic.to_string(), payload.clone()));
    }
}

// ── Driving helpers ───────────────────────────────────────────

/// Tick until `ms` of simulated time have passed.
pub fn run_for(service: &mut GatewayService, line: &mut MockLine, sink: &mut EventLog, ms: u64) {
    let until = line.elapsed() + ms;
    while line.elapsed() < until {
        service.tick(line, sink);
    }
}

/// Tick until the Tx queue drains (bounded).
#[allow(dead_code)]
pub fn run_until_idle(service: &mut GatewayService, line: &mut MockLine, sink: &mut EventLog) {
    let limit = line.elapsed() + 60_000;
    while line.elapsed() < limit {
        service.tick(line, sink);
        if service.core().tx().is_idle()
            && line.inbound.is_empty()
            && service.core().rx().state() == RxState::Idle
        {
            return;
        }
    }
    panic!("bus never went idle");
}
