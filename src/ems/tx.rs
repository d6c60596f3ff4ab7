//! Transmit path: request queue, collision handling, validation.
//!
//! ```text
//!  enqueue ──▶ [ FIFO queue ] ──▶ pending (≤ 1) ──transmit──▶ echo ok?
//!                                     ▲   │                    │  │
//!                       backoff ◀─────┘   │ no               yes  │
//!                    (collision)  ◀───────┘                       ▼
//!                                            expects_response? ── no ──▶ Sent
//!                                                   │ yes
//!                                                   ▼
//!                          matching response ──▶ Validated
//!                          write ack (0x01) ──▶ read-back ──▶ matching response
//!                          write nack (0x04) / timeout ──▶ retry … ──▶ Failed
//! ```
//!
//! At most one request is in flight.  A transmission starts only after
//! the line has been quiet for `tx_min_idle_ms` and any collision
//! backoff has run out.  Our own bytes come back as an echo; an echo that
//! differs from what was sent is a collision.
//!
//! A device answers a write with a single ack byte, not with data.  The
//! ack turns the pending write into a read of the bytes just written,
//! and the answer to that read validates the write.

use heapless::{Deque, Vec};
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::bus::Dialect;
use super::telegram::{MAX_TELEGRAM_LEN, Telegram};
use crate::app::ports::SerialPort;
use crate::config::GatewayConfig;
use crate::error::TxFailure;

/// Requests the queue holds besides the one in flight.
pub const TX_QUEUE_CAPACITY: usize = 32;

const OUTCOME_LOG: usize = 16;

/// Outcomes that waiting callers can pin in the log at once.
const HELD_OUTCOMES: usize = 8;

/// Single-byte answer of a device that accepted a write.
pub const WRITE_ACK: u8 = 0x01;
/// Single-byte answer of a device that refused a write.
pub const WRITE_NACK: u8 = 0x04;

pub type RequestId = u16;

/// Lifecycle of one request as seen by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Queued,
    InFlight,
    /// Transmitted cleanly; no response was expected.
    Sent,
    /// The target answered.
    Validated,
    Failed(TxFailure),
}

impl TxOutcome {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Sent | Self::Validated | Self::Failed(_))
    }
}

/// What a response to a request must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSignature {
    pub src: u8,
    pub dest: u8,
    pub type_id: u16,
}

impl ResponseSignature {
    /// The answer `request` provokes: target back to the sender, same type.
    pub fn for_request(request: &Telegram) -> Self {
        Self {
            src: request.dest_addr(),
            dest: request.src(),
            type_id: request.type_id(),
        }
    }

    pub fn matches(&self, telegram: &Telegram) -> bool {
        telegram.src() == self.src
            && telegram.dest_addr() == self.dest
            && telegram.type_id() == self.type_id
    }
}

/// Something the Tx service did during one `service` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    /// Transmitted with a clean echo.
    Transmitted { id: RequestId, attempt: u8 },
    /// Echo mismatch; retrying after the backoff.
    Collision { id: RequestId, backoff_ms: u32 },
    /// Response window elapsed or the write was refused; the request
    /// goes out again.
    Retrying { id: RequestId, attempt: u8 },
    /// The target acked a write; its read-back is next.
    Acknowledged { id: RequestId },
    /// Request finished without a response being expected.
    Sent { id: RequestId, type_id: u16 },
    Validated { id: RequestId, type_id: u16 },
    Failed { id: RequestId, type_id: u16, reason: TxFailure },
}

#[derive(Debug, Clone)]
struct QueuedRequest {
    id: RequestId,
    telegram: Telegram,
    expects_response: bool,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Waiting for the line (and backoff) before transmitting.
    Ready { not_before_ms: u64 },
    /// Transmitted; waiting for the response.
    Awaiting { deadline_ms: u64 },
}

#[derive(Debug, Clone)]
struct PendingRequest {
    request: QueuedRequest,
    attempts: u8,
    collisions: u8,
    expected: ResponseSignature,
    /// Read of the written bytes, set once the write was acked.
    read_back: Option<Telegram>,
    phase: Phase,
}

pub struct TxService {
    queue: Deque<QueuedRequest, TX_QUEUE_CAPACITY>,
    pending: Option<PendingRequest>,
    outcomes: Deque<(RequestId, TxOutcome), OUTCOME_LOG>,
    held: Vec<RequestId, HELD_OUTCOMES>,
    next_id: RequestId,

    enabled: bool,
    dialect: Dialect,
    min_idle_ms: u64,
    response_timeout_ms: u64,
    retry_limit: u8,
    backoff_base_ms: u32,
    backoff_max_ms: u32,
    collision_limit: u8,
    rng: SmallRng,

    read_count: u32,
    write_count: u32,
    fail_count: u32,
    collision_count: u32,
}

impl TxService {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            queue: Deque::new(),
            pending: None,
            outcomes: Deque::new(),
            held: Vec::new(),
            next_id: 1,
            enabled: config.tx_enabled,
            dialect: config.dialect,
            min_idle_ms: u64::from(config.tx_min_idle_ms),
            response_timeout_ms: u64::from(config.tx_response_timeout_ms),
            retry_limit: config.tx_retry_limit,
            backoff_base_ms: config.tx_backoff_base_ms,
            backoff_max_ms: config.tx_backoff_max_ms,
            collision_limit: config.tx_collision_limit,
            rng: SmallRng::seed_from_u64(config.rng_seed),
            read_count: 0,
            write_count: 0,
            fail_count: 0,
            collision_count: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queue a request.  Returns its id, or `None` when refused.
    ///
    /// A full queue makes room by dropping its oldest read request; when
    /// it only holds writes the new request is refused.  Broadcasts never
    /// expect a response.
    pub fn enqueue(&mut self, telegram: Telegram, expects_response: bool) -> Option<RequestId> {
        if !self.enabled {
            debug!("Tx: disabled, refusing type 0x{:02X}", telegram.type_id());
            return None;
        }
        if let Err(e) = telegram.serialize(self.dialect) {
            warn!("Tx: cannot encode type 0x{:02X}: {}", telegram.type_id(), e);
            return None;
        }
        if self.queue.is_full() && !self.evict_oldest_read() {
            warn!("Tx: queue full of writes, refusing type 0x{:02X}", telegram.type_id());
            return None;
        }

        let id = self.allocate_id();
        let expects_response = expects_response && !telegram.is_broadcast();
        self.queue
            .push_back(QueuedRequest {
                id,
                telegram,
                expects_response,
            })
            .ok()?;
        Some(id)
    }

    fn allocate_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn evict_oldest_read(&mut self) -> bool {
        let Some(pos) = self.queue.iter().position(|r| !r.telegram.is_write()) else {
            return false;
        };
        let mut kept: Deque<QueuedRequest, TX_QUEUE_CAPACITY> = Deque::new();
        let mut victim = None;
        let mut i = 0;
        while let Some(r) = self.queue.pop_front() {
            if i == pos {
                victim = Some(r);
            } else {
                let _ = kept.push_back(r);
            }
            i += 1;
        }
        self.queue = kept;
        if let Some(v) = victim {
            info!("Tx: queue full, dropping read of type 0x{:02X}", v.telegram.type_id());
            self.record_outcome(v.id, TxOutcome::Failed(TxFailure::Dropped));
        }
        true
    }

    /// Current state of request `id`; `None` once it has aged out of the
    /// outcome log (or never existed).
    pub fn outcome(&self, id: RequestId) -> Option<TxOutcome> {
        if self.pending.as_ref().is_some_and(|p| p.request.id == id) {
            return Some(TxOutcome::InFlight);
        }
        if self.queue.iter().any(|r| r.id == id) {
            return Some(TxOutcome::Queued);
        }
        self.outcomes
            .iter()
            .rev()
            .find(|(rid, _)| *rid == id)
            .map(|&(_, o)| o)
    }

    /// Advance the state machine once.
    ///
    /// `line_idle_ms` is how long the line has been silent.  Returns what
    /// happened, if anything.
    pub fn service<P: SerialPort>(&mut self, now_ms: u64, line_idle_ms: u64, port: &mut P) -> Option<TxEvent> {
        if let Some(event) = self.check_timeout(now_ms) {
            return Some(event);
        }

        if self.pending.is_none() {
            let request = self.queue.pop_front()?;
            let expected = ResponseSignature::for_request(&request.telegram);
            self.pending = Some(PendingRequest {
                request,
                attempts: 0,
                collisions: 0,
                expected,
                read_back: None,
                phase: Phase::Ready { not_before_ms: now_ms },
            });
        }

        let ready = match self.pending.as_ref()?.phase {
            Phase::Ready { not_before_ms } => now_ms >= not_before_ms && line_idle_ms >= self.min_idle_ms,
            Phase::Awaiting { .. } => false,
        };
        if ready {
            self.transmit(now_ms, port)
        } else {
            None
        }
    }

    fn check_timeout(&mut self, now_ms: u64) -> Option<TxEvent> {
        let pending = self.pending.as_mut()?;
        let Phase::Awaiting { deadline_ms } = pending.phase else {
            return None;
        };
        if now_ms < deadline_ms {
            return None;
        }
        self.attempt_failed(now_ms, TxFailure::ValidationTimeout)
    }

    /// Count a failed attempt; retry the pending request or give up once
    /// the retry limit is spent.
    fn attempt_failed(&mut self, now_ms: u64, reason: TxFailure) -> Option<TxEvent> {
        self.fail_count = self.fail_count.saturating_add(1);
        let pending = self.pending.as_mut()?;
        let type_id = pending.request.telegram.type_id();
        if pending.attempts >= self.retry_limit {
            warn!(
                "Tx: type 0x{:02X} failed after {} attempts: {}",
                type_id, pending.attempts, reason
            );
            return Some(self.resolve_failed(reason));
        }

        debug!("Tx: {} for type 0x{:02X}, retrying", reason, type_id);
        pending.phase = Phase::Ready { not_before_ms: now_ms };
        Some(TxEvent::Retrying {
            id: pending.request.id,
            attempt: pending.attempts + 1,
        })
    }

    fn transmit<P: SerialPort>(&mut self, now_ms: u64, port: &mut P) -> Option<TxEvent> {
        let pending = self.pending.as_mut()?;
        let telegram = pending.read_back.as_ref().unwrap_or(&pending.request.telegram);
        let frame = match telegram.serialize(self.dialect) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Tx: encode failed at transmit: {}", e);
                return Some(self.resolve_failed(TxFailure::Rejected));
            }
        };

        let mut echo = [0u8; MAX_TELEGRAM_LEN];
        let clean = match port.transmit(&frame, &mut echo) {
            Ok(n) => echo.get(..n) == Some(frame.as_slice()),
            Err(e) => {
                warn!("Tx: line write failed: {:?}", e);
                false
            }
        };

        if !clean {
            return self.on_collision(now_ms);
        }

        pending.attempts += 1;
        pending.collisions = 0;
        let id = pending.request.id;
        let attempt = pending.attempts;

        if pending.request.expects_response {
            pending.phase = Phase::Awaiting {
                deadline_ms: now_ms + self.response_timeout_ms,
            };
            return Some(TxEvent::Transmitted { id, attempt });
        }

        let type_id = pending.request.telegram.type_id();
        let is_write = pending.request.telegram.is_write();
        self.count_success(is_write);
        self.resolve(TxOutcome::Sent);
        Some(TxEvent::Sent { id, type_id })
    }

    fn on_collision(&mut self, now_ms: u64) -> Option<TxEvent> {
        self.collision_count = self.collision_count.saturating_add(1);
        let limit = self.collision_limit;
        let pending = self.pending.as_mut()?;
        pending.collisions = pending.collisions.saturating_add(1);
        let id = pending.request.id;

        if pending.collisions >= limit {
            warn!(
                "Tx: {} collisions sending type 0x{:02X}, giving up",
                pending.collisions,
                pending.request.telegram.type_id()
            );
            self.fail_count = self.fail_count.saturating_add(1);
            return Some(self.resolve_failed(TxFailure::Collisions));
        }

        let collisions = pending.collisions;
        let backoff_ms = self.backoff(collisions);
        if let Some(pending) = self.pending.as_mut() {
            pending.phase = Phase::Ready {
                not_before_ms: now_ms + u64::from(backoff_ms),
            };
        }
        debug!("Tx: collision #{}, backing off {} ms", collisions, backoff_ms);
        Some(TxEvent::Collision { id, backoff_ms })
    }

    /// Randomised delay from the upper half of a window that doubles per
    /// collision, capped at `tx_backoff_max_ms`.
    fn backoff(&mut self, collisions: u8) -> u32 {
        let shift = u32::from(collisions.saturating_sub(1)).min(16);
        let window = self
            .backoff_base_ms
            .saturating_mul(1 << shift)
            .min(self.backoff_max_ms);
        self.rng.gen_range(window / 2..=window)
    }

    /// Offer a single-byte bus answer.  Only a write waiting for its
    /// answer reacts to it.
    pub fn on_control(&mut self, byte: u8, now_ms: u64) -> Option<TxEvent> {
        let pending = self.pending.as_mut()?;
        if !matches!(pending.phase, Phase::Awaiting { .. })
            || !pending.request.telegram.is_write()
            || pending.read_back.is_some()
        {
            return None;
        }
        match byte {
            WRITE_ACK => {
                let write = &pending.request.telegram;
                let length = write.payload().len() as u8;
                let read = Telegram::read_request(write.src(), write.dest_addr(), write.type_id(), write.offset(), length)
                    .ok()?;
                debug!("Tx: write of type 0x{:02X} acked, reading back", write.type_id());
                pending.read_back = Some(read);
                pending.phase = Phase::Ready { not_before_ms: now_ms };
                Some(TxEvent::Acknowledged {
                    id: pending.request.id,
                })
            }
            WRITE_NACK => self.attempt_failed(now_ms, TxFailure::Refused),
            _ => None,
        }
    }

    /// Offer a received telegram for validation of the pending request.
    pub fn on_telegram(&mut self, telegram: &Telegram) -> Option<TxEvent> {
        let pending = self.pending.as_ref()?;
        if !matches!(pending.phase, Phase::Awaiting { .. }) || !pending.expected.matches(telegram) {
            return None;
        }
        let id = pending.request.id;
        let type_id = pending.request.telegram.type_id();
        let is_write = pending.request.telegram.is_write();
        self.count_success(is_write);
        self.resolve(TxOutcome::Validated);
        Some(TxEvent::Validated { id, type_id })
    }

    fn count_success(&mut self, is_write: bool) {
        if is_write {
            self.write_count = self.write_count.saturating_add(1);
        } else {
            self.read_count = self.read_count.saturating_add(1);
        }
    }

    fn resolve_failed(&mut self, reason: TxFailure) -> TxEvent {
        let (id, type_id) = self
            .pending
            .as_ref()
            .map_or((0, 0), |p| (p.request.id, p.request.telegram.type_id()));
        self.resolve(TxOutcome::Failed(reason));
        TxEvent::Failed { id, type_id, reason }
    }

    fn resolve(&mut self, outcome: TxOutcome) {
        if let Some(pending) = self.pending.take() {
            self.record_outcome(pending.request.id, outcome);
        }
    }

    fn record_outcome(&mut self, id: RequestId, outcome: TxOutcome) {
        if self.outcomes.is_full() {
            self.evict_outcome();
        }
        let _ = self.outcomes.push_back((id, outcome));
    }

    /// Drop the oldest outcome nobody holds.
    fn evict_outcome(&mut self) {
        let victim = self
            .outcomes
            .iter()
            .position(|(id, _)| !self.held.contains(id))
            .unwrap_or(0);
        let mut kept: Deque<(RequestId, TxOutcome), OUTCOME_LOG> = Deque::new();
        let mut i = 0;
        while let Some(entry) = self.outcomes.pop_front() {
            if i != victim {
                let _ = kept.push_back(entry);
            }
            i += 1;
        }
        self.outcomes = kept;
    }

    /// Keep the outcome of `id` in the log until it is released, however
    /// many requests resolve meanwhile.
    pub fn hold_outcome(&mut self, id: RequestId) -> bool {
        self.held.contains(&id) || self.held.push(id).is_ok()
    }

    pub fn release_outcome(&mut self, id: RequestId) {
        self.held.retain(|&h| h != id);
    }

    // ── Counters ──────────────────────────────────────────────

    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn collision_count(&self) -> u32 {
        self.collision_count
    }

    /// Successful transmissions, reads and writes together.
    pub fn sent_count(&self) -> u32 {
        self.read_count.saturating_add(self.write_count)
    }

    /// Success share (%) of all finished attempts; 100 without traffic.
    pub fn quality(&self) -> u8 {
        let ok = u64::from(self.sent_count());
        let total = ok + u64::from(self.fail_count);
        if total == 0 {
            return 100;
        }
        (ok * 100 / total) as u8
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.queue.is_empty()
    }

    pub fn reset_counters(&mut self) {
        self.read_count = 0;
        self.write_count = 0;
        self.fail_count = 0;
        self.collision_count = 0;
    }
}
