//! Receive path: byte accumulation, gap framing, validation.
//!
//! ```text
//!            feed(bytes)             gap elapsed
//!   Idle ─────────────────▶ Collecting ──────────▶ FrameComplete
//!    ▲                                                   │
//!    │                                           poll(): parse
//!    │                                                   ▼
//!    └──────── Dispatched ◀───── Validated / Rejected ◀──┘
//! ```
//!
//! A frame ends when the line stays silent for `rx_idle_gap_ms`.  Bytes
//! arriving after a gap inside a single `feed` chunk start a new frame.
//! Lines whose driver already splits frames on the bus break hand them
//! over through [`RxService::feed_frame`] instead.
//! Completed frames wait in a short queue until [`RxService::poll`]
//! validates them; one-byte frames are poll/ack bus control.

use heapless::{Deque, HistoryBuffer, Vec};
use log::{debug, warn};

use super::telegram::{MAX_TELEGRAM_LEN, Telegram};
use crate::config::GatewayConfig;
use crate::error::FrameError;

/// Outcomes kept for the rx quality figure.
pub const QUALITY_WINDOW: usize = 100;

/// Below this many outcomes the quality figure does not affect health.
pub const QUALITY_MIN_SAMPLES: usize = 10;

const READY_FRAMES: usize = 4;

pub type RawFrame = Vec<u8, MAX_TELEGRAM_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    Collecting,
}

/// One framed unit handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxFrame {
    /// Checksum-valid telegram and the bytes it arrived as.
    Telegram { telegram: Telegram, raw: RawFrame },
    /// Single-byte poll or acknowledge.
    Control(u8),
    /// Frame failed validation; `raw` holds what was captured.
    Rejected { raw: RawFrame, error: FrameError },
}

#[derive(Debug)]
struct Pending {
    raw: RawFrame,
    overrun: bool,
}

pub struct RxService {
    state: RxState,
    buf: RawFrame,
    overrun: bool,
    last_byte_ms: Option<u64>,
    idle_gap_ms: u64,
    ready: Deque<Pending, READY_FRAMES>,
    telegram_count: u32,
    error_count: u32,
    window: HistoryBuffer<bool, QUALITY_WINDOW>,
}

impl RxService {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            state: RxState::Idle,
            buf: RawFrame::new(),
            overrun: false,
            last_byte_ms: None,
            idle_gap_ms: u64::from(config.rx_idle_gap_ms),
            ready: Deque::new(),
            telegram_count: 0,
            error_count: 0,
            window: HistoryBuffer::new(),
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Append bytes that arrived at `now_ms`.
    pub fn feed(&mut self, bytes: &[u8], now_ms: u64) {
        if bytes.is_empty() {
            return;
        }
        if self.state == RxState::Collecting && self.gap_elapsed(now_ms) {
            self.complete();
        }
        for &b in bytes {
            if self.buf.push(b).is_err() {
                self.overrun = true;
            }
        }
        self.state = RxState::Collecting;
        self.last_byte_ms = Some(now_ms);
    }

    /// Append one whole frame; it is closed at once, without waiting for
    /// the gap.
    pub fn feed_frame(&mut self, bytes: &[u8], now_ms: u64) {
        if bytes.is_empty() {
            return;
        }
        if self.state == RxState::Collecting {
            self.complete();
        }
        self.feed(bytes, now_ms);
        self.complete();
    }

    /// The line carried traffic we did not `feed` (our own transmission).
    pub fn note_line_activity(&mut self, now_ms: u64) {
        self.last_byte_ms = Some(now_ms);
    }

    /// Milliseconds of silence on the line, `u64::MAX` if never active.
    pub fn line_idle_ms(&self, now_ms: u64) -> u64 {
        self.last_byte_ms
            .map_or(u64::MAX, |at| now_ms.saturating_sub(at))
    }

    /// Close the current frame if the gap elapsed and hand out the next
    /// validated frame, if any.
    pub fn poll(&mut self, now_ms: u64) -> Option<RxFrame> {
        if self.state == RxState::Collecting && self.gap_elapsed(now_ms) {
            self.complete();
        }
        let pending = self.ready.pop_front()?;
        Some(self.validate(pending))
    }

    fn gap_elapsed(&self, now_ms: u64) -> bool {
        self.line_idle_ms(now_ms) >= self.idle_gap_ms
    }

    fn complete(&mut self) {
        let pending = Pending {
            raw: core::mem::take(&mut self.buf),
            overrun: core::mem::replace(&mut self.overrun, false),
        };
        self.state = RxState::Idle;
        if self.ready.push_back(pending).is_err() {
            warn!("Rx: frame queue full, frame discarded");
            self.record(false);
        }
    }

    fn validate(&mut self, pending: Pending) -> RxFrame {
        if pending.raw.len() == 1 && !pending.overrun {
            return RxFrame::Control(pending.raw[0]);
        }
        let parsed = if pending.overrun {
            Err(FrameError::TooLong)
        } else {
            Telegram::parse(&pending.raw)
        };
        match parsed {
            Ok(telegram) => {
                self.record(true);
                RxFrame::Telegram {
                    telegram,
                    raw: pending.raw,
                }
            }
            Err(error) => {
                debug!("Rx: rejected {} byte frame: {}", pending.raw.len(), error);
                self.record(false);
                RxFrame::Rejected {
                    raw: pending.raw,
                    error,
                }
            }
        }
    }

    fn record(&mut self, ok: bool) {
        if ok {
            self.telegram_count = self.telegram_count.wrapping_add(1);
        } else {
            self.error_count = self.error_count.wrapping_add(1);
        }
        self.window.write(ok);
    }

    // ── Counters ──────────────────────────────────────────────

    pub fn telegram_count(&self) -> u32 {
        self.telegram_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Share of valid frames (%) over the last [`QUALITY_WINDOW`] outcomes.
    pub fn quality(&self) -> u8 {
        let total = self.window.len();
        if total == 0 {
            return 100;
        }
        let ok = self.window.as_slice().iter().filter(|&&v| v).count();
        (ok * 100 / total) as u8
    }

    /// Whether enough outcomes exist for the quality figure to count.
    pub fn quality_settled(&self) -> bool {
        self.window.len() >= QUALITY_MIN_SAMPLES
    }

    pub fn reset_counters(&mut self) {
        self.telegram_count = 0;
        self.error_count = 0;
        self.window.clear();
    }
}
