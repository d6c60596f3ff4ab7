//! Lock-protected gateway handle for multi-context hosts.
//!
//! The main loop ticks the gateway while web or MQTT handlers issue
//! commands from other tasks.  [`SharedGateway`] keeps the service, its
//! serial line and its event sink behind one `embassy-sync` blocking
//! mutex; every access is a closure run under the lock, so callers always
//! see the state between two whole ticks.
//!
//! ```text
//!   main loop ──tick()──┐
//!                       ▼
//!   web / MQTT ──▶ Mutex<RefCell<Runtime>> ──▶ GatewayService
//!                       ▲
//!   write_value ────────┘  (lock taken per pump iteration)
//! ```

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::command::{CommandRet, Output, parse_command_string};
use crate::device::DeviceType;
use crate::ems::{RequestId, TxOutcome};
use crate::error::TxFailure;

use super::ports::{ClockPort, EventSink, SerialPort, ValuePublisher};
use super::service::{GatewayService, outcome_result, report_write};

/// Everything one tick needs.
pub struct Runtime<L, S> {
    pub service: GatewayService,
    pub line: L,
    pub sink: S,
}

pub struct SharedGateway<L, S> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Runtime<L, S>>>,
}

impl<L, S> SharedGateway<L, S>
where
    L: SerialPort + ClockPort,
    S: EventSink,
{
    pub fn new(service: GatewayService, line: L, sink: S) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Runtime { service, line, sink })),
        }
    }

    /// Run `f` under the lock.  Must not be called from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut Runtime<L, S>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn tick(&self) {
        self.with(|rt| rt.service.tick(&mut rt.line, &mut rt.sink));
    }

    pub fn publish_values(&self, publisher: &mut impl ValuePublisher, force: bool) -> usize {
        self.with(|rt| {
            rt.service.publish_pending(publisher) + rt.service.publish_values(publisher, force)
        })
    }

    /// Command call from a message-bus subscription; the admin flag is
    /// not enforced.
    pub fn call(&self, device_type: DeviceType, cmd: &str, value: &str, output: &mut Output) -> CommandRet {
        let mut id = -1;
        let name = parse_command_string(cmd, &mut id);
        self.with(|rt| rt.service.call(device_type, name, value, true, id, output))
    }

    /// Write-value entry point.  Queues the write under the lock, then
    /// waits for validation taking the lock once per pump iteration, so
    /// other callers and the main loop interleave.
    pub fn write_value(&self, device_type: DeviceType, cmd: &str, value: &str, output: &mut Output) -> CommandRet {
        let mut id = -1;
        let name = parse_command_string(cmd, &mut id);
        let (ret, request, timeout_ms) = self.with(|rt| {
            rt.service.take_last_request();
            let ret = rt.service.call(device_type, name, value, true, id, output);
            let request = rt.service.take_last_request();
            (ret, request, rt.service.validate_timeout_ms())
        });
        let (CommandRet::Ok, Some(request)) = (ret, request) else {
            return ret;
        };

        let result = outcome_result(self.wait_validate(request, timeout_ms));
        report_write(device_type, cmd, result, output)
    }

    /// Lock-per-iteration version of
    /// [`GatewayService::wait_validate`]; any number of callers may wait
    /// at once.
    pub fn wait_validate(&self, request: RequestId, timeout_ms: u64) -> TxOutcome {
        let deadline = self.with(|rt| {
            let core = rt.service.core_mut();
            core.enter_wait();
            core.hold_outcome(request);
            rt.line.now_ms().saturating_add(timeout_ms)
        });
        let outcome = loop {
            let (outcome, now) = self.with(|rt| {
                rt.service.tick(&mut rt.line, &mut rt.sink);
                (rt.service.core().tx().outcome(request), rt.line.now_ms())
            });
            match outcome {
                Some(o) if o.is_final() || now >= deadline => break o,
                Some(_) => core::hint::spin_loop(),
                None => break TxOutcome::Failed(TxFailure::Dropped),
            }
        };
        self.with(|rt| {
            let core = rt.service.core_mut();
            core.release_outcome(request);
            core.leave_wait();
        });
        outcome
    }
}
