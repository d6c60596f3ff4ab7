//! EMS bus line adapter.
//!
//! Implements [`SerialPort`] over the ESP-IDF UART driver and
//! [`ClockPort`] through the wrapped [`Esp32Clock`], so one value is the
//! whole "line" the gateway ticks against.
//!
//! - **`target_os = "espidf"`**: raw `uart_*` sys calls on
//!   [`pins::EMS_UART_NUM`].  Every bus frame ends in a line break; the
//!   driver's event queue reports it, and the bytes collected since the
//!   previous break are handed out as one frame.  A frame is written
//!   followed by a break; the transceiver loops every byte back, which is
//!   read as the echo.
//! - **`not(target_os = "espidf")`**: a silent loopback line.  Reads return
//!   nothing and every transmitted byte echoes back unchanged.

use heapless::Vec;

use crate::app::ports::{ClockPort, SerialPort};
use crate::pins;

use super::time::Esp32Clock;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::{info, warn};

/// Bytes kept between two breaks; longer runs are cut and rejected
/// upstream as too long.
const FRAME_CAPACITY: usize = 64;

/// Driver events queued between two reads at most.
#[cfg(target_os = "espidf")]
const EVENT_QUEUE_LEN: i32 = 20;

/// Idle symbols after which the driver flushes its FIFO into the ring
/// buffer.
#[cfg(target_os = "espidf")]
const RX_TIMEOUT_SYMBOLS: u8 = 2;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartError {
    ConfigFailed(i32),
    PinsFailed(i32),
    InstallFailed(i32),
    ReadFailed(i32),
    WriteFailed(i32),
}

impl core::fmt::Display for UartError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ConfigFailed(rc)  => write!(f, "UART param config failed (rc={})", rc),
            Self::PinsFailed(rc)    => write!(f, "UART pin routing failed (rc={})", rc),
            Self::InstallFailed(rc) => write!(f, "UART driver install failed (rc={})", rc),
            Self::ReadFailed(rc)    => write!(f, "UART read failed (rc={})", rc),
            Self::WriteFailed(rc)   => write!(f, "UART write failed (rc={})", rc),
        }
    }
}

// ── Break framing ─────────────────────────────────────────────

/// Collects line bytes up to the next break.  The break itself reads
/// back as one trailing zero byte, which is dropped.
#[derive(Debug, Default)]
struct BreakFramer {
    partial: Vec<u8, FRAME_CAPACITY>,
}

impl BreakFramer {
    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.partial.push(b).is_err() {
                break;
            }
        }
    }

    /// A break ended the frame: move it into `out`, returning its length.
    fn on_break(&mut self, out: &mut [u8]) -> usize {
        if self.partial.last() == Some(&0) {
            self.partial.pop();
        }
        let n = self.partial.len().min(out.len());
        out[..n].copy_from_slice(&self.partial[..n]);
        self.partial.clear();
        n
    }

    fn clear(&mut self) {
        self.partial.clear();
    }
}

// ── Line ──────────────────────────────────────────────────────

pub struct EmsUart {
    clock: Esp32Clock,
    framer: BreakFramer,
    #[cfg(target_os = "espidf")]
    events: QueueHandle_t,
}

impl EmsUart {
    /// Configure the UART and install the driver.  Call once at boot.
    #[cfg(target_os = "espidf")]
    pub fn new(clock: Esp32Clock) -> Result<Self, UartError> {
        let port = pins::EMS_UART_NUM;
        let config = uart_config_t {
            baud_rate: pins::EMS_BAUD,
            data_bits: uart_word_length_t_UART_DATA_8_BITS,
            parity: uart_parity_t_UART_PARITY_DISABLE,
            stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
            flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
            ..Default::default()
        };
        // SAFETY: runs once from main() before the bus loop; the port is
        // not touched by anything else.
        unsafe {
            check(uart_param_config(port, &config), UartError::ConfigFailed)?;
            check(
                uart_set_pin(port, pins::EMS_TX_GPIO, pins::EMS_RX_GPIO, UART_PIN_NO_CHANGE, UART_PIN_NO_CHANGE),
                UartError::PinsFailed,
            )?;
        }
        let mut events: QueueHandle_t = core::ptr::null_mut();
        // SAFETY: as above; `events` outlives the call and receives the
        // driver's queue handle.
        unsafe {
            check(
                uart_driver_install(port, pins::EMS_RX_BUFFER, 0, EVENT_QUEUE_LEN, &mut events, 0),
                UartError::InstallFailed,
            )?;
            check(uart_set_rx_timeout(port, RX_TIMEOUT_SYMBOLS), UartError::ConfigFailed)?;
        }
        info!(
            "Bus: UART{} at {} baud (rx=GPIO{}, tx=GPIO{})",
            port,
            pins::EMS_BAUD,
            pins::EMS_RX_GPIO,
            pins::EMS_TX_GPIO
        );
        Ok(Self {
            clock,
            framer: BreakFramer::default(),
            events,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(clock: Esp32Clock) -> Result<Self, UartError> {
        log::info!("Bus(sim): loopback line at {} baud", pins::EMS_BAUD);
        Ok(Self {
            clock,
            framer: BreakFramer::default(),
        })
    }

    /// Move everything the driver buffered into the framer.
    fn drain(&mut self) -> Result<(), UartError> {
        let mut chunk = [0u8; 32];
        loop {
            let n = self.read_raw(&mut chunk, 0)?;
            if n == 0 {
                return Ok(());
            }
            self.framer.push(&chunk[..n]);
        }
    }

    /// Next driver event, without blocking.
    #[cfg(target_os = "espidf")]
    fn next_event(&mut self) -> Option<uart_event_t> {
        let mut event = uart_event_t::default();
        // SAFETY: `events` is the queue the driver installed; it carries
        // `uart_event_t` items and `event` is valid for one.
        let got = unsafe { xQueueReceive(self.events, (&mut event as *mut uart_event_t).cast(), 0) };
        (got == 1).then_some(event)
    }

    /// Drop pending events and buffered input.
    #[cfg(target_os = "espidf")]
    fn reset_input(&mut self) {
        // SAFETY: port and queue were set up in `new`.
        unsafe {
            uart_flush_input(pins::EMS_UART_NUM);
            xQueueGenericReset(self.events, 0);
        }
        self.framer.clear();
    }

    #[cfg(target_os = "espidf")]
    fn read_raw(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, UartError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let ticks = timeout_ms * configTICK_RATE_HZ / 1000;
        // SAFETY: `buf` is valid for `buf.len()` bytes for the call.
        let n = unsafe {
            uart_read_bytes(
                pins::EMS_UART_NUM,
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                ticks,
            )
        };
        if n < 0 {
            return Err(UartError::ReadFailed(n));
        }
        Ok(n as usize)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_raw(&mut self, _buf: &mut [u8], _timeout_ms: u32) -> Result<usize, UartError> {
        Ok(0)
    }

    #[cfg(target_os = "espidf")]
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), UartError> {
        // SAFETY: `frame` is valid for `frame.len()` bytes for the call.
        let n = unsafe {
            uart_write_bytes_with_break(pins::EMS_UART_NUM, frame.as_ptr().cast(), frame.len(), 11)
        };
        if n < 0 {
            return Err(UartError::WriteFailed(n));
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_frame(&mut self, _frame: &[u8]) -> Result<(), UartError> {
        Ok(())
    }
}

impl SerialPort for EmsUart {
    type Error = UartError;

    /// One whole frame per call, cut at the line break.
    #[cfg(target_os = "espidf")]
    #[allow(non_upper_case_globals)]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
        while let Some(event) = self.next_event() {
            match event.type_ {
                uart_event_type_t_UART_DATA => self.drain()?,
                uart_event_type_t_UART_BREAK => {
                    self.drain()?;
                    let n = self.framer.on_break(buf);
                    if n > 0 {
                        return Ok(n);
                    }
                }
                uart_event_type_t_UART_FIFO_OVF | uart_event_type_t_UART_BUFFER_FULL => {
                    warn!("Bus: UART overflow, input flushed");
                    self.reset_input();
                }
                _ => {}
            }
        }
        Ok(0)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
        self.drain()?;
        Ok(if self.framer.partial.is_empty() { 0 } else { self.framer.on_break(buf) })
    }

    fn delivers_frames(&self) -> bool {
        true
    }

    #[cfg(target_os = "espidf")]
    fn transmit(&mut self, frame: &[u8], echo: &mut [u8]) -> Result<usize, UartError> {
        self.write_frame(frame)?;
        let want = frame.len().min(echo.len());
        let mut got = 0;
        while got < want {
            let n = self.read_raw(&mut echo[got..want], pins::EMS_ECHO_TIMEOUT_MS)?;
            if n == 0 {
                break;
            }
            got += n;
        }
        // The break reads back as a single zero byte; anything else
        // already belongs to the next frame.
        let mut tail = [0u8; 1];
        let carry = self.read_raw(&mut tail, 2)? == 1 && tail[0] != 0;
        // Our own frame and its break raised events of their own.
        // SAFETY: the queue was installed in `new`.
        unsafe {
            xQueueGenericReset(self.events, 0);
        }
        self.framer.clear();
        if carry {
            self.framer.push(&tail);
        }
        Ok(got)
    }

    #[cfg(not(target_os = "espidf"))]
    fn transmit(&mut self, frame: &[u8], echo: &mut [u8]) -> Result<usize, UartError> {
        self.write_frame(frame)?;
        let n = frame.len().min(echo.len());
        echo[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }
}

impl ClockPort for EmsUart {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(target_os = "espidf")]
fn check(rc: esp_err_t, err: fn(i32) -> UartError) -> Result<(), UartError> {
    if rc == ESP_OK as esp_err_t { Ok(()) } else { Err(err(rc)) }
}
