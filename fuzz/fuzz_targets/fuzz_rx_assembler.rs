//! Fuzz target: `RxService` framing
//!
//! Replays the input as line traffic: each chunk is a one-byte delay in
//! milliseconds, a one-byte length and that many bytes.  The assembler
//! must never panic, and every frame it hands out must be accounted for
//! in its counters.
//!
//! cargo fuzz run fuzz_rx_assembler

#![no_main]

use emsgate::config::GatewayConfig;
use emsgate::ems::RxService;
use emsgate::ems::rx::RxFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut rx = RxService::new(&GatewayConfig::default());
    let mut now = 0u64;
    let mut counted = 0u32;

    let mut rest = data;
    while let [delay, len, tail @ ..] = rest {
        now += u64::from(*delay % 16);
        let n = usize::from(*len).min(tail.len());
        rx.feed(&tail[..n], now);
        rest = &tail[n..];

        while let Some(frame) = rx.poll(now) {
            if !matches!(frame, RxFrame::Control(_)) {
                counted += 1;
            }
        }
    }

    // flush whatever is still collecting
    now += 1_000;
    while let Some(frame) = rx.poll(now) {
        if !matches!(frame, RxFrame::Control(_)) {
            counted += 1;
        }
    }

    assert!(rx.telegram_count() + rx.error_count() >= counted);
    assert!(rx.quality() <= 100);
});
