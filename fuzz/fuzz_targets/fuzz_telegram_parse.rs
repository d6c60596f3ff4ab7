//! Fuzz target: `Telegram::parse`
//!
//! Arbitrary frames must never panic the parser; whatever it accepts
//! must stay within the bus limits and survive a re-encode.
//!
//! cargo fuzz run fuzz_telegram_parse

#![no_main]

use emsgate::ems::telegram::{MAX_PAYLOAD, MAX_TELEGRAM_LEN};
use emsgate::ems::{Dialect, Telegram};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(telegram) = Telegram::parse(data) else {
        return;
    };
    assert!(data.len() <= MAX_TELEGRAM_LEN);
    assert!(telegram.payload().len() <= MAX_PAYLOAD);
    assert!(telegram.src() != 0 && telegram.src() & 0x80 == 0);

    let frame = telegram
        .serialize(Dialect::EmsPlus)
        .expect("accepted telegram must re-encode");
    assert_eq!(Telegram::parse(&frame).as_ref(), Ok(&telegram));
});
