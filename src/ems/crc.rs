//! EMS telegram checksum.
//!
//! Shift/xor CRC over every byte before the checksum: when bit 7 of the
//! running value is set it is xored with `0x0C` and rotated in with bit 0
//! set, otherwise it is shifted left; then the next byte is xored in.
//! The per-state step is precomputed into a 256-entry table.

const POLY: u8 = 0x0C;

const fn step(crc: u8) -> u8 {
    if crc & 0x80 != 0 {
        ((crc ^ POLY) << 1) | 0x01
    } else {
        crc << 1
    }
}

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = step(i as u8);
        i += 1;
    }
    table
}

static CRC_TABLE: [u8; 256] = build_table();

/// Checksum of `data` (header and payload, without the trailing byte).
pub fn checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC_TABLE[crc as usize] ^ byte)
}
