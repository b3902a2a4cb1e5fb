//! Bit-level access to frame payloads
//!
//! Bit positions use the usual database numbering: bit `n` lives in byte
//! `n / 8` at position `n % 8` (LSB = 0). Little-endian signals start at
//! their least significant bit and grow upwards. Big-endian signals start at
//! their most significant bit and walk the sawtooth: down within a byte, then
//! to the MSB of the next byte.

use crate::types::ByteOrder;

fn get_bit(data: &[u8], pos: usize) -> bool {
    data[pos / 8] & (1 << (pos % 8)) != 0
}

fn set_bit(data: &mut [u8], pos: usize, value: bool) {
    if value {
        data[pos / 8] |= 1 << (pos % 8);
    } else {
        data[pos / 8] &= !(1 << (pos % 8));
    }
}

/// Payload positions of the signal bits, most significant first
fn positions(start_bit: u16, length: u16, order: ByteOrder) -> Vec<usize> {
    let start = start_bit as usize;
    let length = length as usize;
    match order {
        ByteOrder::LittleEndian => (start..start + length).rev().collect(),
        ByteOrder::BigEndian => {
            let mut out = Vec::with_capacity(length);
            let mut pos = start;
            for _ in 0..length {
                out.push(pos);
                if pos % 8 == 0 {
                    pos += 15;
                } else {
                    pos -= 1;
                }
            }
            out
        }
    }
}

/// Number of payload bytes needed to hold the signal
pub fn bytes_needed(start_bit: u16, length: u16, order: ByteOrder) -> usize {
    positions(start_bit, length, order)
        .into_iter()
        .max()
        .map(|p| p / 8 + 1)
        .unwrap_or(0)
}

/// Read `length` bits (≤ 64) as an unsigned raw value
///
/// Callers check [`bytes_needed`] against the payload length first.
pub fn extract(data: &[u8], start_bit: u16, length: u16, order: ByteOrder) -> u64 {
    positions(start_bit, length, order)
        .into_iter()
        .fold(0u64, |raw, pos| (raw << 1) | get_bit(data, pos) as u64)
}

/// Write the low `length` bits of `raw` into the payload
pub fn insert(data: &mut [u8], start_bit: u16, length: u16, order: ByteOrder, raw: u64) {
    let positions = positions(start_bit, length, order);
    let n = positions.len();
    for (i, pos) in positions.into_iter().enumerate() {
        let bit = (raw >> (n - 1 - i)) & 1 == 1;
        set_bit(data, pos, bit);
    }
}

/// Sign-extend a raw value of `length` bits
pub fn sign_extend(raw: u64, length: u16) -> i64 {
    if length == 0 || length >= 64 {
        return raw as i64;
    }
    let shift = 64 - length as u32;
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 8, 0xAA)]
    #[case(0, 16, 0xBBAA)]
    #[case(4, 8, 0xBA)]
    #[case(8, 4, 0x0B)]
    fn test_extract_little_endian(#[case] start: u16, #[case] len: u16, #[case] expected: u64) {
        let data = [0xAA, 0xBB, 0xCC];
        assert_eq!(extract(&data, start, len, ByteOrder::LittleEndian), expected);
    }

    #[test]
    fn test_extract_big_endian() {
        // Motorola 16-bit signal starting at bit 7 covers bytes 0 and 1, MSB first
        let data = [0x12, 0x34];
        assert_eq!(extract(&data, 7, 16, ByteOrder::BigEndian), 0x1234);
        // 4-bit nibble at the top of byte 0
        assert_eq!(extract(&data, 7, 4, ByteOrder::BigEndian), 0x1);
        assert_eq!(bytes_needed(7, 16, ByteOrder::BigEndian), 2);
    }

    #[test]
    fn test_insert_then_extract() {
        let mut data = [0u8; 8];
        insert(&mut data, 12, 10, ByteOrder::LittleEndian, 0x2AB);
        assert_eq!(extract(&data, 12, 10, ByteOrder::LittleEndian), 0x2AB);

        let mut data = [0u8; 8];
        insert(&mut data, 23, 12, ByteOrder::BigEndian, 0xABC);
        assert_eq!(extract(&data, 23, 12, ByteOrder::BigEndian), 0xABC);
        assert_eq!(data[2], 0xAB);
        assert_eq!(data[3], 0xC0);
    }

    #[test]
    fn test_insert_preserves_neighbours() {
        let mut data = [0xFF; 2];
        insert(&mut data, 4, 4, ByteOrder::LittleEndian, 0);
        assert_eq!(data, [0x0F, 0xFF]);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0x800, 12), -2048);
    }
}
