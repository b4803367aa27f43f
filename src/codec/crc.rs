//! CRC-16/CCITT-FALSE
//!
//! Polynomial 0x1021, initial register 0xFFFF, no reflection, no final XOR.
//! Integrity only: the algorithm is public and unkeyed.

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Compute CRC-16/CCITT-FALSE over `data`
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc = INIT;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Catalogue check value for CRC-16/CCITT-FALSE
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_empty_input_is_init() {
        assert_eq!(crc16_ccitt_false(&[]), 0xFFFF);
    }

    #[test]
    fn test_single_bit_flips_detected() {
        let data: Vec<u8> = (0u8..69).map(|b| b.wrapping_mul(37)).collect();
        let reference = crc16_ccitt_false(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16_ccitt_false(&flipped), reference);
            }
        }
    }
}
