// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CRC-16 checksum used by MRBus frames.
//!
//! Bit-serial variant of CRC-16/ARC: the reflected polynomial is shifted
//! through the register most-significant-bit first, which is what the bus
//! firmware does. It is *not* the catalogued CRC-16/ARC and must not be
//! replaced by a table-driven implementation of that algorithm.
//!
//! # Parameters
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | Polynomial | 0xA001 |
//! | Init | 0x0000 |
//! | Bit order | MSB first per byte |
//! | XorOut | 0x0000 |
//!
//! Integrity check only, not a MAC.

/// Polynomial applied when the feedback bit is set.
const POLY: u16 = 0xA001;

/// Calculate the MRBus CRC-16 of `data`.
#[inline]
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0, data)
}

/// Feed more bytes into a running CRC.
#[inline]
#[must_use]
pub fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    let mut crc = crc;
    for &byte in data {
        let mut mask = 0x80u8;
        while mask != 0 {
            let mut feedback = crc & 0x8000 != 0;
            if byte & mask != 0 {
                feedback = !feedback;
            }
            crc <<= 1;
            if feedback {
                crc ^= POLY;
            }
            mask >>= 1;
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference run of the bus firmware routine, one bit at a time.
    fn reference(data: &[u8]) -> u16 {
        let mut crc: u32 = 0;
        for &c in data {
            let mut i = 0x80u32;
            while i > 0 {
                let mut bit = crc & 0x8000;
                if u32::from(c) & i != 0 {
                    bit = if bit != 0 { 0 } else { 1 };
                }
                crc <<= 1;
                if bit != 0 {
                    crc ^= 0xA001;
                }
                crc &= 0xFFFF;
                i >>= 1;
            }
        }
        crc as u16
    }

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn test_crc16_single_bytes() {
        // 0x01: only the last bit toggles feedback -> register = POLY
        assert_eq!(crc16(&[0x01]), 0xA001);
        assert_eq!(crc16(&[0x00]), 0);
        assert_eq!(crc16(&[0x80]), reference(&[0x80]));
    }

    #[test]
    fn test_crc16_matches_reference() {
        let corpus: [&[u8]; 5] = [
            b"123456789",
            &[0x09, 0x01, 0x0A, 0x43, 0x01, 0x01, 0x05, 0x02],
            &[0xFF, 0x01, 0x0E, 0x43, 0x00, 0x07, 0x01, 0x01, 0x65, 0x4F, 0x12, 0x00],
            &[0xDE, 0xAD, 0xBE, 0xEF],
            &[0u8; 32],
        ];
        for data in corpus {
            assert_eq!(crc16(data), reference(data), "data {:02X?}", data);
        }
    }

    #[test]
    fn test_crc16_stable() {
        let data = b"MRBus frame";
        assert_eq!(crc16(data), crc16(data));
    }

    #[test]
    fn test_crc16_incremental() {
        let data = b"123456789";
        let single_shot = crc16(data);

        let mut incremental = 0;
        for chunk in data.chunks(4) {
            incremental = crc16_update(incremental, chunk);
        }

        assert_eq!(incremental, single_shot);
    }

    #[test]
    fn test_crc16_detects_single_bit_flip() {
        let corpus: [&[u8]; 3] = [
            b"MRBus frame data",
            &[0x09, 0x01, 0x0C, 0x43, 0x01, 0x07, 0x05, 0x01, 0x01, 0x01],
            &[0xFF, 0x01, 0x0E, 0x43, 0x00, 0x07, 0x01, 0x01],
        ];

        for data in corpus {
            let baseline = crc16(data);
            let mut modified = data.to_vec();
            for i in 0..modified.len() {
                for bit in 0..8 {
                    modified[i] ^= 1 << bit;
                    assert_ne!(
                        crc16(&modified),
                        baseline,
                        "CRC should detect bit flip at byte {} bit {}",
                        i,
                        bit
                    );
                    modified[i] ^= 1 << bit;
                }
            }
        }
    }
}
