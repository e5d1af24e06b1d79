// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MRBus frame encoding and decoding.
//!
//! # Wire Format
//!
//! ```text
//! +----------+--------+--------+-----------+------+-------+----+---------+-------------+-----------+
//! | receiver | sender | length | crc16 (LE)| type | flags | id | command | sub_command | payload   |
//! | u8       | u8     | u8     | u16       | u8   | u8    | u8 | u8      | u8          | 0..245    |
//! +----------+--------+--------+-----------+------+-------+----+---------+-------------+-----------+
//! ```
//!
//! - `length` = 10 + payload length
//! - the CRC covers every byte except itself
//!
//! All parsing is safe: malformed input returns Err, never panics.

use std::fmt;

use thiserror::Error;

use crate::crc::crc16;
use crate::protocol::{flags, BROADCAST_ADDRESS, HEADER_SIZE, MAX_PAYLOAD};

/// Error while decoding a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header.
    #[error("datagram too short: {len} bytes, header needs 10")]
    TooShort { len: usize },
}

/// Error while encoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Payload does not fit the one-byte length field.
    #[error("payload too large: {len} bytes, maximum is 245")]
    PayloadTooLarge { len: usize },
}

/// A deserialized MRBus frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub receiver: u8,
    pub sender: u8,
    /// Total length as declared on the wire; recomputed by [`Frame::seal`] and [`Frame::encode`].
    pub length: u8,
    pub checksum: u16,
    pub frame_type: u8,
    pub flags: u8,
    pub id: u8,
    pub command: u8,
    pub sub_command: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build an outbound frame. Unicast frames ask for an acknowledgement.
    pub fn request(receiver: u8, command: u8, sub_command: u8, payload: Vec<u8>) -> Self {
        let flags = if receiver == BROADCAST_ADDRESS {
            0
        } else {
            flags::REQACK
        };
        Self {
            receiver,
            command,
            sub_command,
            flags,
            payload,
            ..Default::default()
        }
    }

    /// Build a frame addressed to every device on the bus.
    pub fn broadcast(command: u8, sub_command: u8, payload: Vec<u8>) -> Self {
        Self::request(BROADCAST_ADDRESS, command, sub_command, payload)
    }

    /// Length this frame occupies on the wire.
    #[inline]
    pub fn wire_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.receiver == BROADCAST_ADDRESS
    }

    #[inline]
    pub fn requires_ack(&self) -> bool {
        self.flags & flags::REQACK != 0
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    #[inline]
    pub fn is_nack(&self) -> bool {
        self.flags & flags::NACK != 0
    }

    /// ACK or NACK: an answer to something we sent rather than a notification.
    #[inline]
    pub fn is_answer(&self) -> bool {
        self.is_ack() || self.is_nack()
    }

    /// Checksum input: every header byte except the checksum, then the payload.
    pub fn checksum_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.payload.len());
        buf.extend_from_slice(&[
            self.receiver,
            self.sender,
            self.wire_length() as u8,
            self.frame_type,
            self.flags,
            self.id,
            self.command,
            self.sub_command,
        ]);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// CRC-16 over [`Frame::checksum_bytes`].
    pub fn compute_checksum(&self) -> u16 {
        crc16(&self.checksum_bytes())
    }

    /// Recompute `length` and `checksum` so the frame is ready for [`Frame::encode`].
    pub fn seal(&mut self) -> Result<(), EncodeError> {
        self.check_payload()?;
        self.length = self.wire_length() as u8;
        self.checksum = self.compute_checksum();
        Ok(())
    }

    /// `true` when the carried checksum matches the frame contents.
    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Serialize to wire bytes.
    ///
    /// `length` is written from the payload size; `checksum` is written as
    /// stored, so call [`Frame::seal`] first.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        self.check_payload()?;
        let mut buf = Vec::with_capacity(self.wire_length());
        buf.push(self.receiver);
        buf.push(self.sender);
        buf.push(self.wire_length() as u8);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.push(self.frame_type);
        buf.push(self.flags);
        buf.push(self.id);
        buf.push(self.command);
        buf.push(self.sub_command);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse wire bytes.
    ///
    /// A declared length shorter than the header yields an empty payload.
    /// A declared length longer than the datagram truncates the payload to
    /// what was received and reports it in [`Decoded::short_payload`].
    pub fn decode(buf: &[u8]) -> Result<Decoded, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort { len: buf.len() });
        }

        let declared = buf[2] as usize;
        let mut short_payload = None;
        let payload = if declared > HEADER_SIZE {
            let end = declared.min(buf.len());
            if end < declared {
                short_payload = Some(ShortPayload {
                    declared,
                    received: buf.len(),
                });
            }
            buf[HEADER_SIZE..end].to_vec()
        } else {
            Vec::new()
        };

        let frame = Self {
            receiver: buf[0],
            sender: buf[1],
            length: buf[2],
            checksum: u16::from_le_bytes([buf[3], buf[4]]),
            frame_type: buf[5],
            flags: buf[6],
            id: buf[7],
            command: buf[8],
            sub_command: buf[9],
            payload,
        };

        Ok(Decoded {
            frame,
            short_payload,
        })
    }

    /// Flags rendered as `R`, `A`, `N` letters for logs.
    pub fn flags_string(&self) -> String {
        let mut out = String::with_capacity(3);
        if self.requires_ack() {
            out.push('R');
        }
        if self.is_ack() {
            out.push('A');
        }
        if self.is_nack() {
            out.push('N');
        }
        out
    }

    fn check_payload(&self) -> Result<(), EncodeError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(EncodeError::PayloadTooLarge {
                len: self.payload.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sender: {}, receiver: {}, id: {}, flags: {}, cmd: {}, sub: {}",
            self.sender,
            self.receiver,
            self.id,
            self.flags_string(),
            self.command,
            self.sub_command
        )
    }
}

/// Declared length exceeded the received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortPayload {
    pub declared: usize,
    pub received: usize,
}

/// Result of [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub frame: Frame,
    pub short_payload: Option<ShortPayload>,
}

/// Upper-case hex dump for trace logs.
pub fn hex(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02X}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{cmd, common, light, FRAME_TYPE_GATEWAY};

    fn sample() -> Frame {
        let mut frame = Frame::request(9, cmd::LIGHT, light::SET_STATE, vec![0x01, 0x01]);
        frame.sender = 1;
        frame.id = 42;
        frame.frame_type = FRAME_TYPE_GATEWAY;
        frame.seal().expect("seal");
        frame
    }

    #[test]
    fn test_request_flags() {
        assert!(Frame::request(3, cmd::LIGHT, light::GET_STATE, vec![]).requires_ack());
        assert!(!Frame::broadcast(cmd::COMMON, common::ENVIR_INFO, vec![]).requires_ack());
    }

    #[test]
    fn test_encode_layout() {
        let frame = sample();
        let bytes = frame.encode().expect("encode");
        let crc = frame.checksum.to_le_bytes();

        assert_eq!(
            bytes,
            vec![9, 1, 12, crc[0], crc[1], b'C', 0x01, 42, 5, 1, 0x01, 0x01]
        );
    }

    #[test]
    fn test_encode_recomputes_length() {
        let mut frame = sample();
        frame.length = 0;
        let bytes = frame.encode().expect("encode");
        assert_eq!(bytes[2], 12);
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn test_checksum_input_excludes_checksum() {
        let frame = sample();
        let input = frame.checksum_bytes();
        assert_eq!(input, vec![9, 1, 12, b'C', 0x01, 42, 5, 1, 0x01, 0x01]);
        assert_eq!(frame.checksum, crc16(&input));
    }

    #[test]
    fn test_roundtrip() {
        let frames = [
            sample(),
            {
                let mut f = Frame::broadcast(cmd::COMMON, common::ENVIR_INFO, vec![0x65, 0x4F, 0x12, 0x00]);
                f.sender = 7;
                f.id = 255;
                f.frame_type = FRAME_TYPE_GATEWAY;
                f.seal().expect("seal");
                f
            },
            {
                let mut f = Frame::request(200, 0, 0, Vec::new());
                f.seal().expect("seal");
                f
            },
        ];

        for frame in frames {
            let bytes = frame.encode().expect("encode");
            let decoded = Frame::decode(&bytes).expect("decode");
            assert_eq!(decoded.frame, frame);
            assert!(decoded.short_payload.is_none());
            assert!(decoded.frame.checksum_valid());
        }
    }

    #[test]
    fn test_changing_checksum_does_not_change_computed_checksum() {
        let frame = sample();
        let mut bytes = frame.encode().expect("encode");
        bytes[3] ^= 0xFF;
        bytes[4] ^= 0x5A;

        let decoded = Frame::decode(&bytes).expect("decode").frame;
        assert_eq!(decoded.compute_checksum(), frame.compute_checksum());
        assert!(!decoded.checksum_valid());
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            Frame::decode(&[0u8; 9]),
            Err(DecodeError::TooShort { len: 9 })
        );
        assert_eq!(Frame::decode(&[]), Err(DecodeError::TooShort { len: 0 }));
    }

    #[test]
    fn test_decode_short_payload_is_truncated() {
        let mut bytes = sample().encode().expect("encode");
        bytes[2] = 20; // declares 10 payload bytes, only 2 present

        let decoded = Frame::decode(&bytes).expect("decode");
        assert_eq!(decoded.frame.payload, vec![0x01, 0x01]);
        assert_eq!(decoded.frame.length, 20);
        assert_eq!(
            decoded.short_payload,
            Some(ShortPayload {
                declared: 20,
                received: 12
            })
        );
    }

    #[test]
    fn test_decode_header_only_with_large_declared_length() {
        let bytes = [1, 9, 200, 0, 0, b'C', 0x02, 3, 5, 2];
        let decoded = Frame::decode(&bytes).expect("decode");
        assert!(decoded.frame.payload.is_empty());
        assert!(decoded.short_payload.is_some());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = sample().encode().expect("encode");
        bytes.extend_from_slice(&[0xEE, 0xEE]);

        let decoded = Frame::decode(&bytes).expect("decode");
        assert_eq!(decoded.frame.payload, vec![0x01, 0x01]);
        assert!(decoded.short_payload.is_none());
    }

    #[test]
    fn test_decode_declared_length_below_header() {
        let bytes = [1, 9, 3, 0, 0, b'C', 0x00, 3, 5, 100, 1, 1];
        let decoded = Frame::decode(&bytes).expect("decode");
        assert!(decoded.frame.payload.is_empty());
        assert!(decoded.short_payload.is_none());
    }

    #[test]
    fn test_payload_too_large() {
        let mut frame = Frame::broadcast(0, 0, vec![0; MAX_PAYLOAD + 1]);
        assert_eq!(
            frame.seal(),
            Err(EncodeError::PayloadTooLarge {
                len: MAX_PAYLOAD + 1
            })
        );
        frame.payload.pop();
        assert!(frame.seal().is_ok());
        assert_eq!(frame.encode().expect("encode").len(), 255);
    }

    #[test]
    fn test_flags_string() {
        let mut frame = Frame::default();
        assert_eq!(frame.flags_string(), "");
        frame.flags = flags::REQACK | flags::ACK | flags::NACK;
        assert_eq!(frame.flags_string(), "RAN");
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0xAB, 0x10]), "00AB10");
        assert_eq!(hex(&[]), "");
    }
}
