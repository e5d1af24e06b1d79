// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MRBus protocol constants: addresses, flags and the command catalogue.

/// Receiver address that every device on the bus accepts.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Frame type written by the gateway on everything it originates (`'C'`).
pub const FRAME_TYPE_GATEWAY: u8 = b'C';

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 10;

/// Largest payload that still fits the one-byte length field.
pub const MAX_PAYLOAD: usize = u8::MAX as usize - HEADER_SIZE;

/// Largest datagram a valid frame can occupy.
pub const MAX_FRAME_SIZE: usize = u8::MAX as usize;

/// Frame flag bits.
pub mod flags {
    /// Sender wants an acknowledgement.
    pub const REQACK: u8 = 0x01;
    /// Positive acknowledgement.
    pub const ACK: u8 = 0x02;
    /// Negative acknowledgement.
    pub const NACK: u8 = 0x04;
}

/// Generic on/off values used in payloads.
pub mod value {
    pub const OFF: u8 = 0;
    pub const ON: u8 = 1;
}

/// Command groups (frame byte 8).
pub mod cmd {
    pub const ADMIN: u8 = 0;
    pub const COMMON: u8 = 1;
    pub const SHUTTER: u8 = 3;
    pub const LIGHT: u8 = 5;
    pub const OVEN: u8 = 6;
}

/// `ADMIN` sub-commands.
pub mod admin {
    /// Resets the device.
    pub const RESET: u8 = 1;
    /// Device announces it is running.
    pub const DEVICE_RUNNING: u8 = 7;
    /// Answer: device type, revision.
    pub const GET_DEVICE_INFO: u8 = 11;
    pub const GET_NAME: u8 = 12;
    pub const SET_NAME: u8 = 13;
    /// Free-form debug output, nothing to do.
    pub const DEBUG_MESSAGE: u8 = 14;
    /// Sets the node address (first payload byte).
    pub const SET_ADDRESS: u8 = 50;
}

/// `COMMON` sub-commands.
pub mod common {
    /// TIME_H, TIME, TIME, TIME_L (Unix seconds, big-endian).
    pub const ENVIR_INFO: u8 = 1;
    /// GROUP_H, GROUP_L, VALUE_TYPE, VALUE, [VALUE]...
    pub const GROUP_SET_STATE: u8 = 10;
}

/// `SHUTTER` sub-commands.
pub mod shutter {
    /// POSITION (0..=10)
    pub const SET_POSITION: u8 = 1;
    /// Answer: POSITION
    pub const GET_POSITION: u8 = 2;
    /// Answer: LOCKED
    pub const GET_LOCK: u8 = 7;
    /// LOCKED
    pub const SET_LOCK: u8 = 8;
    /// POSITION, LOCKED
    pub const STATUS_UPDATE: u8 = 100;
}

/// `LIGHT` sub-commands.
pub mod light {
    /// CHANNEL, STATE
    pub const SET_STATE: u8 = 1;
    /// Answer: CHANNEL_0_STATE, CHANNEL_1_STATE, ...
    pub const GET_STATE: u8 = 2;
    /// CHANNEL_0_STATE, CHANNEL_1_STATE, ...
    pub const STATUS_UPDATE: u8 = 100;
}

/// `OVEN` sub-commands.
pub mod oven {
    /// ON/OFF
    pub const SET_ONOFF: u8 = 1;
    /// Answer: ON/OFF, POWER (20..=100)
    pub const GET_STATE: u8 = 2;
    /// POWER (20..=100)
    pub const SET_POWER: u8 = 3;
    /// Answer: int16 flowline, int16 returnline (little-endian, tenths of a degree)
    pub const GET_TEMP: u8 = 4;
    /// SENSOR_INDEX
    pub const LEARN_SENSOR: u8 = 5;
    /// ON/OFF, POWER
    pub const STATUS_UPDATE: u8 = 100;
    /// int16 flowline, int16 returnline
    pub const TEMP_UPDATE: u8 = 101;
}

/// Value types carried in `GROUP_SET_STATE`.
pub mod group_type {
    pub const SWITCH: u8 = 1;
}
