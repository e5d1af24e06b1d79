// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MRBus protocol engine
//!
//! Talks to an MRBus field bus through its UDP gateway: frames are encoded
//! with a CRC-16, sent with acknowledgement and retries, and inbound
//! notifications are routed to device and group endpoints.
//!
//! # Features
//!
//! - **Frame codec**: fixed 10-byte header, CRC-16 checksum
//! - **Reliable send**: single outstanding request, ACK/NACK matching, 3 attempts
//! - **Endpoint registry**: dispatch by device address and group address
//! - **Time sync**: periodic broadcast of the current Unix time
//! - **Device layer**: light switches, oven control, roller shutters, switch groups
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mrbus::protocol::{cmd, light};
//! use mrbus::{Frame, Gateway, GatewayConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::new(GatewayConfig::new(1, "192.168.1.50", 5000));
//! gateway.start().await?;
//!
//! let result = gateway
//!     .send_get_answer(Frame::request(9, cmd::LIGHT, light::GET_STATE, Vec::new()))
//!     .await;
//! if let Some(states) = result.answer_payload() {
//!     println!("light states: {:?}", states);
//! }
//!
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [gateway]
//! bus_id = 1
//! ip_address = "192.168.1.50"
//! udp_port = 5000
//!
//! [[devices]]
//! kind = "lightcontrol2"
//! address = 3
//! name = "kitchen"
//!
//! [[groups]]
//! kind = "switchgroup"
//! address = 5
//! ```

pub mod config;
pub mod crc;
pub mod devices;
pub mod frame;
pub mod gateway;
pub mod jobs;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod send;
pub mod stats;
pub mod transport;

pub use config::{
    ConfigError, DeviceConfig, DeviceKind, GatewayConfig, GroupConfig, GroupKind, MrbusConfig,
    ResolvedConfig,
};
pub use crc::crc16;
pub use devices::{ChannelCommand, ChannelState, ChannelUpdate, Device};
pub use frame::{DecodeError, Decoded, EncodeError, Frame};
pub use gateway::{Gateway, GatewayError, GatewayStatus};
pub use link::BusLink;
pub use registry::{Endpoint, EndpointRegistry, RegistryError};
pub use send::SendResult;
pub use stats::GatewayStatsSnapshot;
