// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint registry.
//!
//! Maps bus device addresses and 16-bit group addresses to the endpoints
//! that handle inbound frames. Each map has its own lock; dispatch clones
//! the endpoint handle and releases the lock before calling into it, so an
//! endpoint may unregister itself from inside `handle_message`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::frame::Frame;
use crate::protocol::{cmd, common};

/// Receiver of inbound frames routed by the registry.
pub trait Endpoint: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Called from the receive loop. Must not block.
    fn handle_message(&self, frame: &Frame);
}

/// Registration failures. Logged by the registry; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("device with address {0} already registered")]
    DuplicateDevice(u8),

    #[error("group with address {0} already registered")]
    DuplicateGroup(u16),

    #[error("device with address {0} is not registered")]
    UnknownDevice(u8),

    #[error("group with address {0} is not registered")]
    UnknownGroup(u16),
}

/// Where a frame was delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub device: bool,
    pub group: bool,
}

/// Device and group endpoint tables.
#[derive(Default)]
pub struct EndpointRegistry {
    devices: RwLock<HashMap<u8, Arc<dyn Endpoint>>>,
    groups: RwLock<HashMap<u16, Arc<dyn Endpoint>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device endpoint. The first registration of an address wins.
    pub fn register_device(
        &self,
        address: u8,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        let name = endpoint.name();
        tracing::info!("registering device {}, address {}", name, address);

        let mut devices = self.devices.write();
        if devices.contains_key(&address) {
            let err = RegistryError::DuplicateDevice(address);
            tracing::error!("{} (rejected {})", err, name);
            return Err(err);
        }
        devices.insert(address, endpoint);
        tracing::info!("device {} with address {} registered", name, address);
        Ok(())
    }

    /// Remove a device endpoint. Unknown addresses are a logged no-op.
    pub fn unregister_device(&self, address: u8) -> Result<(), RegistryError> {
        match self.devices.write().remove(&address) {
            Some(endpoint) => {
                tracing::info!(
                    "device {} with address {} unregistered",
                    endpoint.name(),
                    address
                );
                Ok(())
            }
            None => {
                let err = RegistryError::UnknownDevice(address);
                tracing::warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Register a group endpoint. The first registration of an address wins.
    pub fn register_group(
        &self,
        address: u16,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        let name = endpoint.name();
        tracing::info!("registering group {}, address {}", name, address);

        let mut groups = self.groups.write();
        if groups.contains_key(&address) {
            let err = RegistryError::DuplicateGroup(address);
            tracing::error!("{} (rejected {})", err, name);
            return Err(err);
        }
        groups.insert(address, endpoint);
        tracing::info!("group {} with address {} registered", name, address);
        Ok(())
    }

    /// Remove a group endpoint. Unknown addresses are a logged no-op.
    pub fn unregister_group(&self, address: u16) -> Result<(), RegistryError> {
        match self.groups.write().remove(&address) {
            Some(endpoint) => {
                tracing::info!(
                    "group {} with address {} unregistered",
                    endpoint.name(),
                    address
                );
                Ok(())
            }
            None => {
                let err = RegistryError::UnknownGroup(address);
                tracing::warn!("{}", err);
                Err(err)
            }
        }
    }

    pub fn device(&self, address: u8) -> Option<Arc<dyn Endpoint>> {
        self.devices.read().get(&address).cloned()
    }

    pub fn group(&self, address: u16) -> Option<Arc<dyn Endpoint>> {
        self.groups.read().get(&address).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }

    /// Route a notification frame.
    ///
    /// The device lookup (by `sender`) and the group lookup (by the address in
    /// a `COMMON/GROUP_SET_STATE` payload) are independent; both may fire.
    /// ACK/NACK frames are never routed here.
    pub fn dispatch(&self, frame: &Frame) -> Dispatch {
        let mut dispatch = Dispatch::default();
        if frame.is_answer() {
            return dispatch;
        }

        if let Some(device) = self.device(frame.sender) {
            tracing::debug!(
                "relaying message sender: {} receiver: {} to device {}",
                frame.sender,
                frame.receiver,
                device.name()
            );
            device.handle_message(frame);
            dispatch.device = true;
        }

        if let Some(address) = group_address(frame) {
            if let Some(group) = self.group(address) {
                tracing::debug!(
                    "relaying message sender: {} to group {}",
                    frame.sender,
                    group.name()
                );
                group.handle_message(frame);
                dispatch.group = true;
            }
        }

        dispatch
    }
}

/// Group address carried by a `COMMON/GROUP_SET_STATE` frame.
///
/// Requires the full `group_hi, group_lo, value_type, value` prefix.
pub fn group_address(frame: &Frame) -> Option<u16> {
    if frame.command != cmd::COMMON || frame.sub_command != common::GROUP_SET_STATE {
        return None;
    }
    match frame.payload.as_slice() {
        [hi, lo, _, _, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}
