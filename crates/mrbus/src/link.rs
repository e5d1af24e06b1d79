// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capability interface handed to device and group endpoints.

use std::sync::Arc;

use async_trait::async_trait;

use crate::frame::Frame;
use crate::registry::{Endpoint, RegistryError};
use crate::send::SendResult;

/// What an endpoint may do with the bus.
///
/// Implemented by [`crate::Gateway`]; endpoints depend on this trait only.
#[async_trait]
pub trait BusLink: Send + Sync {
    /// Reliable send. Returns whether the frame was delivered.
    async fn send(&self, frame: Frame) -> bool {
        self.send_get_answer(frame).await.delivered
    }

    /// Reliable send that also returns the matched answer frame.
    async fn send_get_answer(&self, frame: Frame) -> SendResult;

    fn register_device(
        &self,
        address: u8,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError>;

    fn unregister_device(&self, address: u8) -> Result<(), RegistryError>;

    fn register_group(
        &self,
        address: u16,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError>;

    fn unregister_group(&self, address: u16) -> Result<(), RegistryError>;
}
