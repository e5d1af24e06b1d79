// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable send with ACK matching and bounded retries.
//!
//! The bus allows a single outstanding request. [`SendEngine::send`] holds a
//! gateway-wide async lock for the whole multi-attempt procedure, so the one
//! [`PendingSlot`] is never shared by two senders. The receive loop fills the
//! slot through [`PendingSlot::complete`] without ever waiting on the sender.
//!
//! Per attempt:
//!
//! | Frame | Answer | Outcome |
//! |-------|--------|---------|
//! | unicast (REQACK) | ACK | delivered, stop |
//! | unicast (REQACK) | NACK | failed, stop |
//! | unicast (REQACK) | none within `ack_timeout` | failed, retry |
//! | broadcast | n/a | delivered, always repeat |
//! | unicast without REQACK | n/a | delivered, stop |

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::ResolvedConfig;
use crate::frame::{hex, Frame};
use crate::protocol::{flags, FRAME_TYPE_GATEWAY};
use crate::stats::GatewayStats;

/// Wrapping u8 message-id counter. The first id handed out is 1.
#[derive(Debug, Default)]
pub struct MessageIdAllocator {
    last: AtomicU8,
}

impl MessageIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id, wrapping 255 -> 0.
    pub fn next_id(&self) -> u8 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

struct Pending {
    sender: u8,
    id: u8,
    reply: oneshot::Sender<Frame>,
}

/// The single outstanding request, keyed by `(address, id)`.
#[derive(Default)]
pub struct PendingSlot {
    inner: Mutex<Option<Pending>>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for an answer from `sender` carrying `id`. Replaces any previous
    /// registration; its waiter observes a closed channel.
    pub fn arm(&self, sender: u8, id: u8) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        *self.inner.lock() = Some(Pending {
            sender,
            id,
            reply: tx,
        });
        rx
    }

    /// Hand `frame` to the waiter if it answers the armed request.
    ///
    /// Returns `false` when nothing is armed or the key does not match; the
    /// slot is left untouched in that case.
    pub fn complete(&self, frame: &Frame) -> bool {
        let mut guard = self.inner.lock();
        let matches = matches!(
            guard.as_ref(),
            Some(p) if p.sender == frame.sender && p.id == frame.id
        );
        if !matches {
            return false;
        }
        if let Some(pending) = guard.take() {
            // Receiver may already be gone after a timeout race.
            let _ = pending.reply.send(frame.clone());
        }
        true
    }

    /// Drop the outstanding registration, waking its waiter with an error.
    pub fn clear(&self) -> bool {
        self.inner.lock().take().is_some()
    }

    /// `(address, id)` currently awaited.
    pub fn key(&self) -> Option<(u8, u8)> {
        self.inner.lock().as_ref().map(|p| (p.sender, p.id))
    }
}

/// Outcome of a reliable send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendResult {
    pub delivered: bool,

    /// Matched ACK or NACK frame, if one arrived.
    pub answer: Option<Frame>,

    /// Datagrams attempted.
    pub attempts: u32,
}

impl SendResult {
    pub fn failed() -> Self {
        Self::default()
    }

    /// Payload of the ACK, when delivered with an answer.
    pub fn answer_payload(&self) -> Option<&[u8]> {
        if !self.delivered {
            return None;
        }
        self.answer.as_ref().map(|f| f.payload.as_slice())
    }
}

/// Timing and addressing the engine applies to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendParams {
    pub bus_address: u8,
    pub ack_timeout: Duration,
    pub max_attempts: u32,
}

impl From<&ResolvedConfig> for SendParams {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            bus_address: config.bus_address,
            ack_timeout: config.ack_timeout,
            max_attempts: config.max_attempts,
        }
    }
}

/// Writes one encoded frame to the bus gateway.
#[async_trait]
pub trait Transmit: Send + Sync {
    async fn transmit(&self, datagram: &[u8]) -> io::Result<()>;
}

/// Serialized send/retry state machine.
pub struct SendEngine {
    ids: MessageIdAllocator,
    slot: Arc<PendingSlot>,
    serial: tokio::sync::Mutex<()>,
    running: AtomicBool,
    stats: Arc<GatewayStats>,
}

impl SendEngine {
    pub fn new(stats: Arc<GatewayStats>) -> Self {
        Self {
            ids: MessageIdAllocator::new(),
            slot: Arc::new(PendingSlot::new()),
            serial: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            stats,
        }
    }

    /// Slot shared with the receive loop.
    pub fn slot(&self) -> Arc<PendingSlot> {
        self.slot.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Refuse new sends and fail the one in flight.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if self.slot.clear() {
            tracing::debug!("pending send cancelled by shutdown");
        }
    }

    /// Stamp, seal and send `frame`, retrying per the ACK rules.
    pub async fn send<T>(&self, mut frame: Frame, params: SendParams, out: &T) -> SendResult
    where
        T: Transmit + ?Sized,
    {
        if !self.is_running() {
            tracing::debug!("gateway not running, dropping frame for {}", frame.receiver);
            return SendResult::failed();
        }

        let _serial = self.serial.lock().await;

        frame.id = self.ids.next_id();
        frame.sender = params.bus_address;
        frame.frame_type = FRAME_TYPE_GATEWAY;
        if !frame.is_broadcast() {
            frame.flags |= flags::REQACK;
        }
        let datagram = match frame.seal().and_then(|()| frame.encode()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("cannot encode frame for {}: {}", frame.receiver, e);
                return SendResult::failed();
            }
        };

        let mut result = SendResult::failed();
        for attempt in 1..=params.max_attempts {
            let waiter = if frame.requires_ack() {
                Some(self.slot.arm(frame.receiver, frame.id))
            } else {
                self.slot.clear();
                None
            };

            // Checked after arming: a concurrent stop() either sees the
            // registration and clears it, or this load sees the stop.
            if !self.is_running() {
                tracing::debug!("gateway stopped during send to {}", frame.receiver);
                result.delivered = false;
                break;
            }

            result.attempts = attempt;
            tracing::debug!(
                "sending {} (attempt {}/{})",
                frame,
                attempt,
                params.max_attempts
            );
            tracing::trace!("datagram {}", hex(&datagram));

            let transmitted = match out.transmit(&datagram).await {
                Ok(()) => {
                    GatewayStats::bump(&self.stats.datagrams_sent);
                    true
                }
                Err(e) => {
                    tracing::error!("failed to send frame to {}: {}", frame.receiver, e);
                    false
                }
            };

            let Some(waiter) = waiter else {
                result.delivered = transmitted;
                if frame.is_broadcast() {
                    continue;
                }
                break;
            };

            if !transmitted {
                self.slot.clear();
                result.delivered = false;
                continue;
            }

            match tokio::time::timeout(params.ack_timeout, waiter).await {
                Ok(Ok(answer)) => {
                    result.delivered = answer.is_ack();
                    if !result.delivered {
                        tracing::warn!(
                            "device {} rejected message {} ({})",
                            frame.receiver,
                            frame.id,
                            answer.flags_string()
                        );
                    }
                    result.answer = Some(answer);
                    break;
                }
                Ok(Err(_)) => {
                    tracing::debug!("wait for ACK from {} cancelled", frame.receiver);
                    result.delivered = false;
                    break;
                }
                Err(_) => {
                    self.slot.clear();
                    GatewayStats::bump(&self.stats.ack_timeouts);
                    tracing::warn!(
                        "no ACK from {} for message {} (attempt {}/{})",
                        frame.receiver,
                        frame.id,
                        attempt,
                        params.max_attempts
                    );
                    result.delivered = false;
                }
            }
        }

        self.slot.clear();
        result
    }
}
