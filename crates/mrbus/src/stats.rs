// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway traffic counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the send path and the receive loop.
#[derive(Debug)]
pub struct GatewayStats {
    /// UDP datagrams written (one per send attempt).
    pub datagrams_sent: AtomicU64,

    /// Datagrams that decoded into a frame.
    pub frames_received: AtomicU64,

    /// ACK frames matched to the pending send.
    pub acks: AtomicU64,

    /// NACK frames matched to the pending send.
    pub nacks: AtomicU64,

    /// Attempts that ran out of ACK wait.
    pub ack_timeouts: AtomicU64,

    /// Datagrams rejected by the decoder.
    pub decode_errors: AtomicU64,

    /// Frames whose checksum did not verify.
    pub checksum_mismatches: AtomicU64,

    /// Frames delivered to a device endpoint.
    pub device_dispatches: AtomicU64,

    /// Frames delivered to a group endpoint.
    pub group_dispatches: AtomicU64,

    /// ACK/NACK frames nobody was waiting for.
    pub unmatched_answers: AtomicU64,

    created: Instant,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            datagrams_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            nacks: AtomicU64::new(0),
            ack_timeouts: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            checksum_mismatches: AtomicU64::new(0),
            device_dispatches: AtomicU64::new(0),
            group_dispatches: AtomicU64::new(0),
            unmatched_answers: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            nacks: self.nacks.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            checksum_mismatches: self.checksum_mismatches.load(Ordering::Relaxed),
            device_dispatches: self.device_dispatches.load(Ordering::Relaxed),
            group_dispatches: self.group_dispatches.load(Ordering::Relaxed),
            unmatched_answers: self.unmatched_answers.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for GatewayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of gateway statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStatsSnapshot {
    pub datagrams_sent: u64,
    pub frames_received: u64,
    pub acks: u64,
    pub nacks: u64,
    pub ack_timeouts: u64,
    pub decode_errors: u64,
    pub checksum_mismatches: u64,
    pub device_dispatches: u64,
    pub group_dispatches: u64,
    pub unmatched_answers: u64,
    pub uptime_secs: u64,
}

impl GatewayStatsSnapshot {
    /// Received frames per second since creation.
    pub fn frames_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.frames_received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}
