// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP transport.
//!
//! One long-lived receive socket bound to the listen address, plus a fresh
//! ephemeral socket per send attempt. The receive loop decodes every
//! datagram and routes it either to the pending send (ACK/NACK) or to the
//! endpoint registry.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::frame::{hex, Frame};
use crate::protocol::MAX_FRAME_SIZE;
use crate::registry::EndpointRegistry;
use crate::send::{PendingSlot, Transmit};
use crate::stats::GatewayStats;

/// Receive buffer, one byte past the largest frame the length field allows.
const RECV_BUFFER_SIZE: usize = MAX_FRAME_SIZE + 1;

/// Bind the receive socket with `SO_REUSEADDR` and hand it to tokio.
pub fn bind_receive_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Sends each datagram from its own ephemeral socket.
///
/// The socket lives for one attempt and is closed on every path out of
/// [`Transmit::transmit`].
#[derive(Debug, Clone, Copy)]
pub struct UdpOutbound {
    target: SocketAddr,
}

impl UdpOutbound {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }

    fn local_any(&self) -> SocketAddr {
        if self.target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        }
    }
}

#[async_trait]
impl Transmit for UdpOutbound {
    async fn transmit(&self, datagram: &[u8]) -> io::Result<()> {
        let socket = UdpSocket::bind(self.local_any()).await?;
        let written = socket.send_to(datagram, self.target).await?;
        if written != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", written, datagram.len()),
            ));
        }
        Ok(())
    }
}

/// Errors after which the socket is still usable.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
    )
}

/// What happened to one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Decoder rejected it.
    Malformed,
    /// Checksum mismatch in strict mode.
    BadChecksum,
    /// ACK/NACK handed to the pending send.
    Answer,
    /// ACK/NACK nobody was waiting for.
    UnmatchedAnswer,
    /// Routed to the registry; flags tell which endpoints fired.
    Notification { device: bool, group: bool },
}

/// Receive-side state shared with the gateway.
pub struct InboundHandler {
    registry: Arc<EndpointRegistry>,
    slot: Arc<PendingSlot>,
    stats: Arc<GatewayStats>,
    strict_checksum: bool,
}

impl InboundHandler {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        slot: Arc<PendingSlot>,
        stats: Arc<GatewayStats>,
        strict_checksum: bool,
    ) -> Self {
        Self {
            registry,
            slot,
            stats,
            strict_checksum,
        }
    }

    /// Decode, verify and route one datagram. Never panics on bad input.
    pub fn handle_datagram(&self, buf: &[u8], from: SocketAddr) -> Inbound {
        tracing::trace!("datagram from {}: {}", from, hex(buf));

        let decoded = match Frame::decode(buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                GatewayStats::bump(&self.stats.decode_errors);
                tracing::warn!("dropping datagram from {}: {}", from, e);
                return Inbound::Malformed;
            }
        };
        if let Some(short) = decoded.short_payload {
            tracing::warn!(
                "frame from {} declares {} bytes but only {} arrived",
                from,
                short.declared,
                short.received
            );
        }

        let frame = decoded.frame;
        if !frame.checksum_valid() {
            GatewayStats::bump(&self.stats.checksum_mismatches);
            tracing::warn!(
                "checksum mismatch from {} (got {:04X}, expected {:04X})",
                frame.sender,
                frame.checksum,
                frame.compute_checksum()
            );
            if self.strict_checksum {
                return Inbound::BadChecksum;
            }
        }

        GatewayStats::bump(&self.stats.frames_received);
        tracing::debug!("received {}", frame);

        if frame.is_answer() {
            return self.handle_answer(&frame);
        }

        let dispatch = self.registry.dispatch(&frame);
        if dispatch.device {
            GatewayStats::bump(&self.stats.device_dispatches);
        }
        if dispatch.group {
            GatewayStats::bump(&self.stats.group_dispatches);
        }
        if !dispatch.device && !dispatch.group {
            tracing::trace!("no endpoint for message from {}", frame.sender);
        }
        Inbound::Notification {
            device: dispatch.device,
            group: dispatch.group,
        }
    }

    fn handle_answer(&self, frame: &Frame) -> Inbound {
        if self.slot.complete(frame) {
            if frame.is_nack() {
                GatewayStats::bump(&self.stats.nacks);
            } else {
                GatewayStats::bump(&self.stats.acks);
            }
            Inbound::Answer
        } else {
            GatewayStats::bump(&self.stats.unmatched_answers);
            tracing::trace!(
                "dropping unexpected {} from {} (id {})",
                frame.flags_string(),
                frame.sender,
                frame.id
            );
            Inbound::UnmatchedAnswer
        }
    }
}

/// Receive until `shutdown` flips or the socket fails for good.
///
/// Returns `Ok` on shutdown and the socket error otherwise.
pub async fn receive_loop(
    socket: UdpSocket,
    handler: InboundHandler,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let local = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    tracing::info!("receive loop listening on {}", local);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    handler.handle_datagram(&buf[..len], from);
                }
                Err(e) if is_transient(&e) => {
                    tracing::warn!("receive error on {} (continuing): {}", local, e);
                }
                Err(e) => {
                    tracing::error!("receive socket {} failed: {}", local, e);
                    return Err(e);
                }
            },
        }
    }

    tracing::info!("receive loop on {} stopped", local);
    Ok(())
}
