// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway handle.
//!
//! Ties the pieces together: configuration, the receive loop, the send
//! engine, the endpoint registry and the time-sync job. [`Gateway`] is a
//! cheap clone around shared state and can be started again after
//! [`Gateway::shutdown`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, GatewayConfig, ResolvedConfig};
use crate::frame::Frame;
use crate::jobs::JobScheduler;
use crate::link::BusLink;
use crate::registry::{Endpoint, EndpointRegistry, RegistryError};
use crate::send::{SendEngine, SendParams, SendResult};
use crate::stats::{GatewayStats, GatewayStatsSnapshot};
use crate::transport::{bind_receive_socket, receive_loop, InboundHandler, UdpOutbound};

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Gateway already running")]
    AlreadyRunning,
}

/// Operational status, observable through [`Gateway::subscribe_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Offline,
    Online,
    /// Startup refused the configuration.
    ConfigurationError(String),
    /// The receive socket failed; the gateway stopped itself.
    LinkLost(String),
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => f.write_str("offline"),
            Self::Online => f.write_str("online"),
            Self::ConfigurationError(reason) => write!(f, "configuration error: {}", reason),
            Self::LinkLost(reason) => write!(f, "link lost: {}", reason),
        }
    }
}

struct Session {
    generation: u64,
    config: ResolvedConfig,
    local_addr: SocketAddr,
    outbound: UdpOutbound,
    shutdown_tx: watch::Sender<bool>,
    receiver: JoinHandle<()>,
    jobs: Option<JobScheduler>,
}

struct Inner {
    config: GatewayConfig,
    registry: Arc<EndpointRegistry>,
    stats: Arc<GatewayStats>,
    engine: SendEngine,
    status_tx: watch::Sender<GatewayStatus>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

/// MRBus UDP gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// Create an offline gateway. Nothing is validated or bound until
    /// [`Gateway::start`].
    pub fn new(config: GatewayConfig) -> Self {
        let stats = Arc::new(GatewayStats::new());
        let (status_tx, _) = watch::channel(GatewayStatus::Offline);
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Arc::new(EndpointRegistry::new()),
                engine: SendEngine::new(stats.clone()),
                stats,
                status_tx,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Settings in effect while running.
    pub fn resolved_config(&self) -> Option<ResolvedConfig> {
        self.inner.session.lock().as_ref().map(|s| s.config.clone())
    }

    pub fn status(&self) -> GatewayStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<GatewayStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Bound receive address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.session.lock().as_ref().map(|s| s.local_addr)
    }

    pub fn stats(&self) -> GatewayStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.inner.registry
    }

    fn set_status(&self, status: GatewayStatus) {
        tracing::info!("gateway status: {}", status);
        self.inner.status_tx.send_replace(status);
    }

    /// Validate the configuration, bind the receive socket and start the
    /// receive loop and time-sync job.
    ///
    /// A configuration failure leaves the gateway in
    /// [`GatewayStatus::ConfigurationError`].
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut session = self.inner.session.lock();
        if session.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }

        let config = match self.inner.config.resolve() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("gateway configuration rejected: {}", e);
                self.set_status(GatewayStatus::ConfigurationError(e.to_string()));
                return Err(e.into());
            }
        };

        let bind_error = |source: std::io::Error| {
            tracing::error!("cannot bind {}: {}", config.listen_addr, source);
            GatewayError::Bind {
                addr: config.listen_addr,
                source,
            }
        };
        let socket = bind_receive_socket(config.listen_addr).map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        let handler = InboundHandler::new(
            self.inner.registry.clone(),
            self.inner.engine.slot(),
            self.inner.stats.clone(),
            config.strict_checksum,
        );
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        let receiver = tokio::spawn(async move {
            if let Err(e) = receive_loop(socket, handler, shutdown_rx).await {
                if let Some(inner) = weak.upgrade() {
                    Gateway { inner }.link_lost(generation, &e);
                }
            }
        });

        self.inner.engine.set_running();

        let jobs = config.time_sync_interval.map(|period| {
            let link: Arc<dyn BusLink> = Arc::new(WeakLink(Arc::downgrade(&self.inner)));
            JobScheduler::start(link, period)
        });

        tracing::info!(
            "gateway bus id {} -> {}, listening on {}",
            config.bus_address,
            config.gateway_addr,
            local_addr
        );
        *session = Some(Session {
            generation,
            outbound: UdpOutbound::new(config.gateway_addr),
            config,
            local_addr,
            shutdown_tx,
            receiver,
            jobs,
        });
        drop(session);

        self.set_status(GatewayStatus::Online);
        Ok(())
    }

    /// Stop the job, fail any in-flight send, close the receive socket.
    pub async fn shutdown(&self) {
        let session = self.inner.session.lock().take();
        let Some(mut session) = session else {
            return;
        };

        self.inner.engine.stop();
        if let Some(mut jobs) = session.jobs.take() {
            jobs.stop();
        }
        let _ = session.shutdown_tx.send(true);
        if let Err(e) = session.receiver.await {
            tracing::warn!("receive loop ended abnormally: {}", e);
        }

        self.set_status(GatewayStatus::Offline);
    }

    /// Tear down the session whose receive loop died. A session started
    /// since then is left alone.
    fn link_lost(&self, generation: u64, error: &io::Error) {
        let session = {
            let mut guard = self.inner.session.lock();
            if guard.as_ref().map(|s| s.generation) != Some(generation) {
                return;
            }
            guard.take()
        };
        let Some(mut session) = session else {
            return;
        };

        self.inner.engine.stop();
        if let Some(mut jobs) = session.jobs.take() {
            jobs.stop();
        }
        tracing::error!("gateway link on {} lost: {}", session.local_addr, error);
        self.set_status(GatewayStatus::LinkLost(error.to_string()));
    }

    /// Shut down and start again with the same configuration.
    pub async fn restart(&self) -> Result<(), GatewayError> {
        self.shutdown().await;
        self.start().await
    }

    /// Reliable send; `true` when delivered.
    pub async fn send(&self, frame: Frame) -> bool {
        self.send_get_answer(frame).await.delivered
    }

    /// Reliable send returning the matched answer frame.
    pub async fn send_get_answer(&self, frame: Frame) -> SendResult {
        let route = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| (SendParams::from(&s.config), s.outbound));
        let Some((params, outbound)) = route else {
            tracing::debug!("gateway offline, not sending to {}", frame.receiver);
            return SendResult::failed();
        };
        self.inner.engine.send(frame, params, &outbound).await
    }

    pub fn register_device(
        &self,
        address: u8,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        self.inner.registry.register_device(address, endpoint)
    }

    pub fn unregister_device(&self, address: u8) -> Result<(), RegistryError> {
        self.inner.registry.unregister_device(address)
    }

    pub fn register_group(
        &self,
        address: u16,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        self.inner.registry.register_group(address, endpoint)
    }

    pub fn unregister_group(&self, address: u16) -> Result<(), RegistryError> {
        self.inner.registry.unregister_group(address)
    }
}

#[async_trait]
impl BusLink for Gateway {
    async fn send_get_answer(&self, frame: Frame) -> SendResult {
        Gateway::send_get_answer(self, frame).await
    }

    fn register_device(
        &self,
        address: u8,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        Gateway::register_device(self, address, endpoint)
    }

    fn unregister_device(&self, address: u8) -> Result<(), RegistryError> {
        Gateway::unregister_device(self, address)
    }

    fn register_group(
        &self,
        address: u16,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        Gateway::register_group(self, address, endpoint)
    }

    fn unregister_group(&self, address: u16) -> Result<(), RegistryError> {
        Gateway::unregister_group(self, address)
    }
}

/// Link held by background jobs; does not keep the gateway alive.
struct WeakLink(Weak<Inner>);

impl WeakLink {
    fn gateway(&self) -> Option<Gateway> {
        self.0.upgrade().map(|inner| Gateway { inner })
    }
}

#[async_trait]
impl BusLink for WeakLink {
    async fn send_get_answer(&self, frame: Frame) -> SendResult {
        match self.gateway() {
            Some(gateway) => gateway.send_get_answer(frame).await,
            None => SendResult::failed(),
        }
    }

    fn register_device(
        &self,
        address: u8,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        match self.gateway() {
            Some(gateway) => gateway.register_device(address, endpoint),
            None => Err(RegistryError::UnknownDevice(address)),
        }
    }

    fn unregister_device(&self, address: u8) -> Result<(), RegistryError> {
        match self.gateway() {
            Some(gateway) => gateway.unregister_device(address),
            None => Err(RegistryError::UnknownDevice(address)),
        }
    }

    fn register_group(
        &self,
        address: u16,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<(), RegistryError> {
        match self.gateway() {
            Some(gateway) => gateway.register_group(address, endpoint),
            None => Err(RegistryError::UnknownGroup(address)),
        }
    }

    fn unregister_group(&self, address: u16) -> Result<(), RegistryError> {
        match self.gateway() {
            Some(gateway) => gateway.unregister_group(address),
            None => Err(RegistryError::UnknownGroup(address)),
        }
    }
}
