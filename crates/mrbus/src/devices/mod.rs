// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device and group endpoints.
//!
//! A [`Device`] is the endpoint registered with the gateway. It owns the
//! channel states, the refresh cache and a per-device command lock; what the
//! bus bytes mean is delegated to a [`DeviceModel`], one per device type.
//!
//! # Channels
//!
//! | Kind | Channels |
//! |------|----------|
//! | `lightcontrol2` | `switch1`, `switch2` |
//! | `universal4i4o` | `switch1` .. `switch4` |
//! | `ovencontrol` | `onoff`, `power`, `flowlinetemp`, `returnlinetemp` |
//! | `rollershutter` | `position`, `locked` |
//! | `switchgroup` | `state` |

mod light;
mod oven;
mod shutter;
mod switch_group;

pub use light::LightSwitch;
pub use oven::OvenControl;
pub use shutter::RollerShutter;
pub use switch_group::SwitchGroup;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::{DeviceConfig, DeviceKind, GroupConfig, GroupKind};
use crate::frame::Frame;
use crate::link::BusLink;
use crate::protocol::BROADCAST_ADDRESS;
use crate::registry::{Endpoint, RegistryError};

/// How long a polled state group is served from cache.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the channel update broadcast.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Command addressed to one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelCommand {
    /// Report the current state, polling the device if the cache is stale.
    Refresh,
    OnOff(bool),
    Decimal(f64),
    Percent(u8),
}

/// Channel value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelState {
    OnOff(bool),
    Decimal(f64),
    Percent(u8),
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnOff(true) => f.write_str("ON"),
            Self::OnOff(false) => f.write_str("OFF"),
            Self::Decimal(v) => write!(f, "{:.1}", v),
            Self::Percent(p) => write!(f, "{}%", p),
        }
    }
}

/// State change published by an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub thing: String,
    pub channel: &'static str,
    pub state: ChannelState,
}

/// Channel states produced by decoding a frame.
pub type States = Vec<(&'static str, ChannelState)>;

/// Result of decoding an answer or notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub states: States,
    /// Cache key whose state group this frame fully refreshed.
    pub refreshed: Option<&'static str>,
}

impl Applied {
    pub fn states(states: States) -> Self {
        Self {
            states,
            refreshed: None,
        }
    }

    pub fn refreshed(mut self, key: &'static str) -> Self {
        self.refreshed = Some(key);
        self
    }
}

/// What to do for a channel command.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Ask the device for a state group. Skipped while `cache_key` is fresh.
    Poll {
        cache_key: Option<&'static str>,
        command: u8,
        sub_command: u8,
    },
    /// Send a command frame.
    Send {
        command: u8,
        sub_command: u8,
        payload: Vec<u8>,
        /// States published after the frame was delivered.
        on_success: States,
        /// Publish `on_success` before sending, regardless of the outcome.
        optimistic: bool,
    },
}

/// Per-type mapping between channels and bus frames.
pub trait DeviceModel: Send {
    fn kind(&self) -> &'static str;

    fn channels(&self) -> &'static [&'static str];

    /// Translate a channel command. `None` means nothing goes on the bus.
    fn plan(&self, channel: &str, command: ChannelCommand) -> Option<Action>;

    /// Decode the answer to a [`Action::Poll`].
    fn apply_answer(&self, sub_command: u8, payload: &[u8]) -> Applied;

    /// Decode an unsolicited frame from the device.
    fn apply_message(&self, frame: &Frame) -> Applied;

    /// States to publish when a poll got no answer.
    fn on_poll_failed(&self, _sub_command: u8) -> States {
        Vec::new()
    }

    /// Track a state the device confirmed.
    fn observe(&mut self, _channel: &str, _state: ChannelState) {}
}

/// Bus address of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Device(u8),
    Group(u16),
}

impl Target {
    /// Receiver byte for frames this endpoint sends.
    pub fn receiver(self) -> u8 {
        match self {
            Self::Device(address) => address,
            Self::Group(_) => BROADCAST_ADDRESS,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(address) => write!(f, "device {}", address),
            Self::Group(address) => write!(f, "group {}", address),
        }
    }
}

/// Endpoint for one configured device or group.
pub struct Device {
    name: String,
    target: Target,
    link: Arc<dyn BusLink>,
    model: Mutex<Box<dyn DeviceModel>>,
    states: Mutex<HashMap<&'static str, ChannelState>>,
    last_refresh: Mutex<HashMap<&'static str, Instant>>,
    commands: tokio::sync::Mutex<()>,
    updates: broadcast::Sender<ChannelUpdate>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        target: Target,
        model: Box<dyn DeviceModel>,
        link: Arc<dyn BusLink>,
        updates: broadcast::Sender<ChannelUpdate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            target,
            link,
            model: Mutex::new(model),
            states: Mutex::new(HashMap::new()),
            last_refresh: Mutex::new(HashMap::new()),
            commands: tokio::sync::Mutex::new(()),
            updates,
        })
    }

    /// Build the endpoint for a configured device.
    pub fn from_config(
        config: &DeviceConfig,
        link: Arc<dyn BusLink>,
        updates: broadcast::Sender<ChannelUpdate>,
    ) -> Arc<Self> {
        let model: Box<dyn DeviceModel> = match config.kind {
            DeviceKind::LightControl2 => Box::new(LightSwitch::light_control2()),
            DeviceKind::Universal4I4O => Box::new(LightSwitch::universal4i4o()),
            DeviceKind::OvenControl => Box::new(OvenControl::new()),
            DeviceKind::RollerShutter => Box::new(RollerShutter::new()),
        };
        Self::new(
            config.display_name(),
            Target::Device(config.address),
            model,
            link,
            updates,
        )
    }

    /// Build the endpoint for a configured group.
    pub fn from_group_config(
        config: &GroupConfig,
        link: Arc<dyn BusLink>,
        updates: broadcast::Sender<ChannelUpdate>,
    ) -> Arc<Self> {
        let model: Box<dyn DeviceModel> = match config.kind {
            GroupKind::SwitchGroup => Box::new(SwitchGroup::new(config.address)),
        };
        Self::new(
            config.display_name(),
            Target::Group(config.address),
            model,
            link,
            updates,
        )
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Device type label, e.g. `lightcontrol2`.
    pub fn kind(&self) -> &'static str {
        self.model.lock().kind()
    }

    pub fn channels(&self) -> &'static [&'static str] {
        self.model.lock().channels()
    }

    /// Last known state of `channel`.
    pub fn state(&self, channel: &str) -> Option<ChannelState> {
        self.states.lock().get(channel).copied()
    }

    /// Register with the gateway.
    pub fn attach(self: &Arc<Self>) -> Result<(), RegistryError> {
        let endpoint: Arc<dyn Endpoint> = self.clone();
        match self.target {
            Target::Device(address) => self.link.register_device(address, endpoint)?,
            Target::Group(address) => self.link.register_group(address, endpoint)?,
        }
        tracing::info!("{} ({}) attached as {}", self.name, self.kind(), self.target);
        Ok(())
    }

    /// Unregister from the gateway.
    pub fn detach(&self) -> Result<(), RegistryError> {
        match self.target {
            Target::Device(address) => self.link.unregister_device(address),
            Target::Group(address) => self.link.unregister_group(address),
        }
    }

    /// Handle a command for one channel. Returns whether the bus
    /// accepted it; cache hits and no-ops count as success.
    pub async fn handle_command(&self, channel: &str, command: ChannelCommand) -> bool {
        let _serial = self.commands.lock().await;
        tracing::debug!("{} ({}): {:?} on {}", self.name, self.target, command, channel);

        let action = self.model.lock().plan(channel, command);
        match action {
            None => {
                if command == ChannelCommand::Refresh {
                    self.republish(channel);
                } else {
                    tracing::debug!("{}: nothing to send for {:?} on {}", self.name, command, channel);
                }
                true
            }
            Some(Action::Poll {
                cache_key,
                command,
                sub_command,
            }) => {
                if cache_key.is_some_and(|key| self.is_fresh(key)) {
                    tracing::debug!("{}: state already present", self.name);
                    self.republish(channel);
                    return true;
                }

                let frame = Frame::request(self.target.receiver(), command, sub_command, Vec::new());
                let result = self.link.send_get_answer(frame).await;
                match result.answer_payload() {
                    Some(payload) => {
                        let applied = self.model.lock().apply_answer(sub_command, payload);
                        self.apply(applied);
                        true
                    }
                    None => {
                        tracing::warn!("{}: no state from {}", self.name, self.target);
                        let fallback = self.model.lock().on_poll_failed(sub_command);
                        self.publish(fallback, false);
                        false
                    }
                }
            }
            Some(Action::Send {
                command,
                sub_command,
                payload,
                on_success,
                optimistic,
            }) => {
                if optimistic {
                    self.publish(on_success.clone(), true);
                }
                let frame = Frame::request(self.target.receiver(), command, sub_command, payload);
                let delivered = self.link.send(frame).await;
                if delivered && !optimistic {
                    self.publish(on_success, true);
                } else if !delivered {
                    tracing::warn!("{}: command on {} not delivered", self.name, channel);
                }
                delivered
            }
        }
    }

    /// Refresh every channel, in channel order.
    pub async fn refresh_all(&self) {
        for channel in self.channels() {
            self.handle_command(channel, ChannelCommand::Refresh).await;
        }
    }

    fn is_fresh(&self, key: &str) -> bool {
        self.last_refresh
            .lock()
            .get(key)
            .is_some_and(|at| at.elapsed() < REFRESH_INTERVAL)
    }

    fn apply(&self, applied: Applied) {
        if let Some(key) = applied.refreshed {
            self.last_refresh.lock().insert(key, Instant::now());
        }
        self.publish(applied.states, true);
    }

    fn republish(&self, channel: &str) {
        let cached = self.states.lock().get_key_value(channel).map(|(k, v)| (*k, *v));
        if let Some((channel, state)) = cached {
            self.send_update(channel, state);
        }
    }

    /// Record and announce states; `observe` feeds them back to the model.
    fn publish(&self, states: States, observe: bool) {
        for (channel, state) in states {
            if observe {
                self.model.lock().observe(channel, state);
            }
            self.states.lock().insert(channel, state);
            self.send_update(channel, state);
        }
    }

    fn send_update(&self, channel: &'static str, state: ChannelState) {
        tracing::info!("{} {} -> {}", self.name, channel, state);
        // No subscribers is fine.
        let _ = self.updates.send(ChannelUpdate {
            thing: self.name.clone(),
            channel,
            state,
        });
    }
}

impl Endpoint for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn handle_message(&self, frame: &Frame) {
        let applied = self.model.lock().apply_message(frame);
        if applied.states.is_empty() {
            tracing::trace!("{}: ignoring {}", self.name, frame);
            return;
        }
        self.apply(applied);
    }
}

/// Payload byte `index`, logging when the device sent too little.
pub(crate) fn byte_at(payload: &[u8], index: usize, what: &str) -> Option<u8> {
    let byte = payload.get(index).copied();
    if byte.is_none() {
        tracing::warn!(
            "{}: payload has {} bytes, need {}",
            what,
            payload.len(),
            index + 1
        );
    }
    byte
}


#[cfg(test)]
mod tests {
    use super::testing::{drain, ScriptedLink};
    use super::*;
    use crate::protocol::{cmd, light, oven};

    fn light_device(link: Arc<ScriptedLink>) -> (Arc<Device>, broadcast::Receiver<ChannelUpdate>) {
        let (tx, rx) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let config = DeviceConfig {
            kind: DeviceKind::LightControl2,
            address: 3,
            name: Some("kitchen".into()),
        };
        (Device::from_config(&config, link, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_polls_then_serves_cache() {
        let link = ScriptedLink::acking(vec![1, 0]);
        let (device, mut rx) = light_device(link.clone());

        assert!(device.handle_command("switch1", ChannelCommand::Refresh).await);
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].thing, "kitchen");
        assert_eq!(device.state("switch1"), Some(ChannelState::OnOff(true)));
        assert_eq!(device.state("switch2"), Some(ChannelState::OnOff(false)));

        assert!(device.handle_command("switch2", ChannelCommand::Refresh).await);
        assert_eq!(link.sent().len(), 1);
        let updates = drain(&mut rx);
        assert_eq!(
            updates,
            vec![ChannelUpdate {
                thing: "kitchen".into(),
                channel: "switch2",
                state: ChannelState::OnOff(false),
            }]
        );

        tokio::time::advance(REFRESH_INTERVAL).await;
        device.handle_command("switch1", ChannelCommand::Refresh).await;
        assert_eq!(link.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_polls_once_per_group() {
        let link = ScriptedLink::acking(vec![0, 1]);
        let (device, _rx) = light_device(link.clone());

        device.refresh_all().await;
        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].receiver, 3);
        assert_eq!(sent[0].command, cmd::LIGHT);
        assert_eq!(sent[0].sub_command, light::GET_STATE);
    }

    #[tokio::test]
    async fn test_failed_poll_leaves_cache_stale() {
        let link = ScriptedLink::silent();
        let (device, mut rx) = light_device(link.clone());

        assert!(!device.handle_command("switch1", ChannelCommand::Refresh).await);
        assert!(drain(&mut rx).is_empty());
        device.handle_command("switch1", ChannelCommand::Refresh).await;
        assert_eq!(link.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_set_state_published_only_when_delivered() {
        let link = ScriptedLink::silent();
        let (device, mut rx) = light_device(link.clone());

        assert!(!device.handle_command("switch2", ChannelCommand::OnOff(true)).await);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(link.sent()[0].payload, vec![2, 1]);

        *link.answer.lock() = Some(Vec::new());
        assert!(device.handle_command("switch2", ChannelCommand::OnOff(true)).await);
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].state, ChannelState::OnOff(true));
    }

    #[tokio::test]
    async fn test_status_update_message() {
        let link = ScriptedLink::silent();
        let (device, mut rx) = light_device(link);

        device.handle_message(&Frame {
            sender: 3,
            command: cmd::LIGHT,
            sub_command: light::STATUS_UPDATE,
            payload: vec![0, 1],
            ..Default::default()
        });
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 2);
        assert_eq!(device.state("switch2"), Some(ChannelState::OnOff(true)));

        // Not for this device type.
        device.handle_message(&Frame {
            sender: 3,
            command: cmd::OVEN,
            sub_command: oven::STATUS_UPDATE,
            payload: vec![1, 50],
            ..Default::default()
        });
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_attach_and_detach() {
        let link = ScriptedLink::silent();
        let (device, _rx) = light_device(link.clone());
        assert_eq!(device.kind(), "lightcontrol2");
        device.attach().expect("attach");
        assert_eq!(*link.registered.lock(), vec![Target::Device(3)]);
        device.detach().expect("detach");
        assert!(link.registered.lock().is_empty());

        let (tx, _) = broadcast::channel(4);
        let group = Device::from_group_config(
            &GroupConfig {
                kind: GroupKind::SwitchGroup,
                address: 0x0105,
                name: None,
            },
            link.clone(),
            tx,
        );
        group.attach().expect("attach");
        assert_eq!(*link.registered.lock(), vec![Target::Group(0x0105)]);
        assert_eq!(group.target().receiver(), BROADCAST_ADDRESS);
    }

    #[test]
    fn test_byte_at() {
        assert_eq!(byte_at(&[1, 2], 1, "test"), Some(2));
        assert_eq!(byte_at(&[1, 2], 2, "test"), None);
    }
}
