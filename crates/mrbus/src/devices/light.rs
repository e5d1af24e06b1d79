// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Switch actuators speaking the `LIGHT` command group.

use super::{Action, Applied, ChannelCommand, ChannelState, DeviceModel, States};
use crate::frame::Frame;
use crate::protocol::{cmd, light, value};

const TWO_CHANNELS: &[&str] = &["switch1", "switch2"];
const FOUR_CHANNELS: &[&str] = &["switch1", "switch2", "switch3", "switch4"];

/// LightControl2 and Universal4I4O: N on/off outputs, one state byte each.
#[derive(Debug, Clone)]
pub struct LightSwitch {
    kind: &'static str,
    channels: &'static [&'static str],
}

impl LightSwitch {
    pub fn light_control2() -> Self {
        Self {
            kind: "lightcontrol2",
            channels: TWO_CHANNELS,
        }
    }

    pub fn universal4i4o() -> Self {
        Self {
            kind: "universal4i4o",
            channels: FOUR_CHANNELS,
        }
    }

    fn switch_number(&self, channel: &str) -> Option<u8> {
        self.channels
            .iter()
            .position(|c| *c == channel)
            .map(|i| i as u8 + 1)
    }

    /// One state byte per output, nonzero means on. `None` unless every
    /// output is present.
    fn decode_states(&self, payload: &[u8]) -> Option<States> {
        if payload.len() < self.channels.len() {
            tracing::debug!(
                "{}: {} state bytes for {} outputs, ignoring",
                self.kind,
                payload.len(),
                self.channels.len()
            );
            return None;
        }
        let states = self
            .channels
            .iter()
            .zip(payload)
            .map(|(channel, b)| (*channel, ChannelState::OnOff(*b != 0)))
            .collect();
        Some(states)
    }
}

impl DeviceModel for LightSwitch {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn channels(&self) -> &'static [&'static str] {
        self.channels
    }

    fn plan(&self, channel: &str, command: ChannelCommand) -> Option<Action> {
        let switch = self.switch_number(channel)?;
        match command {
            ChannelCommand::Refresh => Some(Action::Poll {
                cache_key: Some("state"),
                command: cmd::LIGHT,
                sub_command: light::GET_STATE,
            }),
            ChannelCommand::OnOff(on) => Some(Action::Send {
                command: cmd::LIGHT,
                sub_command: light::SET_STATE,
                payload: vec![switch, if on { value::ON } else { value::OFF }],
                on_success: vec![(self.channels[switch as usize - 1], ChannelState::OnOff(on))],
                optimistic: false,
            }),
            _ => None,
        }
    }

    fn apply_answer(&self, sub_command: u8, payload: &[u8]) -> Applied {
        if sub_command != light::GET_STATE {
            return Applied::default();
        }
        match self.decode_states(payload) {
            Some(states) => Applied::states(states).refreshed("state"),
            None => Applied::default(),
        }
    }

    fn apply_message(&self, frame: &Frame) -> Applied {
        if frame.command == cmd::LIGHT && frame.sub_command == light::STATUS_UPDATE {
            tracing::debug!("{} status update", self.kind);
            if let Some(states) = self.decode_states(&frame.payload) {
                return Applied::states(states);
            }
        }
        Applied::default()
    }
}
