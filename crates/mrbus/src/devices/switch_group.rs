// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Switch group: devices sharing one on/off state through
//! `COMMON/GROUP_SET_STATE` broadcasts.

use super::{Action, Applied, ChannelCommand, ChannelState, DeviceModel};
use crate::frame::Frame;
use crate::protocol::{cmd, common, group_type, value};
use crate::registry::group_address;

const CHANNELS: &[&str] = &["state"];

#[derive(Debug, Clone)]
pub struct SwitchGroup {
    address: u16,
}

impl SwitchGroup {
    pub fn new(address: u16) -> Self {
        Self { address }
    }
}

impl DeviceModel for SwitchGroup {
    fn kind(&self) -> &'static str {
        "switchgroup"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn plan(&self, channel: &str, command: ChannelCommand) -> Option<Action> {
        let ("state", ChannelCommand::OnOff(on)) = (channel, command) else {
            return None;
        };
        let [hi, lo] = self.address.to_be_bytes();
        Some(Action::Send {
            command: cmd::COMMON,
            sub_command: common::GROUP_SET_STATE,
            payload: vec![hi, lo, group_type::SWITCH, if on { value::ON } else { value::OFF }],
            on_success: vec![("state", ChannelState::OnOff(on))],
            optimistic: true,
        })
    }

    fn apply_answer(&self, _sub_command: u8, _payload: &[u8]) -> Applied {
        Applied::default()
    }

    fn apply_message(&self, frame: &Frame) -> Applied {
        if group_address(frame) != Some(self.address) {
            return Applied::default();
        }
        match frame.payload[2] {
            group_type::SWITCH => Applied::states(vec![(
                "state",
                ChannelState::OnOff(frame.payload[3] != value::OFF),
            )]),
            other => {
                tracing::warn!("group {}: unsupported value type {}", self.address, other);
                Applied::default()
            }
        }
    }
}
