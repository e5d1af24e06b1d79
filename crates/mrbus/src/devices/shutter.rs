// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Roller shutter actuator. Positions travel in steps of ten percent.

use super::{byte_at, Action, Applied, ChannelCommand, ChannelState, DeviceModel};
use crate::frame::Frame;
use crate::protocol::{cmd, shutter, value};

const CHANNELS: &[&str] = &["position", "locked"];

/// Highest position step (fully closed).
const MAX_STEP: u8 = 10;

#[derive(Debug, Clone, Default)]
pub struct RollerShutter {
    /// Last confirmed position step (0..=10).
    step: Option<u8>,
}

impl RollerShutter {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(step: u8) -> ChannelState {
        ChannelState::Percent(step.min(MAX_STEP) * 10)
    }
}

impl DeviceModel for RollerShutter {
    fn kind(&self) -> &'static str {
        "rollershutter"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn plan(&self, channel: &str, command: ChannelCommand) -> Option<Action> {
        match (channel, command) {
            ("position", ChannelCommand::Refresh) => Some(Action::Poll {
                cache_key: None,
                command: cmd::SHUTTER,
                sub_command: shutter::GET_POSITION,
            }),
            ("locked", ChannelCommand::Refresh) => Some(Action::Poll {
                cache_key: None,
                command: cmd::SHUTTER,
                sub_command: shutter::GET_LOCK,
            }),
            ("position", ChannelCommand::Percent(percent)) => {
                let step = percent.min(100) / 10;
                if self.step == Some(step) {
                    tracing::debug!("shutter already at step {}", step);
                    return None;
                }
                Some(Action::Send {
                    command: cmd::SHUTTER,
                    sub_command: shutter::SET_POSITION,
                    payload: vec![step],
                    on_success: vec![("position", Self::position(step))],
                    optimistic: false,
                })
            }
            ("locked", ChannelCommand::OnOff(locked)) => Some(Action::Send {
                command: cmd::SHUTTER,
                sub_command: shutter::SET_LOCK,
                payload: vec![if locked { value::ON } else { value::OFF }],
                on_success: vec![("locked", ChannelState::OnOff(locked))],
                optimistic: false,
            }),
            _ => None,
        }
    }

    fn apply_answer(&self, sub_command: u8, payload: &[u8]) -> Applied {
        match sub_command {
            shutter::GET_POSITION => match byte_at(payload, 0, "shutter position") {
                Some(step) => Applied::states(vec![("position", Self::position(step))]),
                None => Applied::default(),
            },
            shutter::GET_LOCK => match byte_at(payload, 0, "shutter lock") {
                Some(locked) => Applied::states(vec![("locked", ChannelState::OnOff(locked > 0))]),
                None => Applied::default(),
            },
            _ => Applied::default(),
        }
    }

    fn apply_message(&self, frame: &Frame) -> Applied {
        if frame.command != cmd::SHUTTER || frame.sub_command != shutter::STATUS_UPDATE {
            return Applied::default();
        }
        let (Some(step), Some(locked)) = (
            byte_at(&frame.payload, 0, "shutter status"),
            byte_at(&frame.payload, 1, "shutter status"),
        ) else {
            return Applied::default();
        };
        Applied::states(vec![
            ("position", Self::position(step)),
            ("locked", ChannelState::OnOff(locked > 0)),
        ])
    }

    fn observe(&mut self, channel: &str, state: ChannelState) {
        if let ("position", ChannelState::Percent(percent)) = (channel, state) {
            self.step = Some(percent / 10);
        }
    }
}
