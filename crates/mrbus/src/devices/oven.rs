// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pellet oven controller.
//!
//! Power travels as tenths (20..=100) and is reported as `tenths / 10.0`.
//! Temperatures are little-endian i16 tenths of a degree.

use super::{byte_at, Action, Applied, ChannelCommand, ChannelState, DeviceModel, States};
use crate::frame::Frame;
use crate::protocol::{cmd, oven, value};

const CHANNELS: &[&str] = &["onoff", "power", "flowlinetemp", "returnlinetemp"];

const MIN_POWER: u8 = 20;
const MAX_POWER: u8 = 100;

/// Reported when the state poll goes unanswered.
const FALLBACK_POWER: f64 = 2.5;

#[derive(Debug, Clone, Default)]
pub struct OvenControl {
    /// Last power the device confirmed, in tenths.
    power: Option<u8>,
}

impl OvenControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel value to bus tenths, clamped to the accepted range.
    /// `None` for NaN and infinities.
    pub fn power_tenths(value: f64) -> Option<u8> {
        if !value.is_finite() {
            return None;
        }
        let tenths = (value * 10.0).trunc();
        Some(tenths.clamp(f64::from(MIN_POWER), f64::from(MAX_POWER)) as u8)
    }

    fn decode_state(payload: &[u8]) -> States {
        let (Some(on), Some(power)) = (
            byte_at(payload, 0, "oven state"),
            byte_at(payload, 1, "oven state"),
        ) else {
            return Vec::new();
        };
        vec![
            ("onoff", ChannelState::OnOff(on != 0)),
            ("power", ChannelState::Decimal(f64::from(power) / 10.0)),
        ]
    }

    fn decode_temps(payload: &[u8]) -> States {
        if byte_at(payload, 3, "oven temperature").is_none() {
            return Vec::new();
        }
        let flow = i16::from_le_bytes([payload[0], payload[1]]);
        let ret = i16::from_le_bytes([payload[2], payload[3]]);
        vec![
            ("flowlinetemp", ChannelState::Decimal(f64::from(flow) / 10.0)),
            ("returnlinetemp", ChannelState::Decimal(f64::from(ret) / 10.0)),
        ]
    }

    fn decode(sub_command: u8, payload: &[u8]) -> Applied {
        match sub_command {
            oven::GET_STATE | oven::STATUS_UPDATE => {
                let states = Self::decode_state(payload);
                if states.is_empty() {
                    return Applied::default();
                }
                Applied::states(states).refreshed("state")
            }
            oven::GET_TEMP | oven::TEMP_UPDATE => {
                let states = Self::decode_temps(payload);
                if states.is_empty() {
                    return Applied::default();
                }
                Applied::states(states).refreshed("temp")
            }
            _ => Applied::default(),
        }
    }
}

impl DeviceModel for OvenControl {
    fn kind(&self) -> &'static str {
        "ovencontrol"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn plan(&self, channel: &str, command: ChannelCommand) -> Option<Action> {
        match (channel, command) {
            ("onoff" | "power", ChannelCommand::Refresh) => Some(Action::Poll {
                cache_key: Some("state"),
                command: cmd::OVEN,
                sub_command: oven::GET_STATE,
            }),
            ("flowlinetemp" | "returnlinetemp", ChannelCommand::Refresh) => Some(Action::Poll {
                cache_key: Some("temp"),
                command: cmd::OVEN,
                sub_command: oven::GET_TEMP,
            }),
            ("onoff", ChannelCommand::OnOff(on)) => Some(Action::Send {
                command: cmd::OVEN,
                sub_command: oven::SET_ONOFF,
                payload: vec![if on { value::ON } else { value::OFF }],
                on_success: vec![("onoff", ChannelState::OnOff(on))],
                optimistic: false,
            }),
            ("power", ChannelCommand::Decimal(requested)) => {
                let Some(tenths) = Self::power_tenths(requested) else {
                    tracing::warn!("oven power {} rejected", requested);
                    return None;
                };
                if self.power == Some(tenths) {
                    tracing::debug!("oven power already {}", tenths);
                    return None;
                }
                Some(Action::Send {
                    command: cmd::OVEN,
                    sub_command: oven::SET_POWER,
                    payload: vec![tenths],
                    on_success: vec![("power", ChannelState::Decimal(f64::from(tenths) / 10.0))],
                    optimistic: false,
                })
            }
            _ => None,
        }
    }

    fn apply_answer(&self, sub_command: u8, payload: &[u8]) -> Applied {
        Self::decode(sub_command, payload)
    }

    fn apply_message(&self, frame: &Frame) -> Applied {
        if frame.command != cmd::OVEN {
            return Applied::default();
        }
        match frame.sub_command {
            oven::STATUS_UPDATE | oven::TEMP_UPDATE => Self::decode(frame.sub_command, &frame.payload),
            _ => Applied::default(),
        }
    }

    fn on_poll_failed(&self, sub_command: u8) -> States {
        if sub_command == oven::GET_STATE {
            vec![
                ("onoff", ChannelState::OnOff(false)),
                ("power", ChannelState::Decimal(FALLBACK_POWER)),
            ]
        } else {
            Vec::new()
        }
    }

    fn observe(&mut self, channel: &str, state: ChannelState) {
        if let ("power", ChannelState::Decimal(v)) = (channel, state) {
            self.power = Some((v * 10.0).round() as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testing::{drain, ScriptedLink};
    use crate::devices::{Device, Target};
    use tokio::sync::broadcast;

    #[test]
    fn test_power_tenths_clamps_and_truncates() {
        assert_eq!(OvenControl::power_tenths(5.0), Some(50));
        assert_eq!(OvenControl::power_tenths(5.59), Some(55));
        assert_eq!(OvenControl::power_tenths(1.0), Some(20));
        assert_eq!(OvenControl::power_tenths(0.0), Some(20));
        assert_eq!(OvenControl::power_tenths(12.5), Some(100));
        assert_eq!(OvenControl::power_tenths(-3.0), Some(20));
    }

    #[test]
    fn test_non_finite_power_not_sent() {
        assert_eq!(OvenControl::power_tenths(f64::NAN), None);
        assert_eq!(OvenControl::power_tenths(f64::INFINITY), None);
        assert_eq!(OvenControl::power_tenths(f64::NEG_INFINITY), None);

        let model = OvenControl::new();
        assert!(model.plan("power", ChannelCommand::Decimal(f64::NAN)).is_none());
        assert!(model.plan("power", ChannelCommand::Decimal(4.0)).is_some());
    }

    #[test]
    fn test_state_answer() {
        let model = OvenControl::new();
        let applied = model.apply_answer(oven::GET_STATE, &[1, 45]);
        assert_eq!(applied.refreshed, Some("state"));
        assert_eq!(
            applied.states,
            vec![
                ("onoff", ChannelState::OnOff(true)),
                ("power", ChannelState::Decimal(4.5)),
            ]
        );
    }

    #[test]
    fn test_temp_answer_is_signed_little_endian() {
        let model = OvenControl::new();
        let flow = 653i16.to_le_bytes();
        let ret = (-25i16).to_le_bytes();
        let applied = model.apply_answer(oven::GET_TEMP, &[flow[0], flow[1], ret[0], ret[1]]);
        assert_eq!(applied.refreshed, Some("temp"));
        assert_eq!(
            applied.states,
            vec![
                ("flowlinetemp", ChannelState::Decimal(65.3)),
                ("returnlinetemp", ChannelState::Decimal(-2.5)),
            ]
        );
    }

    #[test]
    fn test_short_payloads_ignored() {
        let model = OvenControl::new();
        assert_eq!(model.apply_answer(oven::GET_STATE, &[1]), Applied::default());
        assert_eq!(model.apply_answer(oven::GET_TEMP, &[1, 2, 3]), Applied::default());
    }

    #[test]
    fn test_poll_failure_fallback() {
        let model = OvenControl::new();
        assert_eq!(
            model.on_poll_failed(oven::GET_STATE),
            vec![
                ("onoff", ChannelState::OnOff(false)),
                ("power", ChannelState::Decimal(2.5)),
            ]
        );
        assert!(model.on_poll_failed(oven::GET_TEMP).is_empty());
    }

    #[test]
    fn test_set_power_skipped_when_unchanged() {
        let mut model = OvenControl::new();
        assert!(model.plan("power", ChannelCommand::Decimal(5.0)).is_some());

        model.observe("power", ChannelState::Decimal(5.0));
        assert!(model.plan("power", ChannelCommand::Decimal(5.0)).is_none());
        assert!(model.plan("power", ChannelCommand::Decimal(5.09)).is_none());
        assert!(model.plan("power", ChannelCommand::Decimal(6.0)).is_some());
    }

    #[test]
    fn test_status_messages() {
        let model = OvenControl::new();
        let frame = Frame {
            command: cmd::OVEN,
            sub_command: oven::TEMP_UPDATE,
            payload: vec![0xC8, 0x00, 0x64, 0x00],
            ..Default::default()
        };
        let applied = model.apply_message(&frame);
        assert_eq!(applied.states[0], ("flowlinetemp", ChannelState::Decimal(20.0)));
        assert_eq!(applied.states[1], ("returnlinetemp", ChannelState::Decimal(10.0)));

        let frame = Frame {
            command: cmd::OVEN,
            sub_command: oven::GET_STATE,
            payload: vec![1, 50],
            ..Default::default()
        };
        assert!(model.apply_message(&frame).states.is_empty());
    }

    #[tokio::test]
    async fn test_device_fallback_does_not_track_power() {
        let link = ScriptedLink::silent();
        let (tx, mut rx) = broadcast::channel(16);
        let device = Device::new(
            "oven",
            Target::Device(10),
            Box::new(OvenControl::new()),
            link.clone(),
            tx,
        );

        assert!(!device.handle_command("power", ChannelCommand::Refresh).await);
        assert_eq!(device.state("power"), Some(ChannelState::Decimal(2.5)));
        assert_eq!(drain(&mut rx).len(), 2);

        // 2.5 was never confirmed by the device, so 2.5 is still sent.
        *link.answer.lock() = Some(Vec::new());
        assert!(device.handle_command("power", ChannelCommand::Decimal(2.5)).await);
        let sent = link.sent();
        assert_eq!(sent.last().map(|f| f.payload.clone()), Some(vec![25]));

        // Now confirmed: the same value is not sent again.
        device.handle_command("power", ChannelCommand::Decimal(2.5)).await;
        assert_eq!(link.sent().len(), sent.len());
    }
}
