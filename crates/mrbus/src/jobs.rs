// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic bus jobs.
//!
//! The only job is the time broadcast: every period the current Unix time
//! goes out as `COMMON/ENVIR_INFO` to all devices. The first run happens
//! right away. Each run is spawned on its own.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::frame::Frame;
use crate::link::BusLink;
use crate::protocol::{cmd, common};

/// `COMMON/ENVIR_INFO` broadcast carrying `unix_secs` as big-endian u32.
pub fn time_sync_frame(unix_secs: u64) -> Frame {
    let secs = unix_secs as u32;
    Frame::broadcast(cmd::COMMON, common::ENVIR_INFO, secs.to_be_bytes().to_vec())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Timer driving the time broadcast.
pub struct JobScheduler {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl JobScheduler {
    /// Start broadcasting the time every `period`, beginning now.
    pub fn start(link: Arc<dyn BusLink>, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        let link = link.clone();
                        tokio::spawn(async move {
                            let frame = time_sync_frame(unix_now());
                            tracing::debug!("broadcasting time {:02X?}", frame.payload);
                            if !link.send(frame).await {
                                tracing::warn!("time broadcast failed");
                            }
                        });
                    }
                }
            }
            tracing::debug!("time sync job stopped");
        });

        tracing::info!("time sync job started (every {}s)", period.as_secs());
        Self {
            stop_tx,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the timer. Runs already spawned finish on their own.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Endpoint, RegistryError};
    use crate::send::SendResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<Frame>>,
    }

    #[async_trait]
    impl BusLink for RecordingLink {
        async fn send_get_answer(&self, frame: Frame) -> SendResult {
            self.sent.lock().push(frame);
            SendResult {
                delivered: true,
                answer: None,
                attempts: 3,
            }
        }

        fn register_device(&self, _: u8, _: Arc<dyn Endpoint>) -> Result<(), RegistryError> {
            Ok(())
        }

        fn unregister_device(&self, _: u8) -> Result<(), RegistryError> {
            Ok(())
        }

        fn register_group(&self, _: u16, _: Arc<dyn Endpoint>) -> Result<(), RegistryError> {
            Ok(())
        }

        fn unregister_group(&self, _: u16) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    #[test]
    fn test_time_sync_frame() {
        let frame = time_sync_frame(0x6543_2100);
        assert!(frame.is_broadcast());
        assert!(!frame.requires_ack());
        assert_eq!(frame.command, cmd::COMMON);
        assert_eq!(frame.sub_command, common::ENVIR_INFO);
        assert_eq!(frame.payload, vec![0x65, 0x43, 0x21, 0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_period() {
        let link = Arc::new(RecordingLink::default());
        let mut jobs = JobScheduler::start(link.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(link.sent.lock().len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(link.sent.lock().len(), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(link.sent.lock().len(), 4);

        jobs.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_runs_after_stop() {
        let link = Arc::new(RecordingLink::default());
        let mut jobs = JobScheduler::start(link.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(1)).await;
        jobs.stop();
        assert!(!jobs.is_running());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(link.sent.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let link = Arc::new(RecordingLink::default());
        {
            let _jobs = JobScheduler::start(link.clone(), Duration::from_secs(60));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(link.sent.lock().len(), 1);
    }
}
