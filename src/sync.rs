/// The relay loop: one reading in, one telemetry push and one valve update out
use async_trait::async_trait;
use log::{debug, info, warn};

use crate::errors::{SinkError, SyncError};
use crate::models::{ActuatorCommand, TelemetrySample};
use crate::serial::{Actuator, TelemetrySource};

/// Append-only store for telemetry samples.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn push(&self, sample: &TelemetrySample) -> Result<(), SinkError>;
}

/// Single last-writer-wins slot for the valve command.
#[async_trait]
pub trait ControlSink: Send + Sync {
    async fn set(&self, command: &ActuatorCommand) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting on the source
    Idle,
    /// Writing to the sinks
    Publishing,
}

/// What a single iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The source had nothing this time
    Empty,
    /// The frame was malformed and dropped
    Skipped,
    /// Both sink writes succeeded
    Published,
}

pub struct SyncLoop {
    source: Box<dyn TelemetrySource>,
    telemetry: Box<dyn TelemetrySink>,
    control: Box<dyn ControlSink>,
    actuator: Option<Box<dyn Actuator>>,
    state: SyncState,
    published: u64,
}

impl SyncLoop {
    pub fn new(
        source: Box<dyn TelemetrySource>,
        telemetry: Box<dyn TelemetrySink>,
        control: Box<dyn ControlSink>,
    ) -> Self {
        Self {
            source,
            telemetry,
            control,
            actuator: None,
            state: SyncState::Idle,
            published: 0,
        }
    }

    /// Echo each valve command back to the controller after it is stored.
    pub fn with_actuator(mut self, actuator: Box<dyn Actuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Run one iteration.
    ///
    /// Pulls once from the source. A reading is pushed to the telemetry sink
    /// and only then written to the control sink; if the push fails the
    /// control write is not attempted.
    pub async fn step(&mut self) -> Result<Step, SyncError> {
        self.state = SyncState::Idle;

        let reading = match self.source.next().await {
            Ok(Some(reading)) => reading,
            Ok(None) => return Ok(Step::Empty),
            Err(e) if e.is_recoverable() => {
                warn!("Skipping frame: {}", e);
                return Ok(Step::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        self.state = SyncState::Publishing;
        let result = self.publish(&reading.sample, &reading.command).await;
        self.state = SyncState::Idle;
        result?;

        self.published += 1;
        Ok(Step::Published)
    }

    async fn publish(
        &mut self,
        sample: &TelemetrySample,
        command: &ActuatorCommand,
    ) -> Result<(), SyncError> {
        self.telemetry.push(sample).await?;
        info!(
            "Pushed reading: humidity={:.2}% temperature={:.2}°C moisture={} water_level={}",
            sample.humidity, sample.temperature, sample.moisture, sample.water_level
        );

        self.control.set(command).await?;
        info!("Valve status updated: {}", command.status());

        if let Some(actuator) = self.actuator.as_mut() {
            // Best effort, the store already holds the command
            if let Err(e) = actuator.apply(command) {
                warn!("Failed to echo valve command to controller: {}", e);
            } else {
                debug!("Echoed valve command {} to controller", command.status());
            }
        }

        Ok(())
    }

    /// Relay readings until the source or a sink fails.
    pub async fn run(&mut self) -> Result<(), SyncError> {
        info!("Starting relay loop");

        loop {
            if let Err(e) = self.step().await {
                info!("Relay loop stopped after {} readings", self.published);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DecodeError, SourceError};
    use crate::models::{Reading, ServerTimestamp};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<String>>>;

    fn reading(valve_open: bool) -> Reading {
        Reading {
            sample: TelemetrySample {
                humidity: 1.5,
                temperature: 20.0,
                moisture: 30.0,
                water_level: 40.0,
                timestamp: ServerTimestamp,
            },
            command: ActuatorCommand { valve_open },
        }
    }

    /// Replays scripted results, then reports a dead transport.
    struct ScriptedSource {
        script: VecDeque<Result<Option<Reading>, SourceError>>,
        calls: Calls,
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn next(&mut self) -> Result<Option<Reading>, SourceError> {
            self.calls.lock().unwrap().push("next".into());
            self.script.pop_front().unwrap_or_else(|| {
                Err(SourceError::Transport(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "script exhausted",
                )))
            })
        }
    }

    struct RecordingSink {
        calls: Calls,
        fail: bool,
    }

    fn rejected() -> SinkError {
        SinkError::Status {
            path: "users/uid".into(),
            status: 401,
            body: "Permission denied".into(),
        }
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn push(&self, _sample: &TelemetrySample) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push("push".into());
            if self.fail {
                Err(rejected())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ControlSink for RecordingSink {
        async fn set(&self, command: &ActuatorCommand) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set:{}", command.status()));
            if self.fail {
                Err(rejected())
            } else {
                Ok(())
            }
        }
    }

    struct RecordingActuator {
        calls: Calls,
        fail: bool,
    }

    impl Actuator for RecordingActuator {
        fn apply(&mut self, command: &ActuatorCommand) -> io::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("apply:{}", command.status()));
            if self.fail {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
            } else {
                Ok(())
            }
        }
    }

    fn build(
        script: Vec<Result<Option<Reading>, SourceError>>,
        push_fails: bool,
        set_fails: bool,
    ) -> (SyncLoop, Calls) {
        let calls: Calls = Arc::default();
        let sync = SyncLoop::new(
            Box::new(ScriptedSource {
                script: script.into(),
                calls: calls.clone(),
            }),
            Box::new(RecordingSink {
                calls: calls.clone(),
                fail: push_fails,
            }),
            Box::new(RecordingSink {
                calls: calls.clone(),
                fail: set_fails,
            }),
        );
        (sync, calls)
    }

    fn recorded(calls: &Calls) -> Vec<String> {
        calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn empty_poll_then_reading_publishes_once_in_order() {
        let (mut sync, calls) = build(vec![Ok(None), Ok(Some(reading(true)))], false, false);

        assert_eq!(sync.step().await.unwrap(), Step::Empty);
        assert_eq!(recorded(&calls), ["next"]);

        assert_eq!(sync.step().await.unwrap(), Step::Published);
        assert_eq!(recorded(&calls), ["next", "next", "push", "set:on"]);
        assert_eq!(sync.published(), 1);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn failed_push_skips_control_update() {
        let (mut sync, calls) = build(vec![Ok(Some(reading(false)))], true, false);

        let err = sync.step().await.unwrap_err();

        assert!(matches!(err, SyncError::Sink(_)));
        assert_eq!(recorded(&calls), ["next", "push"]);
        assert_eq!(sync.published(), 0);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn failed_control_update_is_fatal() {
        let (mut sync, calls) = build(vec![Ok(Some(reading(false)))], false, true);

        assert!(matches!(sync.step().await, Err(SyncError::Sink(_))));
        assert_eq!(recorded(&calls), ["next", "push", "set:off"]);
    }

    #[tokio::test]
    async fn run_skips_bad_frames_and_stops_on_transport_fault() {
        let bad_frame = Err(SourceError::Decode(DecodeError::InvalidNumber {
            field: "humidity",
            value: "??".into(),
        }));
        let (mut sync, calls) = build(
            vec![
                Ok(Some(reading(true))),
                bad_frame,
                Ok(None),
                Ok(Some(reading(false))),
            ],
            false,
            false,
        );

        let err = sync.run().await.unwrap_err();

        assert!(matches!(err, SyncError::Source(SourceError::Transport(_))));
        assert_eq!(
            recorded(&calls),
            [
                "next", "push", "set:on", "next", "next", "next", "push", "set:off", "next"
            ]
        );
        assert_eq!(sync.published(), 2);
    }

    #[tokio::test]
    async fn actuator_echo_follows_sinks_and_failures_are_ignored() {
        let (sync, calls) = build(
            vec![Ok(Some(reading(true))), Ok(Some(reading(false)))],
            false,
            false,
        );
        let mut sync = sync.with_actuator(Box::new(RecordingActuator {
            calls: calls.clone(),
            fail: true,
        }));

        assert_eq!(sync.step().await.unwrap(), Step::Published);
        assert_eq!(sync.step().await.unwrap(), Step::Published);
        assert_eq!(
            recorded(&calls),
            [
                "next", "push", "set:on", "apply:on", "next", "push", "set:off", "apply:off"
            ]
        );
    }

    #[tokio::test]
    async fn decode_fault_is_reported_as_skip() {
        let (mut sync, calls) = build(
            vec![Err(SourceError::Decode(DecodeError::InvalidNumber {
                field: "water_level",
                value: "".into(),
            }))],
            false,
            false,
        );

        assert_eq!(sync.step().await.unwrap(), Step::Skipped);
        assert_eq!(recorded(&calls), ["next"]);
    }
}
