/// Telemetry producers: the serial-attached controller and a synthetic stand-in
use async_trait::async_trait;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serialport::SerialPort;
use std::io::{self, BufRead, BufReader, Read};
use tokio::time::{sleep, Duration};

use crate::errors::{PortError, SourceError};
use crate::models::{ActuatorCommand, Reading, ServerTimestamp, TelemetrySample};
use crate::serial::actuator::SerialActuator;
use crate::serial::codec;
use crate::serial::port::{open_port, SerialSettings};
use crate::utils::round_to;

/// Longest line kept in memory; anything longer is dropped as noise
const MAX_LINE: u64 = 1024;

/// Something that produces readings on demand.
///
/// `Ok(None)` means nothing arrived this call and the caller should poll again.
/// Sources never end.
#[async_trait]
pub trait TelemetrySource: Send {
    async fn next(&mut self) -> Result<Option<Reading>, SourceError>;
}

/// Reads frames from a line-oriented byte stream, normally the controller's serial port.
pub struct DeviceSource<R> {
    // Taken while a blocking read is in flight
    reader: Option<R>,
    // Set while skipping the rest of an overlong line
    overflow: bool,
}

impl<R: BufRead + Send + 'static> DeviceSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            overflow: false,
        }
    }
}

impl DeviceSource<BufReader<Box<dyn SerialPort>>> {
    /// Open the serial port and wait for the controller to come out of reset.
    pub async fn open(settings: &SerialSettings) -> Result<Self, PortError> {
        let port = open_port(&settings.path, settings.baud_rate, settings.read_timeout)?;

        // Opening the port toggles DTR, which reboots most Arduino-style boards
        if !settings.settle.is_zero() {
            debug!("Waiting {:?} for {} to settle", settings.settle, settings.path);
            sleep(settings.settle).await;
        }

        Ok(Self::new(BufReader::new(port)))
    }

    /// Second handle on the same port for writing valve commands back.
    pub fn actuator(&self) -> Result<SerialActuator, PortError> {
        let port = self
            .reader
            .as_ref()
            .ok_or(PortError::NotConnected)?
            .get_ref();
        let path = port.name().unwrap_or_else(|| "serial port".to_string());

        port.try_clone()
            .map(SerialActuator::new)
            .map_err(|source| PortError::Clone { path, source })
    }
}

#[async_trait]
impl<R: BufRead + Send + 'static> TelemetrySource for DeviceSource<R> {
    async fn next(&mut self) -> Result<Option<Reading>, SourceError> {
        let mut reader = self.reader.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "serial reader was lost")
        })?;

        let mut overflow = self.overflow;

        // Serial reads block up to the port timeout, keep them off the runtime
        let (reader, overflow, line) = tokio::task::spawn_blocking(move || {
            let line = read_line(&mut reader, &mut overflow);
            (reader, overflow, line)
        })
        .await?;
        self.reader = Some(reader);
        self.overflow = overflow;

        let line = line?;
        if line.is_empty() {
            return Ok(None);
        }

        Ok(codec::decode(&line)?)
    }
}

/// Read one line without its terminator.
///
/// A timeout is not an error: whatever arrived before it is returned, which is
/// an empty line when the controller was silent. At most `MAX_LINE` bytes are
/// buffered. A longer line comes back empty and `overflow` stays set until its
/// terminator has been consumed.
fn read_line<R: BufRead>(reader: &mut R, overflow: &mut bool) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();

    match reader.by_ref().take(MAX_LINE).read_until(b'\n', &mut line) {
        Ok(_) => {}
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
        Err(e) => return Err(e),
    }

    let terminated = line.last() == Some(&b'\n');
    if !terminated && line.len() as u64 >= MAX_LINE {
        debug!("Dropping line longer than {} bytes", MAX_LINE);
        *overflow = true;
        return Ok(Vec::new());
    }
    if *overflow {
        *overflow = !terminated;
        return Ok(Vec::new());
    }

    if terminated {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }

    Ok(line)
}

/// Produces random but plausible readings so the store path can run without hardware.
pub struct SyntheticSource {
    rng: StdRng,
    interval: Duration,
}

impl SyntheticSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            interval,
        }
    }

    pub fn with_seed(seed: u64, interval: Duration) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            interval,
        }
    }

    fn generate(&mut self) -> Reading {
        let sample = TelemetrySample {
            humidity: round_to(self.rng.gen_range(0.0..=100.0), 2),
            temperature: round_to(self.rng.gen_range(0.0..=40.0), 2),
            moisture: self.rng.gen_range(0..=100u32) as f64,
            water_level: self.rng.gen_range(0..=100u32) as f64,
            timestamp: ServerTimestamp,
        };
        let command = ActuatorCommand {
            valve_open: self.rng.gen_bool(0.5),
        };

        Reading { sample, command }
    }
}

#[async_trait]
impl TelemetrySource for SyntheticSource {
    async fn next(&mut self) -> Result<Option<Reading>, SourceError> {
        // Pace ticks so the store is not flooded
        if !self.interval.is_zero() {
            sleep(self.interval).await;
        }

        Ok(Some(self.generate()))
    }
}
