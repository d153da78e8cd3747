use serde::ser::{Serialize, SerializeMap, Serializer};

/// Placeholder the Realtime Database replaces with its own clock at write time.
///
/// Serializes to `{".sv": "timestamp"}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerTimestamp;

impl Serialize for ServerTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(".sv", "timestamp")?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TelemetrySample {
    pub humidity: f64,
    pub temperature: f64,
    pub moisture: f64,
    pub water_level: f64,
    pub timestamp: ServerTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub valve_open: bool,
}

impl ActuatorCommand {
    /// Value stored under `valve_status`.
    pub fn status(&self) -> &'static str {
        if self.valve_open {
            "on"
        } else {
            "off"
        }
    }
}

impl Serialize for ActuatorCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("valve_status", self.status())?;
        map.end()
    }
}

/// One decoded frame: a sample and the valve command that came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sample: TelemetrySample,
    pub command: ActuatorCommand,
}
