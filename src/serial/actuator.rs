use serialport::SerialPort;
use std::io::{self, Write};

use crate::models::ActuatorCommand;
use crate::serial::codec;

/// Drives the valve on the controller side.
pub trait Actuator: Send {
    fn apply(&mut self, command: &ActuatorCommand) -> io::Result<()>;
}

/// Writes `ON`/`OFF` tokens to the controller over its serial port.
pub struct SerialActuator<W = Box<dyn SerialPort>> {
    port: W,
}

impl<W: Write + Send> SerialActuator<W> {
    pub fn new(port: W) -> Self {
        Self { port }
    }
}

impl<W: Write + Send> Actuator for SerialActuator<W> {
    fn apply(&mut self, command: &ActuatorCommand) -> io::Result<()> {
        self.port.write_all(codec::encode(command))?;
        self.port.flush()
    }
}
