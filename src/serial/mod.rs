pub mod actuator;
pub mod codec;
pub mod port;
pub mod source;

pub use actuator::Actuator;
pub use port::{list_ports, PortResolver, SerialSettings, SystemPortResolver};
pub use source::{DeviceSource, SyntheticSource, TelemetrySource};
