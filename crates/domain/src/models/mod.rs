//! Domain model definitions.

mod alert;
mod command;
mod device;
mod location;
mod messages;
mod stats;

pub use alert::{Alert, AlertKind, NewAlert};
pub use command::{Command, CommandKind, CommandStatus};
pub use device::{is_valid_imei, Device};
pub use location::{Location, NewLocation};
pub use messages::{CommandEnvelope, TrackerBusMessage};
pub use stats::SystemStats;
