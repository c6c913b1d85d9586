//! Repository implementations.

mod alert;
mod command;
mod device;
mod location;
mod stats;

pub use alert::AlertRepository;
pub use command::CommandRepository;
pub use device::DeviceRepository;
pub use location::LocationRepository;
pub use stats::StatsRepository;
