//! Entity definitions (database row mappings).

mod alert;
mod command;
mod device;
mod location;

pub use alert::AlertEntity;
pub use command::CommandEntity;
pub use device::DeviceEntity;
pub use location::{LocationEntity, NearbyDeviceEntity};
