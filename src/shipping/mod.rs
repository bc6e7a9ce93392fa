mod log_shipper;
mod manager;
mod ship_command;

pub use log_shipper::LogShipper;
pub use log_shipper::LogShipperConfig;
pub use log_shipper::Mode;
pub use log_shipper::ShipperStatus;
pub use manager::LogShippingManager;
pub use manager::LogShippingManagerConfig;
pub use ship_command::LeaderContext;
pub use ship_command::ShipCommand;
