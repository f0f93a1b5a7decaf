pub mod firewall;
pub mod input;
pub mod model;
pub mod projection;
