pub mod config;
pub mod driver;
pub mod instance;

pub use config::CloudConfig;
pub use driver::{CloudDriver, Ec2Driver};
pub use instance::{Instance, InstanceState};
