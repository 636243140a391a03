pub mod collector;
pub mod config;
pub mod error_log;
pub mod forwarder;
pub mod logging;
pub mod registry;
pub mod serial;
pub mod service;
pub mod shutdown;
pub mod sink;
pub mod status;
pub mod supervisor;

pub use config::{AppConfig, ForwardTarget, PortSpec};
pub use forwarder::Forwarder;
pub use registry::Registry;
pub use service::Service;
pub use supervisor::{PortBinding, Supervisor};
