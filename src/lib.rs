pub mod config;
pub mod upstream;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod logging;
pub mod cli;

pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
