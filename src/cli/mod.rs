pub mod serve;
pub mod once;
pub mod config;

pub use serve::{ServeArgs, SourceArgs};
pub use once::OnceArgs;
pub use config::ConfigArgs;
