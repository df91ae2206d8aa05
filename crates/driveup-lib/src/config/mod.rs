pub mod env;
pub mod settings;

pub use env::EnvConfig;
pub use settings::{AccountConfig, BuildPolicy, HttpSettings, Settings};
