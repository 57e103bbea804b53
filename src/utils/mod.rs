pub mod config;
pub mod logger;
pub mod passphrase;
pub mod settings_file;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use passphrase::get_passphrase;
pub use settings_file::{SettingsOverlay, merge, resolve};
