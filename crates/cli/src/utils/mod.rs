pub mod file;

pub use file::{default_config_dir, expand_home};
