// Configuration management: TOML settings under the base directory

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, EmbeddingBackend, EmbeddingConfig, JobsConfig, SearchConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Load the configuration from the resolved base directory
#[inline]
pub fn load_config() -> anyhow::Result<Config> {
    let dir = get_config_dir()?;
    Config::load(dir)
}
