
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, EmbeddingBackend, EmbeddingConfig};
use crate::embeddings::OllamaClient;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Repo Search Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Embedding Provider").bold().yellow());
    eprintln!("Choose how code and queries are embedded.");
    eprintln!();

    configure_embedding(&mut config.embedding)?;

    if config.embedding.backend == EmbeddingBackend::Ollama {
        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        match check_embedding_server(&config.embedding) {
            Ok(()) => eprintln!(
                "{}",
                style("✓ Embedding server reachable and model available!").green()
            ),
            Err(e) => {
                eprintln!(
                    "{} {:#}",
                    style("⚠ Warning: Embedding server check failed:").yellow(),
                    e
                );
                eprintln!("You can continue, but make sure it is running before indexing.");
            }
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Backend: {}", style(format!("{:?}", config.embedding.backend)).cyan());
    eprintln!("  Host: {}", style(&config.embedding.host).cyan());
    eprintln!("  Port: {}", style(config.embedding.port).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.embedding.embedding_dimension).cyan()
    );
    match config.embedding_url() {
        Ok(url) => eprintln!("  Server URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Server URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Search Defaults:").bold().yellow());
    eprintln!("  Top K: {}", style(config.search.default_top_k).cyan());
    eprintln!(
        "  Similarity Threshold: {}",
        style(config.search.default_similarity_threshold).cyan()
    );
    eprintln!("  Max Top K: {}", style(config.search.max_top_k).cyan());

    eprintln!();
    eprintln!("{}", style("Storage:").bold().yellow());
    eprintln!("  Jobs DB: {}", style(config.database_path().display()).cyan());
    eprintln!("  Indexes: {}", style(config.indexes_dir().display()).cyan());
    if let Some(root) = &config.source.local_root {
        eprintln!("  Local repositories: {}", style(root.display()).cyan());
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Ok(Config::with_base_dir(config_dir))
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let backends = &["ollama", "hashing (offline, no model server)"];
    let backend_index = Select::new()
        .with_prompt("Embedding backend")
        .default(usize::from(embedding.backend == EmbeddingBackend::Hashing))
        .items(backends)
        .interact()?;

    if backend_index == 1 {
        embedding.backend = EmbeddingBackend::Hashing;
        embedding.set_embedding_dimension(prompt_dimension(embedding.embedding_dimension)?)?;
        return Ok(());
    }
    embedding.backend = EmbeddingBackend::Ollama;

    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == embedding.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Embedding server protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Embedding server host")
        .default(embedding.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let candidate = EmbeddingConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..EmbeddingConfig::default()
            };
            candidate.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Embedding server port")
        .default(embedding.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension = prompt_dimension(embedding.embedding_dimension)?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(embedding.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    embedding.set_protocol(protocol)?;
    embedding.set_host(host)?;
    embedding.set_port(port)?;
    embedding.set_model(model)?;
    embedding.set_embedding_dimension(dimension)?;
    embedding.set_batch_size(batch_size)?;

    Ok(())
}

fn prompt_dimension(current: u32) -> Result<u32> {
    let dimension = Input::new()
        .with_prompt("Embedding dimension")
        .default(current)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;
    Ok(dimension)
}

fn check_embedding_server(embedding: &EmbeddingConfig) -> Result<()> {
    OllamaClient::new(embedding)?
        .with_timeout(Duration::from_secs(5))
        .with_retry_attempts(1)
        .health_check()
}
