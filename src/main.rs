use clap::{Parser, Subcommand};
use repo_search::commands::{
    delete_repository, index_repository, list_repositories, open_service, search_repository,
    show_status,
};
use repo_search::config::{get_config_dir, load_config, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "repo-search")]
#[command(about = "Semantic code search over indexed GitHub repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding server and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index a GitHub repository and wait for the job to finish
    Index {
        /// Repository URL, e.g. https://github.com/owner/repo
        repo_url: String,
        /// Rebuild even if the repository is already indexed
        #[arg(long)]
        force: bool,
        /// URL notified with a JSON summary when the job finishes
        #[arg(long)]
        callback_url: Option<String>,
        /// Identifier of the requesting user, echoed in the callback
        #[arg(long)]
        user_id: Option<i64>,
    },
    /// Show the indexing status of a repository
    Status {
        /// Repository as owner/repo
        repo: String,
    },
    /// Search an indexed repository
    Search {
        /// Repository as owner/repo
        repo: String,
        /// Natural language or code query
        query: String,
        /// Maximum number of results
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum similarity score between 0 and 1
        #[arg(long)]
        threshold: Option<f32>,
        /// Index to search
        #[arg(long)]
        search_type: Option<String>,
    },
    /// List all repositories with an indexing record
    List,
    /// Delete a repository's index and job record
    Delete {
        /// Repository as owner/repo
        repo: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&load_config()?)?;
            } else {
                run_interactive_config(&get_config_dir()?)?;
            }
        }
        Commands::Index {
            repo_url,
            force,
            callback_url,
            user_id,
        } => {
            let service = open_service().await?;
            index_repository(&service, &repo_url, callback_url, user_id, force).await?;
        }
        Commands::Status { repo } => {
            show_status(&open_service().await?, &repo).await?;
        }
        Commands::Search {
            repo,
            query,
            top_k,
            threshold,
            search_type,
        } => {
            let service = open_service().await?;
            search_repository(
                &service,
                &repo,
                &query,
                top_k,
                threshold,
                search_type.as_deref(),
            )
            .await?;
        }
        Commands::List => {
            list_repositories(&open_service().await?).await?;
        }
        Commands::Delete { repo } => {
            delete_repository(&open_service().await?, &repo).await?;
        }
    }

    Ok(())
}
