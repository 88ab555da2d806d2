use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face registration and identification CLI")]
struct Cli {
    /// Base URL of the facegated HTTP API.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user from a face photo
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        /// Path to the face photo
        image: PathBuf,
    },
    /// Identify a probe photo against registered users
    Identify {
        /// Path to the probe photo
        image: PathBuf,
    },
    /// List registered users
    List,
    /// Show one user
    Show { id: i64 },
    /// Update a user's name and email (the stored face is unchanged)
    Update {
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Remove a user together with their stored photo and signature
    Remove { id: i64 },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let server = cli.server.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Register { name, email, image } => {
            let form = reqwest::multipart::Form::new()
                .text("name", name)
                .text("email", email)
                .part("image", image_part(&image).await?);
            let response = client
                .post(format!("{server}/api/users"))
                .multipart(form)
                .send()
                .await
                .context("facegated unreachable")?;
            print_json(response).await
        }
        Commands::Identify { image } => {
            let form = reqwest::multipart::Form::new().part("image", image_part(&image).await?);
            let response = client
                .post(format!("{server}/api/identify"))
                .multipart(form)
                .send()
                .await
                .context("facegated unreachable")?;
            print_json(response).await
        }
        Commands::List => {
            let response = client
                .get(format!("{server}/api/users"))
                .send()
                .await
                .context("facegated unreachable")?;
            print_json(response).await
        }
        Commands::Show { id } => {
            let response = client
                .get(format!("{server}/api/users/{id}"))
                .send()
                .await
                .context("facegated unreachable")?;
            print_json(response).await
        }
        Commands::Update { id, name, email } => {
            let response = client
                .put(format!("{server}/api/users/{id}"))
                .json(&serde_json::json!({ "name": name, "email": email }))
                .send()
                .await
                .context("facegated unreachable")?;
            print_json(response).await
        }
        Commands::Remove { id } => {
            let response = client
                .delete(format!("{server}/api/users/{id}"))
                .send()
                .await
                .context("facegated unreachable")?;
            print_json(response).await
        }
        Commands::Status => {
            let response = client
                .get(format!("{server}/api/health"))
                .send()
                .await
                .context("facegated unreachable")?;
            print_json(response).await
        }
    }
}

async fn image_part(path: &Path) -> Result<reqwest::multipart::Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
    Ok(reqwest::multipart::Part::bytes(bytes).file_name(file_name))
}

async fn print_json(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("invalid response from facegated")?;
    if !status.is_success() {
        bail!("facegated returned {status}: {body}");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
