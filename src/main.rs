use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use futures::StreamExt;
use skyvault_config::Config;
use skyvault_metadata::InMemoryMetadataStore;
use skyvault_replicate::{ReplicationPolicy, Replicator, UploadRequest};
use skyvault_storage::StorageManager;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not set up storage providers")]
    Storage,
    #[display("upload failed")]
    Upload,
    #[display("could not read {}", _0.display())]
    Read(#[error(not(source))] PathBuf),
    #[display("could not write output")]
    Output,
}

#[derive(Debug, Parser)]
#[command(name = "skyvault", version, about = "Upload once, replicate to every configured cloud")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a file to every targeted provider and print its record
    Upload {
        file: PathBuf,
        /// Logical path to record the file under (default: /<file name>)
        #[arg(long)]
        path: Option<String>,
        /// Send to this provider instead of the default
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        /// Custom tag, repeatable
        #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
        /// Replicate to every configured provider
        #[arg(long)]
        all: bool,
    },
    /// List objects stored with one provider
    Ls {
        provider: String,
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Show one object's metadata as JSON
    Stat { provider: String, key: String },
}

fn parse_tag(tag: &str) -> std::result::Result<(String, String), String> {
    match tag.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{tag}`")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let storage = Arc::new(StorageManager::from_config(&config).or_raise(|| ErrorKind::Storage)?);

    match cli.command {
        Command::Upload { file, path, provider, content_type, tags, all } => {
            let content = tokio::fs::read(&file).await.or_raise(|| ErrorKind::Read(file.clone()))?;
            let mut request = UploadRequest::new(file_name(&file)?, content).replicate_to_all(all);
            request.tags.extend(tags);
            if let Some(path) = path {
                request = request.logical_path(path);
            }
            if let Some(provider) = provider {
                request = request.provider(provider);
            }
            if let Some(content_type) = content_type {
                request = request.content_type(content_type);
            }

            let replicator =
                Replicator::new(storage, Arc::new(InMemoryMetadataStore::new()), ReplicationPolicy::from_config(&config));
            let record = replicator.upload(request).await.or_raise(|| ErrorKind::Upload)?;
            let json = serde_json::to_string_pretty(&*record).or_raise(|| ErrorKind::Output)?;
            println!("{json}");
        },
        Command::Ls { provider, prefix } => {
            let adapter = storage.resolve(&provider).or_raise(|| ErrorKind::Storage)?;
            let mut objects = adapter.list_stream(&config.bucket, &prefix);
            while let Some(info) = objects.next().await {
                let info = info.or_raise(|| ErrorKind::Storage)?;
                println!("{:>12}  {}  {}", info.size, info.content_type, info.storage_path);
            }
        },
        Command::Stat { provider, key } => {
            let adapter = storage.resolve(&provider).or_raise(|| ErrorKind::Storage)?;
            let info = adapter.get_metadata(&config.bucket, &key).await.or_raise(|| ErrorKind::Storage)?;
            let json = serde_json::to_string_pretty(&info).or_raise(|| ErrorKind::Output)?;
            println!("{json}");
        },
    }
    Ok(())
}

fn file_name(file: &Path) -> Result<String> {
    match file.file_name().and_then(OsStr::to_str) {
        Some(name) => Ok(name.to_string()),
        None => exn::bail!(ErrorKind::Read(file.to_path_buf())),
    }
}
