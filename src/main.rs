#![forbid(unsafe_code)]

use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use hoard::{
    config::{Config, DEFAULT_CONFIG_FILE},
    service::StorageService,
    vfs::{DirOptions, Error, FileType, Metadata, StorageOps, error::IntoIoError},
};
use humantime_serde::re::humantime;
use mimalloc::MiMalloc;
use thiserror_ext::AsReport as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tracing_log::LogTracer;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    prelude::*,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "hoard")]
#[command(about = "Browse and move files across hoard's mounted storage backends")]
struct Args {
    /// Configuration file to read
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the mount table
    Mounts,
    /// Mount a registered backend at a virtual path
    Mount { path: String, backend: String },
    /// Remove a mount point
    Unmount { path: String },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show metadata for a path
    Stat { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Write a file from stdin, or from a local file
    Put {
        path: String,
        #[arg(long)]
        from: Option<Utf8PathBuf>,
    },
    /// Create a directory
    Mkdir {
        path: String,
        /// Create missing parents and accept an existing directory
        #[arg(short, long)]
        parents: bool,
    },
    /// Remove a file or directory
    Rm {
        path: String,
        /// Remove directories and their contents
        #[arg(short, long)]
        recursive: bool,
    },
    /// Copy a file or directory, possibly between backends
    Cp {
        src: String,
        dst: String,
        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,
    },
    /// Move a file or directory, possibly between backends
    Mv { src: String, dst: String },
}

#[tokio::main]
pub async fn main() -> Result<ExitCode> {
    LogTracer::init()?;

    let env_filter = EnvFilter::builder()
        .with_env_var("HOARD_LOG")
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = Config::load_from(&args.config)?;
    let service = StorageService::start(&config)?;

    match run(&service, args.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("hoard: {}", err.as_report());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(service: &StorageService, command: Command) -> Result<(), Error> {
    let storage = service.storage();

    match command {
        Command::Mounts => {
            for entry in storage.mounts() {
                let read_only = service
                    .registry()
                    .get_backend(&entry.backend_id)
                    .is_some_and(|backend| backend.is_read_only());
                println!(
                    "{}\t{}{}",
                    entry.path,
                    entry.backend_id,
                    if read_only { " (read-only)" } else { "" }
                );
            }
        }
        Command::Mount { path, backend } => {
            service.registry().mount(&path, &backend)?;
            service.save_mounts()?;
        }
        Command::Unmount { path } => {
            service.registry().unmount(&path)?;
            service.save_mounts()?;
        }
        Command::Ls { path } => {
            for entry in storage.readdir(&path).await? {
                println!("{}", describe(&entry.metadata, &entry.name));
            }
        }
        Command::Stat { path } => {
            let metadata = storage.stat(&path).await?;
            println!("{}", describe(&metadata, &path));
        }
        Command::Cat { path } => {
            let data = storage.read_file(&path).await?;
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(&data)
                .await
                .into_io_error("failed to write to stdout")?;
            stdout.flush().await.into_io_error("failed to flush stdout")?;
        }
        Command::Put { path, from } => {
            let data = match from {
                Some(from) => tokio::fs::read(&from)
                    .await
                    .into_io_error(format!("failed to read {from}"))?,
                None => {
                    let mut data = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut data)
                        .await
                        .into_io_error("failed to read stdin")?;
                    data
                }
            };
            storage.write_file(&path, &data).await?;
        }
        Command::Mkdir { path, parents } => {
            storage.mkdir(&path, DirOptions { recursive: parents }).await?;
        }
        Command::Rm { path, recursive } => remove(storage, &path, recursive).await?,
        Command::Cp {
            src,
            dst,
            recursive,
        } => storage.copy(&src, &dst, DirOptions { recursive }).await?,
        Command::Mv { src, dst } => storage.rename(&src, &dst).await?,
    }

    Ok(())
}

async fn remove(storage: &StorageOps, path: &str, recursive: bool) -> Result<(), Error> {
    if storage.stat(path).await?.is_dir() {
        storage.rmdir(path, DirOptions { recursive }).await
    } else {
        storage.unlink(path).await
    }
}

fn describe(metadata: &Metadata, name: &str) -> String {
    let kind = match metadata.file_type {
        FileType::File => '-',
        FileType::Directory => 'd',
        FileType::Other => '?',
    };
    let modified = metadata
        .modified
        .map(|modified| humantime::format_rfc3339_seconds(modified).to_string())
        .unwrap_or_default();

    format!("{kind} {:>12} {modified:<20} {name}", metadata.size)
}
