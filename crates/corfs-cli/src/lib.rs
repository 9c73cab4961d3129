//! Command-line front end for corfs.
//!
//! Every command runs against a router whose primary and cache are local
//! directories, so the usual pattern is a slow or flaky mount as `--primary`
//! and a local disk as `--cache`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

use corfs::{CorFs, CorFsConfig, DirEntry, LocalStore, OpenFlags, Store};

#[derive(Parser, Debug)]
#[command(name = "corfs", version, about = "Read through a primary directory, mirroring into a cache")]
pub struct Cli {
    /// Directory holding the authoritative copy
    #[arg(long, value_name = "DIR")]
    pub primary: PathBuf,

    /// Directory receiving the best-effort copy
    #[arg(long, value_name = "DIR")]
    pub cache: PathBuf,

    /// TOML file with router settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a file
    Cat { path: PathBuf },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// Show metadata for a path
    Stat { path: PathBuf },
    /// Copy a local file in
    Put { src: PathBuf, dest: PathBuf },
    /// Create a directory
    Mkdir {
        path: PathBuf,
        /// Create missing parents
        #[arg(short, long)]
        parents: bool,
    },
    /// Remove a file or directory
    Rm {
        path: PathBuf,
        /// Remove directories and their contents
        #[arg(short, long)]
        recursive: bool,
    },
    /// Rename a file or directory
    Mv { from: PathBuf, to: PathBuf },
    /// Read files in full so they are mirrored into the cache
    Warm {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Build the router described by the command line.
pub async fn router(cli: &Cli) -> Result<CorFs> {
    let config = match &cli.config {
        Some(path) => CorFsConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CorFsConfig::default(),
    };
    let primary_is_dir = tokio::fs::metadata(&cli.primary)
        .await
        .is_ok_and(|meta| meta.is_dir());
    if !primary_is_dir {
        bail!("primary is not a directory: {}", cli.primary.display());
    }
    tokio::fs::create_dir_all(&cli.cache)
        .await
        .with_context(|| format!("Failed to create cache {}", cli.cache.display()))?;

    tracing::debug!(primary = %cli.primary.display(), cache = %cli.cache.display(), ?config, "router ready");
    Ok(CorFs::new(LocalStore::new(&cli.primary), LocalStore::new(&cli.cache)).with_config(config))
}

/// Run one command, writing its output to `out`.
pub async fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let fs = router(&cli).await?;

    match cli.command {
        Command::Cat { path } => {
            let data = fs
                .read_file(&path)
                .await
                .with_context(|| format!("cat {}", path.display()))?;
            out.write_all(&data)?;
        }
        Command::Ls { path } => {
            let entries = fs
                .read_dir(&path)
                .await
                .with_context(|| format!("ls {}", path.display()))?;
            for entry in entries.iter().filter(|e| !e.is_dot()) {
                writeln!(out, "{}", format_entry(entry))?;
            }
        }
        Command::Stat { path } => {
            let entry = fs
                .stat(&path)
                .await
                .with_context(|| format!("stat {}", path.display()))?;
            writeln!(out, "{}", format_entry(&entry))?;
        }
        Command::Put { src, dest } => {
            let data = tokio::fs::read(&src)
                .await
                .with_context(|| format!("Failed to read {}", src.display()))?;
            put(&fs, &dest, &data)
                .await
                .with_context(|| format!("put {}", dest.display()))?;
            tracing::info!(dest = %dest.display(), bytes = data.len(), "stored");
        }
        Command::Mkdir { path, parents } => {
            let result = if parents {
                fs.mkdir_all(&path, 0o755).await
            } else {
                fs.mkdir(&path, 0o755).await
            };
            result.with_context(|| format!("mkdir {}", path.display()))?;
        }
        Command::Rm { path, recursive } => {
            let result = match fs.as_remove_all() {
                Some(remover) if recursive => remover.remove_all(&path).await,
                _ => fs.remove(&path).await,
            };
            result.with_context(|| format!("rm {}", path.display()))?;
        }
        Command::Mv { from, to } => {
            fs.rename(&from, &to)
                .await
                .with_context(|| format!("mv {} {}", from.display(), to.display()))?;
        }
        Command::Warm { paths } => {
            if !fs.config().mirror_whole_file_reads {
                tracing::warn!("mirror_whole_file_reads is off; warm will not populate the cache");
            }
            let mut files = 0usize;
            let mut bytes = 0usize;
            for path in paths {
                let (f, b) = warm(&fs, &path)
                    .await
                    .with_context(|| format!("warm {}", path.display()))?;
                files += f;
                bytes += b;
            }
            writeln!(out, "warmed {files} files, {bytes} bytes")?;
        }
    }
    Ok(())
}

fn format_entry(entry: &DirEntry) -> String {
    let kind = if entry.is_dir() { 'd' } else { '-' };
    format!("{kind} {:04o} {:>10} {}", entry.mode, entry.size, entry.name)
}

async fn put(fs: &CorFs, dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let flags = OpenFlags::CREATE | OpenFlags::WRITE_ONLY | OpenFlags::TRUNCATE;
    let mut file = fs.open(dest, flags, 0o644).await?;
    let written = file.write(data).await;
    let closed = file.close().await;
    written?;
    closed
}

/// Read every file under `root` through the router. Returns (files, bytes).
async fn warm(fs: &CorFs, root: &Path) -> std::io::Result<(usize, usize)> {
    let mut files = 0;
    let mut bytes = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(path) = pending.pop() {
        if fs.stat(&path).await?.is_dir() {
            for entry in fs.read_dir(&path).await? {
                if !entry.is_dot() {
                    pending.push(path.join(&entry.name));
                }
            }
            continue;
        }
        let data = fs.read_file(&path).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "warmed");
        files += 1;
        bytes += data.len();
    }
    Ok((files, bytes))
}
