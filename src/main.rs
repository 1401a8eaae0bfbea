use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

mod config;
mod editor;
mod error;
mod hosts;
mod index;
mod library;
mod manifest;
mod merge;
mod models;
mod pipeline;
mod publish;
mod queue;
mod registry;
mod storage;
mod traits;
mod uploader;
mod utils;

use config::{Config, UpdateMode};
use editor::MetadataEditor;
use index::HubIndexer;
use merge::MergeEngine;
use models::{MangaStatus, SeriesInfo};
use pipeline::{RunReport, UploadPipeline, UploadRequest};
use registry::HostRegistry;
use storage::ManifestStore;

#[derive(Parser)]
#[command(name = "mangaup")]
#[command(about = "Upload manga chapters to image hosts and keep a reader index up to date")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "mangaup.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the chapters of a manga directory and update its manifest
    Upload {
        /// Manga directory; each subdirectory is a chapter
        dir: PathBuf,
        /// Host to upload to (defaults to `selected_host`)
        #[arg(long)]
        host: Option<String>,
        /// How to merge with an existing manifest
        #[arg(short, long, value_enum)]
        mode: Option<UpdateMode>,
        /// Only upload these chapters (repeatable)
        #[arg(long = "chapter")]
        chapters: Vec<String>,
        /// Series title (defaults to the directory name)
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Cover image URL
        #[arg(long)]
        cover: Option<String>,
        #[arg(long, value_enum)]
        status: Option<MangaStatus>,
        /// Push the manifest to GitHub after saving
        #[arg(long)]
        publish: bool,
    },
    /// Show or change the series fields of an existing manifest without uploading
    Edit {
        /// Series title the manifest was saved under
        title: String,
        /// New series title
        #[arg(long = "set-title")]
        new_title: Option<String>,
        /// Description; a literal `\n` becomes a line break
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Cover image URL
        #[arg(long)]
        cover: Option<String>,
        #[arg(long, value_enum)]
        status: Option<MangaStatus>,
        /// Push the manifest to GitHub after saving
        #[arg(long)]
        publish: bool,
    },
    /// Build the group hub index from every manifest under the output folder
    Index {
        /// Push the index to GitHub after saving
        #[arg(long)]
        publish: bool,
    },
    /// Strip known corruption from a manifest and renumber its chapters
    Repair {
        /// Manifest JSON file
        manifest: PathBuf,
    },
    /// List configured hosts and whether they are ready
    Hosts,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Init { force } => run_init(&cli.config, force)?,
        Commands::Upload {
            dir,
            host,
            mode,
            chapters,
            title,
            description,
            artist,
            author,
            cover,
            status,
            publish,
        } => {
            let config = load_config(&cli.config)?;
            let series = SeriesInfo {
                title: title.unwrap_or_default(),
                description: description.unwrap_or_default(),
                artist: artist.unwrap_or_default(),
                author: author.unwrap_or_default(),
                cover: cover.unwrap_or_default(),
                status: status.map(|s| s.to_string()).unwrap_or_default(),
            };
            let request = UploadRequest {
                host,
                mode,
                chapters,
                series,
                publish,
            };

            let registry = HostRegistry::from_config(&config)?;
            let progress = make_progress_bar();
            let pipeline = UploadPipeline::new(config, registry).with_progress(progress.clone());
            let report = pipeline.run(&dir, &request).await;
            progress.finish_and_clear();

            print_report(&report?);
        }
        Commands::Edit {
            title,
            new_title,
            description,
            artist,
            author,
            cover,
            status,
            publish,
        } => {
            let config = load_config(&cli.config)?;
            let series = SeriesInfo {
                title: new_title.unwrap_or_default(),
                description: description.unwrap_or_default(),
                artist: artist.unwrap_or_default(),
                author: author.unwrap_or_default(),
                cover: cover.unwrap_or_default(),
                status: status.map(|s| s.to_string()).unwrap_or_default(),
            };
            let editor = MetadataEditor::new(config);
            if series == SeriesInfo::default() && !publish {
                let (path, manifest) = editor.load(&title).await?;
                print_metadata(&path, &manifest);
            } else {
                let report = editor.update(&title, &series, publish).await?;
                print_metadata(&report.manifest_path, &report.manifest);
                if !report.changed {
                    println!("  unchanged");
                }
                if report.published {
                    println!("  published to GitHub");
                } else if let Some(error) = &report.publish_error {
                    println!("  publish failed: {}", error);
                }
            }
        }
        Commands::Index { publish } => {
            let config = load_config(&cli.config)?;
            let report = HubIndexer::new(config).run(publish).await?;
            println!("🗂️ {}", report.index_path.display());
            println!("  series:   {}", report.series_count);
            println!("  chapters: {}", report.chapter_count);
            if report.published {
                println!("  published to GitHub");
            } else if let Some(error) = &report.publish_error {
                println!("  publish failed: {}", error);
            }
        }
        Commands::Repair { manifest } => {
            let config = load_config(&cli.config)?;
            let store = ManifestStore::from_config(&config.output);
            let Some(loaded) = store.load(&manifest).await else {
                bail!("{} is missing or not a valid manifest", manifest.display());
            };
            let before = loaded.chapters.len();
            let repaired = MergeEngine::from_config(&config.output).repair(loaded);
            store.save(&repaired, &manifest).await?;
            info!("🔧 Repaired {} ({} chapters)", manifest.display(), before);
        }
        Commands::Hosts => {
            let config = load_config(&cli.config)?;
            let registry = HostRegistry::from_config(&config)?;
            println!("{:<12} {:<8} {:<8} {}", "Host", "Enabled", "Albums", "Status");
            for (name, host) in registry.hosts() {
                let status = match host.check_ready() {
                    Ok(()) => "ready".to_string(),
                    Err(reason) => reason,
                };
                let selected = if name.eq_ignore_ascii_case(&config.selected_host) { " (selected)" } else { "" };
                println!(
                    "{:<12} {:<8} {:<8} {}{}",
                    name,
                    "yes",
                    if host.supports_groups() { "yes" } else { "no" },
                    status,
                    selected
                );
            }
            for name in config.hosts.keys().filter(|name| registry.get_host(name).is_none()) {
                println!("{:<12} {:<8} {:<8} {}", name, "no", "-", "disabled");
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("loading configuration from {}", path.display()))
}

fn run_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        warn!("{} already exists, use --force to overwrite", path.display());
        return Ok(());
    }
    Config::default().save(path)?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!("mangaup={}", level))
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

fn make_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_metadata(path: &Path, manifest: &manifest::Manifest) {
    println!("📚 {}", manifest.title);
    println!("  file:        {}", path.display());
    println!("  author:      {}", manifest.author);
    println!("  artist:      {}", manifest.artist);
    println!("  status:      {}", manifest.status);
    println!("  cover:       {}", manifest.cover);
    println!("  chapters:    {}", manifest.chapters.len());
    if !manifest.description.is_empty() {
        println!("  description: {}", manifest.description);
    }
}

fn print_report(report: &RunReport) {
    println!("📚 {}", report.manga_title);
    println!("  uploaded: {}", report.chapters_uploaded.len());
    if !report.chapters_partial.is_empty() {
        println!("  partial:  {}", report.chapters_partial.join(", "));
    }
    for (chapter, reason) in &report.chapters_failed {
        println!("  failed:   {} ({})", chapter, reason);
    }
    if !report.chapters_skipped.is_empty() {
        println!("  skipped (no images): {}", report.chapters_skipped.join(", "));
    }
    match &report.manifest_path {
        Some(path) => println!("  manifest: {}", path.display()),
        None => println!("  manifest: unchanged"),
    }
    if report.published {
        println!("  published to GitHub");
    } else if let Some(error) = &report.publish_error {
        println!("  publish failed: {}", error);
    }
}
