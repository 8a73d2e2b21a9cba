// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use cinefetch::catalog::{
    CatalogItem, CatalogPage, CatalogSource, ItemId, ListOptions, SortField, SortOrder, StaticCatalog,
    YtsCatalog, DEFAULT_PAGE_LIMIT, GENRES, QUALITIES,
};
use cinefetch::config::{get_config_dir, load_config, save_config, Config, SETTABLE_KEYS};
use cinefetch::download::magnet::magnet_uri;
use cinefetch::download::{
    build_driver, CompletedStore, DownloadManager, DownloadOutcome, FileSaver, FileStore, Job, JobState,
    NoticeLevel,
};
use cinefetch::error::ErrorBuilder;
use cinefetch::utils::{format_bytes, format_eta, format_speed};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Data error - item or variant not found
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - catalog unreachable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Temporary failure - try again later
    pub const TEMP_FAIL: i32 = 75;
}

use exit_codes::*;

/// Spinner helpers for consistent progress indicators
mod spinner {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    pub fn create(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }
}

/// cinefetch - browse the movie catalog and manage downloads.
#[derive(Parser)]
#[command(name = "cinefetch")]
#[command(version = VERSION)]
#[command(about = "Browse a movie catalog and manage your downloads.")]
#[command(long_about = "cinefetch - movie catalog and download session\n\n\
    Browse:          cinefetch browse --genre Comedy --sort year\n\
    Movie details:   cinefetch show 2215\n\
    Download:        cinefetch download 2215 --quality 1080p\n\
    Your downloads:  cinefetch downloads\n\
    Configure:       cinefetch config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read the catalog from a local JSON file instead of the API
    #[arg(long, global = true)]
    catalog_file: Option<PathBuf>,

    /// Verbose mode: log session events to stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List movies from the catalog
    ///
    /// Examples:
    ///   cinefetch browse
    ///   cinefetch browse --query "night of the" --min-rating 7
    ///   cinefetch browse --genre Horror --quality 1080p --sort year --asc
    Browse {
        /// Search titles
        #[arg(short, long)]
        query: Option<String>,
        /// Only movies in this genre (repeatable)
        #[arg(short, long)]
        genre: Vec<String>,
        /// Only movies offered in this quality (repeatable)
        #[arg(long)]
        quality: Vec<String>,
        /// Minimum rating (0-9)
        #[arg(long, default_value_t = 0)]
        min_rating: u8,
        /// Sort by: title, year, rating, likes, downloads, latest
        #[arg(short, long, default_value = "rating")]
        sort: SortField,
        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        /// Results per page
        #[arg(short, long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },

    /// Show details for one movie
    ///
    /// Example:
    ///   cinefetch show 2215
    Show {
        /// Catalog id
        id: ItemId,
    },

    /// Download a movie and follow its progress
    ///
    /// Example:
    ///   cinefetch download 2215 --quality 720p
    Download {
        /// Catalog id
        id: ItemId,
        /// Variant quality (defaults to the best seeded one)
        #[arg(short, long)]
        quality: Option<String>,
    },

    /// List completed downloads
    Downloads,

    /// Forget a completed download
    ///
    /// Example:
    ///   cinefetch remove 2215
    Remove {
        /// Catalog id
        id: ItemId,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Change a setting; "none" clears optional settings
    ///
    /// Examples:
    ///   cinefetch config set driver fetch
    ///   cinefetch config set pause_policy discard
    ///   cinefetch config set stale_timeout_secs 120
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
}

/// Whichever catalog the configuration points at.
enum Catalog {
    Remote(YtsCatalog),
    Local(StaticCatalog),
}

impl Catalog {
    fn open(config: &Config, catalog_file: Option<PathBuf>) -> Result<Self> {
        match catalog_file.or_else(|| config.catalog_file.clone()) {
            Some(path) => Ok(Catalog::Local(StaticCatalog::from_json_file(&path)?)),
            None => Ok(Catalog::Remote(YtsCatalog::with_url(config.catalog_url.clone()))),
        }
    }

    fn describe(&self, config: &Config) -> String {
        match self {
            Catalog::Remote(_) => config.catalog_url.clone(),
            Catalog::Local(catalog) => format!("local catalog ({} movies)", catalog.len()),
        }
    }

    async fn list_items(&self, options: &ListOptions) -> CatalogPage {
        match self {
            Catalog::Remote(catalog) => catalog.list_items(options).await,
            Catalog::Local(catalog) => catalog.list_items(options).await,
        }
    }

    async fn get_item(&self, id: ItemId) -> Option<CatalogItem> {
        match self {
            Catalog::Remote(catalog) => catalog.get_item(id).await,
            Catalog::Local(catalog) => catalog.get_item(id).await,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn session_manager(config: &Config) -> DownloadManager {
    let driver = build_driver(config.driver, config.simulation.clone(), config.staging_dir());
    DownloadManager::spawn(
        driver,
        CompletedStore::new(FileStore::new(config.state_dir())),
        Box::new(FileSaver::new(config.download_dir())),
        config.coordinator_options(),
    )
}

fn main() -> Result<()> {
    let Cli { command, catalog_file, verbose } = Cli::parse();
    init_logging(verbose);

    let config = load_config()?;

    match command {
        Commands::Config { command } => handle_config(command.unwrap_or(ConfigCommands::Show), config),
        command => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(run(command, catalog_file, config))
        }
    }
}

async fn run(command: Commands, catalog_file: Option<PathBuf>, config: Config) -> Result<()> {
    match command {
        Commands::Browse { query, genre, quality, min_rating, sort, asc, page, limit } => {
            let options = ListOptions {
                query_term: query,
                genres: genre,
                qualities: quality,
                minimum_rating: min_rating.min(9),
                sort_by: sort,
                order_by: if asc { SortOrder::Asc } else { SortOrder::Desc },
                page: page.max(1),
                limit: limit.clamp(1, 50),
            };
            let catalog = Catalog::open(&config, catalog_file)?;
            browse(&catalog, &config, &options).await
        }
        Commands::Show { id } => {
            let catalog = Catalog::open(&config, catalog_file)?;
            show(&catalog, &config, id).await
        }
        Commands::Download { id, quality } => {
            let catalog = Catalog::open(&config, catalog_file)?;
            download(&catalog, &config, id, quality).await
        }
        Commands::Downloads => list_downloads(&config),
        Commands::Remove { id } => remove(&config, id).await,
        Commands::Config { .. } => Ok(()),
    }
}

async fn browse(catalog: &Catalog, config: &Config, options: &ListOptions) -> Result<()> {
    for genre in &options.genres {
        if !GENRES.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
            println!("{} Unknown genre '{}'. Known genres: {}", "[!]".yellow(), genre, GENRES.join(", "));
        }
    }
    for quality in &options.qualities {
        if !QUALITIES.contains(&quality.as_str()) {
            println!("{} Unknown quality '{}'. Known qualities: {}", "[!]".yellow(), quality, QUALITIES.join(", "));
        }
    }

    let spinner = spinner::create("Loading catalog...");
    let page = catalog.list_items(options).await;
    spinner.finish_and_clear();

    if page.items.is_empty() {
        if page.total_count == 0 && options.query_term.is_none() && options.genres.is_empty() {
            eprintln!("{}", ErrorBuilder::catalog_unreachable(&catalog.describe(config)));
            std::process::exit(SERVICE_UNAVAILABLE);
        }
        println!("No movies match these filters.");
        return Ok(());
    }

    println!();
    for item in &page.items {
        let qualities: Vec<&str> = item.variants.iter().map(|v| v.quality.as_str()).collect();
        println!(
            "  {:>6}  {} {}  {}  {}",
            item.id.to_string().bright_black(),
            item.title.bright_white().bold(),
            format!("({})", item.year).bright_black(),
            format!("★ {:.1}", item.rating).yellow(),
            qualities.join(" ").cyan()
        );
    }
    println!();
    println!(
        "  Page {} of {} ({} movies)",
        page.page,
        page.total_pages().max(1),
        page.total_count
    );
    Ok(())
}

async fn show(catalog: &Catalog, config: &Config, id: ItemId) -> Result<()> {
    let spinner = spinner::create("Loading movie...");
    let item = catalog.get_item(id).await;
    spinner.finish_and_clear();

    let Some(item) = item else {
        eprintln!("{}", ErrorBuilder::new(format!("Movie {} not found", id))
            .cause("The id does not exist in the catalog")
            .cause(format!("The catalog at {} is unreachable", catalog.describe(config)))
            .fix("Find ids with: cinefetch browse --query <title>")
            .build());
        std::process::exit(DATA_ERR);
    };

    println!();
    println!("{} ({})", item.title.bright_white().bold(), item.year);
    println!(
        "{}  {} min  {}  {}",
        format!("★ {:.1}", item.rating).yellow(),
        item.runtime,
        item.genres.join(", "),
        item.mpa_rating.bright_black()
    );
    if !item.description_full.is_empty() {
        println!();
        println!("{}", item.description_full);
    }

    if let Some(cast) = item.cast.as_ref().filter(|c| !c.is_empty()) {
        println!();
        println!("{}", "Cast".bold());
        for member in cast {
            println!("  {} as {}", member.name, member.character_name.bright_black());
        }
    }

    println!();
    println!("{}", "Downloads".bold());
    for variant in &item.variants {
        println!(
            "  {:<6} {:<8} {:>9}  {} seeds / {} peers",
            variant.quality.cyan(),
            variant.kind,
            variant.size,
            variant.seeds.to_string().green(),
            variant.peers
        );
        println!("         {}", magnet_uri(&variant.hash, &item.title).bright_black());
    }

    if let Some(trailer) = item.trailer_url() {
        println!();
        println!("Trailer: {}", trailer);
    }

    if let Some(suggestions) = item.suggestions.as_ref().filter(|s| !s.is_empty()) {
        println!();
        println!("{}", "You may also like".bold());
        for suggestion in suggestions {
            println!("  {:>6}  {} ({})", suggestion.id.to_string().bright_black(), suggestion.title, suggestion.year);
        }
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn job_message(job: &Job) -> String {
    match job.state {
        JobState::Connecting => "Connecting to peers...".to_string(),
        JobState::Downloading => format!(
            "{} | {} peers | {} | ETA {}",
            format_bytes(job.downloaded),
            job.peers,
            format_speed(job.speed),
            format_eta(job.eta_seconds)
        ),
        JobState::Zipping => "Packaging...".to_string(),
        JobState::Seeding => "Seeding...".to_string(),
        other => other.to_string(),
    }
}

async fn download(catalog: &Catalog, config: &Config, id: ItemId, quality: Option<String>) -> Result<()> {
    let Some(item) = catalog.get_item(id).await else {
        eprintln!("{}", ErrorBuilder::new(format!("Movie {} not found", id))
            .fix("Find ids with: cinefetch browse --query <title>")
            .build());
        std::process::exit(DATA_ERR);
    };

    let variant = match &quality {
        Some(quality) => item.variant_for_quality(quality).cloned(),
        None => item.best_variant().cloned(),
    };
    let Some(variant) = variant else {
        let offered: Vec<&str> = item.variants.iter().map(|v| v.quality.as_str()).collect();
        bail!("No {} download for '{}'. Offered: {}", quality.as_deref().unwrap_or("usable"), item.title, offered.join(", "));
    };

    let manager = session_manager(config);
    let mut notices = manager.notices();
    let title = item.title.clone();

    println!("{} {} ({})", "Downloading".bold(), title.bright_white(), variant.label());
    let mut handle = match manager.start(item, variant).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}", ErrorBuilder::for_command(&e).build());
            std::process::exit(if e.is_rejection() { TEMP_FAIL } else { ERROR });
        }
    };

    let pb = progress_bar();
    let outcome = tokio::select! {
        outcome = handle.wait_with(|job| {
            pb.set_position(job.progress as u64);
            pb.set_message(job_message(job));
        }) => outcome,
        _ = tokio::signal::ctrl_c() => {
            pb.println("Cancelling...");
            manager.cancel(id).await?;
            DownloadOutcome::Cancelled
        }
    };
    pb.finish_and_clear();

    while let Ok(notice) = notices.try_recv() {
        if notice.level == NoticeLevel::Destructive {
            println!("{} {}", "[!]".red(), notice);
        }
    }

    manager.shutdown().await?;

    match outcome {
        DownloadOutcome::Completed => {
            println!("{} {} saved to {}", "[✓]".green(), title, config.download_dir().display());
            Ok(())
        }
        DownloadOutcome::Cancelled => {
            println!("{} Download of {} cancelled", "[!]".yellow(), title);
            Ok(())
        }
        DownloadOutcome::Failed(reason) => {
            eprintln!("{}", ErrorBuilder::new(format!("Could not download {}", title))
                .cause(reason)
                .fix(format!("Try again: cinefetch download {}", id))
                .fix("Try another quality: --quality 720p")
                .build());
            std::process::exit(ERROR);
        }
    }
}

fn list_downloads(config: &Config) -> Result<()> {
    let items = CompletedStore::new(FileStore::new(config.state_dir())).load();
    if items.is_empty() {
        println!("No downloads yet. Start one with: cinefetch download <id>");
        return Ok(());
    }

    println!();
    for item in &items {
        println!("  {:>6}  {} ({})", item.id.to_string().bright_black(), item.title.bright_white(), item.year);
    }
    println!();
    println!("  {} completed, saved in {}", items.len(), config.download_dir().display());
    Ok(())
}

async fn remove(config: &Config, id: ItemId) -> Result<()> {
    let manager = session_manager(config);
    let removed = manager.delete_completed(id).await?;
    manager.shutdown().await?;

    if removed {
        println!("{} Removed {} from your downloads", "[✓]".green(), id);
    } else {
        println!("{} {} is not in your downloads", "[!]".yellow(), id);
    }
    Ok(())
}

fn handle_config(command: ConfigCommands, mut config: Config) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!();
            println!("{}", "Configuration".bold());
            println!("  catalog_url         {}", config.catalog_url);
            println!(
                "  catalog_file        {}",
                config.catalog_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "none".into())
            );
            println!("  download_dir        {}", config.download_dir().display());
            println!("  state_dir           {}", config.state_dir().display());
            println!("  driver              {:?}", config.driver);
            println!("  pause_policy        {:?}", config.pause_policy);
            println!("  resume_policy       {:?}", config.resume_policy);
            println!(
                "  stale_timeout_secs  {}",
                config.stale_timeout_secs.map(|s| s.to_string()).unwrap_or_else(|| "none".into())
            );
            println!();
            println!("  Config file: {}", get_config_dir()?.join("config.json").display().to_string().bright_black());
        }
        ConfigCommands::Set { key, value } => {
            if let Err(e) = config.set(&key, &value) {
                eprintln!("{}", ErrorBuilder::new(format!("{:#}", e))
                    .fix(format!("Valid keys: {}", SETTABLE_KEYS.join(", ")))
                    .build());
                std::process::exit(ERROR);
            }
            save_config(&config)?;
            println!("{} {} = {}", "[✓]".green(), key, value);
        }
    }
    Ok(())
}
