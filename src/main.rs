use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info, warn};
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use supernote_viewer::cache::{CacheIndex, CacheType, DEFAULT_CACHE_FILE_NAME, JsonCacheFile};
use supernote_viewer::export::{BucketConfig, MarkdownAggregator, load_bucket_config};
use supernote_viewer::extract::{ExtractOptions, ExtractionReport, Extractor, SourceKind};
use supernote_viewer::note::RattaRasterizer;
use supernote_viewer::panic_handler;
use supernote_viewer::render::{PoolConfig, default_worker_count};
use supernote_viewer::settings;
use supernote_viewer::storage::{FsStorage, Storage, byte_size_to_string};
use supernote_viewer::viewer::ViewerSession;

#[derive(Parser, Debug)]
#[command(name = "supernote-viewer", version, about)]
struct Cli {
    /// Note file or annotated PDF to extract pages from
    #[arg(long, value_name = "FILE")]
    extract: Option<PathBuf>,

    /// Directory receiving page images (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    media_folder: Option<PathBuf>,

    /// Write Markdown: a directory or `.md` file for notes, the bucket
    /// directory for annotated PDFs
    #[arg(long, value_name = "DIR_OR_FILE")]
    generate_md: Option<PathBuf>,

    /// Cache file (defaults to `<media folder>/.supernote-viewer-cache.json`)
    #[arg(long, value_name = "PATH")]
    cache_file: Option<PathBuf>,

    /// Ignore the cache and render every page
    #[arg(long)]
    force: bool,

    /// Render worker threads
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Seconds a render chunk may take
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Bucket layout YAML used with --generate-md on PDFs
    #[arg(long, value_name = "YAML")]
    buckets: Option<PathBuf>,

    /// Year of the built-in planner layout
    #[arg(long, value_name = "YYYY")]
    year: Option<i32>,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// List notes and PDFs in a directory
    #[arg(long, value_name = "DIR")]
    list: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Failed to initialize logging: {e:#}");
    }
    panic_handler::initialize_panic_handler();
    settings::load_settings();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = &cli.log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    if let Some(dir) = &cli.list {
        return list_folder(dir);
    }
    let Some(file) = &cli.extract else {
        bail!("Nothing to do: pass --extract <file> or --list <dir>");
    };
    extract(cli, file)
}

fn list_folder(dir: &Path) -> Result<()> {
    let storage = FsStorage::with_default_root();
    let cache_root = storage.app_root().join("cache");
    let viewer = ViewerSession::new(Arc::new(storage), cache_root, Arc::new(RattaRasterizer));

    for entry in viewer.list_folder(dir)? {
        let size = if entry.is_directory {
            "-".to_string()
        } else {
            byte_size_to_string(entry.byte_size)
        };
        println!("{:<10} {:>10}  {}", format!("{:?}", entry.file_type()), size, entry.name);
    }
    Ok(())
}

fn pool_config(cli: &Cli) -> PoolConfig {
    PoolConfig {
        workers: cli
            .workers
            .filter(|&w| w > 0)
            .or_else(settings::get_workers)
            .unwrap_or_else(default_worker_count),
        timeout: cli
            .timeout
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or_else(settings::get_render_timeout),
    }
}

fn extract(cli: &Cli, file: &Path) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let output_dir = cli.media_folder.clone().unwrap_or_else(|| cwd.clone());
    let output_dir = if output_dir.is_absolute() {
        output_dir
    } else {
        cwd.join(output_dir)
    };
    let cache_path = cli
        .cache_file
        .clone()
        .unwrap_or_else(|| output_dir.join(DEFAULT_CACHE_FILE_NAME));

    let cache_type = match SourceKind::from_path(file) {
        Some(SourceKind::Note) => CacheType::Notes,
        Some(SourceKind::Pdf) => CacheType::Pdfs,
        None => bail!(
            "Unsupported file type {} (expected .note or .pdf)",
            file.display()
        ),
    };

    let storage: Arc<dyn Storage> = Arc::new(FsStorage::with_default_root());
    let cache = Arc::new(CacheIndex::new(
        Box::new(JsonCacheFile::new(Arc::clone(&storage), cache_path)),
        Arc::clone(&storage),
        &[cache_type],
    ));

    let mut options = ExtractOptions::new(output_dir.clone());
    options.force = cli.force;
    options.pool = pool_config(cli);
    options.raster_dpi = settings::get_raster_dpi();

    #[allow(unused_mut)]
    let mut extractor = Extractor::new(
        Arc::clone(&storage),
        cache,
        Arc::new(RattaRasterizer),
        options,
    );
    #[cfg(feature = "pdf")]
    {
        extractor = extractor.with_compositor(Arc::new(supernote_viewer::pdf::MupdfCompositor));
    }

    let report = extractor
        .extract(file)
        .with_context(|| format!("Failed to extract {}", file.display()))?;
    print_report(&report);

    if let Some(target) = &cli.generate_md {
        generate_markdown(cli, &storage, &report, file, &output_dir, target)?;
    }
    Ok(())
}

fn print_report(report: &ExtractionReport) {
    if report.fast_path {
        info!("{} is unchanged, {} pages cached", report.file_key, report.artifacts.len());
    } else {
        info!(
            "{}: rendered {}, reused {}, blank {}",
            report.file_key,
            report.render_count(),
            report.reused.len(),
            report.blank.len()
        );
    }
    if let Some(warning) = &report.save_warning {
        warn!("Cache was not saved: {warning}");
    }
    if report.is_partial() {
        for failure in &report.failures {
            println!("Skipped page {}: {}", failure.page_number, failure.reason);
        }
        for (page, path) in &report.degraded {
            println!("Page {page} kept as PDF: {}", path.display());
        }
    }
}

fn generate_markdown(
    cli: &Cli,
    storage: &Arc<dyn Storage>,
    report: &ExtractionReport,
    file: &Path,
    media_folder: &Path,
    target: &Path,
) -> Result<()> {
    let output_dir = if target.extension().is_some_and(|e| e == "md") {
        target.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        target.to_path_buf()
    };
    let aggregator = MarkdownAggregator::new(Arc::clone(storage), output_dir, media_folder)
        .with_markers(settings::get_region_markers());

    match report.cache_type {
        CacheType::Notes => {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "note".to_string());
            let path = aggregator.write_note_markdown(&stem, &report.artifacts, target)?;
            info!("Markdown written to {}", path.display());
        }
        CacheType::Pdfs => {
            let config = match cli.buckets.clone().or_else(settings::get_bucket_config) {
                Some(path) => load_bucket_config(storage.as_ref(), &path)?,
                None => BucketConfig::planner(cli.year.unwrap_or_else(settings::get_planner_year)),
            };
            let written =
                aggregator.update_buckets(&report.artifacts, &report.touched(), &config)?;
            for path in written {
                println!("Updated {}", path.display());
            }
        }
    }
    Ok(())
}
