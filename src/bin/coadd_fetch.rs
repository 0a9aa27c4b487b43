use std::path::Path;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use coadd_fetch::app::{App, BatchMode, ProgressSink};
use coadd_fetch::cache::{MetadataCache, make_cache};
use coadd_fetch::catalog::CatalogHttpClient;
use coadd_fetch::config::{ArchiveRoots, ConfigLoader, cache_file_path};
use coadd_fetch::domain::{Band, Campaign, TileName};
use coadd_fetch::error::FetchError;
use coadd_fetch::output::{JsonOutput, OutputMode, TextOutput};
use coadd_fetch::sources::SourceListFile;
use coadd_fetch::transfer::{RsyncTool, TransferTool};

#[derive(Parser)]
#[command(name = "coadd-fetch")]
#[command(about = "Resolve and fetch survey coadd products and their single-epoch inputs")]
#[command(version, author)]
struct Cli {
    /// Processing campaign tag [default: Y3A1_COADD, or the batch file's own]
    #[arg(long, global = true)]
    campaign: Option<String>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Show resolved paths for a tile and band")]
    Info(TargetArgs),
    #[command(about = "Print the download file list for a tile and band")]
    List(ListArgs),
    #[command(about = "Download a tile and band from the remote archive")]
    Download(TargetArgs),
    #[command(about = "Remove downloaded files for a tile and band")]
    Remove(TargetArgs),
    #[command(about = "Rebuild the campaign cache from the catalog")]
    MakeCache,
    #[command(about = "Download or remove every target listed in a batch file")]
    Batch(BatchArgs),
}

#[derive(Args)]
struct TargetArgs {
    tile: String,
    band: String,

    /// JSON file with single-epoch source lists keyed by `{tile}-{band}`
    #[arg(long)]
    sources: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct ListArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Print archive-relative paths, as written to the transfer list
    #[arg(long)]
    relative: bool,
}

#[derive(Args)]
struct BatchArgs {
    #[arg(long)]
    config: Utf8PathBuf,

    /// Remove instead of download
    #[arg(long)]
    remove: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FetchError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::NotFound(_) => 2,
        FetchError::CatalogHttp(_)
        | FetchError::CatalogStatus { .. }
        | FetchError::MissingTool(_)
        | FetchError::ToolFailure { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let requested = cli
        .campaign
        .as_deref()
        .map(str::parse::<Campaign>)
        .transpose()?;
    let campaign = requested.clone().unwrap_or_default();

    match cli.command {
        Command::MakeCache => {
            let path = cache_file_path(&campaign)?;
            let catalog = CatalogHttpClient::from_env()?;
            let rows = make_cache(&campaign, &path, &catalog)?;
            eprintln!("wrote {rows} rows to {path}");
            Ok(())
        }
        Command::Info(args) => {
            let (tile, band) = parse_target(&args)?;
            let app = build_app(campaign, args.sources.as_deref(), NopTransfer)?;
            let info = app.get_info(&tile, band)?;
            let printed = match output_mode {
                OutputMode::Json => JsonOutput::print_info(&info),
                OutputMode::Text => TextOutput::print_info(&info),
            };
            printed.into_diagnostic()
        }
        Command::List(args) => {
            let (tile, band) = parse_target(&args.target)?;
            let app = build_app(campaign, args.target.sources.as_deref(), NopTransfer)?;
            let info = app.get_info(&tile, band)?;
            let files = if args.relative {
                app.download_list(&info)?
            } else {
                info.file_list()?
                    .into_iter()
                    .map(|path| path.to_string())
                    .collect()
            };
            let printed = match output_mode {
                OutputMode::Json => JsonOutput::print_list(&files),
                OutputMode::Text => TextOutput::print_list(&files),
            };
            printed.into_diagnostic()
        }
        Command::Download(args) => {
            let (tile, band) = parse_target(&args)?;
            let app = build_app(
                campaign,
                args.sources.as_deref(),
                RsyncTool::from_env()?,
            )?;
            let result = app.download(&tile, band, sink(output_mode))?;
            let printed = match output_mode {
                OutputMode::Json => JsonOutput::print_download(&result),
                OutputMode::Text => TextOutput::print_download(&result),
            };
            printed.into_diagnostic()
        }
        Command::Remove(args) => {
            let (tile, band) = parse_target(&args)?;
            let app = build_app(campaign, args.sources.as_deref(), NopTransfer)?;
            let result = app.remove(&tile, band, sink(output_mode))?;
            let printed = match output_mode {
                OutputMode::Json => JsonOutput::print_remove(&result),
                OutputMode::Text => TextOutput::print_remove(&result),
            };
            printed.into_diagnostic()
        }
        Command::Batch(args) => {
            let batch = ConfigLoader::resolve(&args.config)?;
            let campaign = batch.campaign_or(requested.as_ref())?;
            let result = if args.remove {
                let app = build_app(campaign, None, NopTransfer)?;
                app.run_batch(&batch, BatchMode::Remove, sink(output_mode))?
            } else {
                let app = build_app(campaign, None, RsyncTool::from_env()?)?;
                app.run_batch(&batch, BatchMode::Download, sink(output_mode))?
            };
            let printed = match output_mode {
                OutputMode::Json => JsonOutput::print_batch(&result),
                OutputMode::Text => TextOutput::print_batch(&result),
            };
            printed.into_diagnostic()
        }
    }
}

fn parse_target(args: &TargetArgs) -> Result<(TileName, Band), FetchError> {
    Ok((args.tile.parse()?, args.band.parse()?))
}

fn sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    }
}

fn open_cache(campaign: Campaign) -> Result<MetadataCache, FetchError> {
    let path = cache_file_path(&campaign)?;
    if path.as_std_path().exists() {
        return MetadataCache::load(campaign, &path);
    }
    let catalog = CatalogHttpClient::from_env()?;
    MetadataCache::open(campaign, &path, &catalog)
}

fn build_app<T: TransferTool>(
    campaign: Campaign,
    sources: Option<&camino::Utf8Path>,
    transfer: T,
) -> Result<App<T>, FetchError> {
    let cache = open_cache(campaign)?;
    let roots = ArchiveRoots::from_env()?;
    let app = App::new(cache, roots, transfer);
    match sources {
        Some(path) => Ok(app.with_sources(Box::new(SourceListFile::open(path)?))),
        None => Ok(app),
    }
}

struct NopTransfer;

impl TransferTool for NopTransfer {
    fn sync(&self, _list_file: &Path, _roots: &ArchiveRoots) -> Result<(), FetchError> {
        Err(FetchError::MissingTool(
            "transfer tool not configured".to_string(),
        ))
    }
}
