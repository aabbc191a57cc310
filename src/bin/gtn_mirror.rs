use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gtn_data_mirror::app::{App, ProgressSink, RunReport};
use gtn_data_mirror::batch::load_transfer_list;
use gtn_data_mirror::config::{ConfigLoader, EnvOverrides, MirrorConfig};
use gtn_data_mirror::error::MirrorError;
use gtn_data_mirror::ftp::FtpFetcher;
use gtn_data_mirror::http::HttpFetcher;
use gtn_data_mirror::output::{JsonOutput, LogSink, OutputMode, print_list_text, print_report_text};
use gtn_data_mirror::remote::{FileId, OnedataClient};
use gtn_data_mirror::skiplist::SkipList;
use gtn_data_mirror::store::Store;
use gtn_data_mirror::summary::{DEFAULT_SUMMARY_NAME, SummaryWriter};
use gtn_data_mirror::target::{LocalTarget, RemoteTarget};
use gtn_data_mirror::transfer::{RetryPolicy, TransferEngine};

#[derive(Parser)]
#[command(name = "gtn-mirror")]
#[command(about = "Mirror data-library manifests into a local directory or a Onedata space")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every manifest item into a local directory tree")]
    Download(DownloadArgs),
    #[command(about = "Mirror every manifest item into the remote store")]
    Upload(UploadArgs),
    #[command(about = "Download a tab-separated list of destination/url pairs")]
    FetchList(FetchListArgs),
    #[command(about = "List manifest items without transferring anything")]
    List(ListArgs),
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    input: Utf8PathBuf,

    #[arg(long)]
    output: Utf8PathBuf,

    #[arg(long)]
    summary: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long)]
    input: Utf8PathBuf,

    #[arg(long)]
    root_id: Option<String>,

    #[arg(long)]
    staging_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    summary: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct FetchListArgs {
    #[arg(long)]
    list: Utf8PathBuf,

    #[arg(long)]
    summary: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    input: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MirrorError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MirrorError) -> u8 {
    match error {
        error if error.is_config() => 2,
        MirrorError::RemoteHttp(_) | MirrorError::RemoteStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let config = ConfigLoader::resolve(cli.config.as_deref(), EnvOverrides::from_process())?;
    let skip_list = match &config.skip_list {
        Some(path) => SkipList::load(path)?,
        None => SkipList::default(),
    };
    if !skip_list.is_empty() {
        info!(entries = skip_list.len(), "loaded skip list");
    }
    let app = App::new(config.manifest_name.clone(), skip_list);

    match cli.command {
        Commands::Download(args) => run_download(args, &app, &config, output_mode),
        Commands::Upload(args) => run_upload(args, &app, config, output_mode),
        Commands::FetchList(args) => run_fetch_list(args, &app, &config, output_mode),
        Commands::List(args) => {
            let result = app.list_entries(&args.input);
            match output_mode {
                OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic()?,
                OutputMode::Text => print_list_text(&result),
            }
            Ok(())
        }
    }
}

fn build_engine(config: &MirrorConfig) -> Result<TransferEngine<HttpFetcher, FtpFetcher>, MirrorError> {
    let http = HttpFetcher::new(&config.transfer)?;
    let ftp = FtpFetcher::new(&config.transfer);
    Ok(TransferEngine::new(
        http,
        ftp,
        RetryPolicy::from(&config.transfer),
    ))
}

fn run_download(
    args: DownloadArgs,
    app: &App,
    config: &MirrorConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let store = Store::new(args.output, config.staging_dir.clone());
    let summary_path = args.summary.unwrap_or_else(|| store.summary_path());
    let engine = build_engine(config)?;
    let target = LocalTarget::new(&store, &engine);

    let mut summary = SummaryWriter::create(&summary_path)?;
    let report = app.run(&args.input, &target, &mut summary, sink(output_mode))?;
    summary.finish()?;
    print_report(&report, output_mode)
}

fn run_upload(
    args: UploadArgs,
    app: &App,
    mut config: MirrorConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if let Some(root_id) = args.root_id {
        config.remote.root_id = Some(root_id);
    }
    if let Some(staging_dir) = args.staging_dir {
        config.staging_dir = staging_dir;
    }
    // Settings are checked before any transfer starts.
    config.remote.require_token()?;
    let root_id = FileId::new(config.remote.require_root_id()?);
    let remote = OnedataClient::new(&config.remote)?;

    let store = Store::new(Utf8PathBuf::from("."), config.staging_dir.clone());
    let summary_path = args
        .summary
        .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_SUMMARY_NAME));
    let engine = build_engine(&config)?;
    let target = RemoteTarget::new(&remote, root_id, &store, &engine);

    let mut summary = SummaryWriter::create(&summary_path)?;
    let report = app.run(&args.input, &target, &mut summary, sink(output_mode))?;
    summary.finish()?;
    let pruned = store.prune_staging()?;
    if pruned > 0 {
        info!(
            root = %store.staging_root(),
            directories = pruned,
            "pruned empty staging directories"
        );
    }
    print_report(&report, output_mode)
}

fn run_fetch_list(
    args: FetchListArgs,
    app: &App,
    config: &MirrorConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let requests = load_transfer_list(&args.list)?;
    let summary_path = args
        .summary
        .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_SUMMARY_NAME));
    let engine = build_engine(config)?;

    let mut summary = SummaryWriter::create(&summary_path)?;
    let report = app.fetch_list(&requests, &engine, &mut summary, sink(output_mode))?;
    summary.finish()?;
    print_report(&report, output_mode)
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &LogSink,
    }
}

fn print_report(report: &RunReport, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_report(report).into_diagnostic(),
        OutputMode::Text => {
            print_report_text(report);
            Ok(())
        }
    }
}
