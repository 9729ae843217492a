use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use reef_atlas_manager::config::ConfigLoader;
use reef_atlas_manager::deposit::{DepositMetadata, HttpDepositService};
use reef_atlas_manager::domain::SessionName;
use reef_atlas_manager::error::AtlasError;
use reef_atlas_manager::import::{AnnotationBatch, Importer};
use reef_atlas_manager::output::{JsonOutput, LogSink};
use reef_atlas_manager::pipeline::{Pipeline, SessionSource};
use reef_atlas_manager::store::{ATLAS_DB_FILE, AtlasStore};
use reef_atlas_manager::transfer::CancelToken;

#[derive(Parser)]
#[command(name = "reef-am")]
#[command(about = "Reconcile and import versioned marine-imagery survey deposits")]
#[command(version, author)]
struct Cli {
    /// Path to the config file (defaults to ./reef-am.json).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reconcile staged sessions against the remote deposits and import them")]
    Update(UpdateArgs),
    #[command(about = "Download a session's published files into the local layout")]
    Download(DownloadArgs),
    #[command(about = "Publish staged artifacts as a new deposit or version")]
    Publish(PublishArgs),
    #[command(about = "Import an annotation batch into the atlas")]
    Annotate(AnnotateArgs),
}

#[derive(Args)]
struct UpdateArgs {
    /// Directory whose sub-directories are prepared session stagings,
    /// each named after its session.
    #[arg(long, conflicts_with_all = ["session", "staging"])]
    sessions_dir: Option<Utf8PathBuf>,

    /// Single session to update.
    #[arg(long, requires = "staging")]
    session: Option<String>,

    /// Staging directory of that session.
    #[arg(long, requires = "session")]
    staging: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    session: String,

    /// Output folder; the session layout is created underneath.
    #[arg(long, default_value = ".")]
    out: Utf8PathBuf,
}

#[derive(Args)]
struct PublishArgs {
    #[arg(long)]
    session: String,

    #[arg(long)]
    staging: Utf8PathBuf,

    /// Declared version label, e.g. RAW_DATA or PROCESSED_DATA.
    #[arg(long)]
    version_label: String,

    #[arg(long)]
    title: Option<String>,

    #[arg(long, default_value = "")]
    description: String,

    /// File name patterns to remove from the draft before publishing.
    #[arg(long = "restricted")]
    restricted: Vec<String>,
}

#[derive(Args)]
struct AnnotateArgs {
    /// JSON annotation batch file.
    #[arg(long)]
    batch: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(atlas) = report.downcast_ref::<AtlasError>() {
            return ExitCode::from(map_exit_code(atlas));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AtlasError) -> u8 {
    match error {
        AtlasError::MissingConfig
        | AtlasError::ConfigRead(_)
        | AtlasError::ConfigParse(_)
        | AtlasError::MissingAccessToken
        | AtlasError::SessionNotFound(_)
        | AtlasError::AmbiguousSession(_) => 2,
        AtlasError::DepositHttp(_)
        | AtlasError::DepositStatus { .. }
        | AtlasError::TransferHttp(_)
        | AtlasError::TransferStatus { .. }
        | AtlasError::TransferExhausted { .. }
        | AtlasError::TransferCancelled
        | AtlasError::ChecksumMismatch { .. } => 3,
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
    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    let store =
        AtlasStore::open(config.atlas_folder.join(ATLAS_DB_FILE).as_std_path()).into_diagnostic()?;
    let service =
        HttpDepositService::new(&config.api_base, &config.access_token).into_diagnostic()?;
    let pipeline = Pipeline::new(service, &store, &config).into_diagnostic()?;

    match cli.command {
        Commands::Update(args) => run_update(args, &pipeline),
        Commands::Download(args) => run_download(args, &pipeline),
        Commands::Publish(args) => run_publish(args, &pipeline),
        Commands::Annotate(args) => run_annotate(args, &store),
    }
}

fn run_update(args: UpdateArgs, pipeline: &Pipeline<'_, HttpDepositService>) -> miette::Result<()> {
    let sources = gather_sources(&args).into_diagnostic()?;
    if sources.is_empty() {
        return Err(miette::Report::msg("no sessions to update"));
    }

    let summary = pipeline.update_sessions(&sources, &LogSink).into_diagnostic()?;
    tracing::info!(
        processed = summary.processed,
        imported = summary.imported,
        failed = summary.failures.len(),
        "end of run"
    );
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}

fn gather_sources(args: &UpdateArgs) -> Result<Vec<SessionSource>, AtlasError> {
    if let (Some(session), Some(staging)) = (&args.session, &args.staging) {
        let session: SessionName = session.parse()?;
        return Ok(vec![SessionSource {
            session,
            staging_dir: staging.clone(),
        }]);
    }

    let Some(sessions_dir) = &args.sessions_dir else {
        return Ok(Vec::new());
    };
    let entries = std::fs::read_dir(sessions_dir.as_std_path())
        .map_err(|err| AtlasError::Filesystem(format!("read {sessions_dir}: {err}")))?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match name.parse::<SessionName>() {
            Ok(session) => {
                let staging_dir = Utf8PathBuf::from_path_buf(entry.path())
                    .map_err(|_| AtlasError::Filesystem("non-utf8 session path".to_string()))?;
                sources.push(SessionSource {
                    session,
                    staging_dir,
                });
            }
            Err(_) => {
                tracing::warn!(folder = %name, "folder is not a session name, skipping");
            }
        }
    }
    sources.sort_by(|a, b| a.session.as_str().cmp(b.session.as_str()));
    Ok(sources)
}

fn run_download(
    args: DownloadArgs,
    pipeline: &Pipeline<'_, HttpDepositService>,
) -> miette::Result<()> {
    let session: SessionName = args.session.parse().into_diagnostic()?;
    let cancel = CancelToken::new();
    pipeline
        .download_session(&session, &args.out, &cancel, &LogSink)
        .into_diagnostic()?;
    Ok(())
}

fn run_publish(
    args: PublishArgs,
    pipeline: &Pipeline<'_, HttpDepositService>,
) -> miette::Result<()> {
    let session: SessionName = args.session.parse().into_diagnostic()?;
    let metadata = DepositMetadata {
        title: args.title.unwrap_or_else(|| session.to_string()),
        upload_type: "dataset".to_string(),
        description: args.description,
        version: args.version_label,
        session_urn: session.urn(),
    };
    let cancel = CancelToken::new();
    let published_id = pipeline
        .publish_session(
            &session,
            &args.staging,
            &metadata,
            &args.restricted,
            &cancel,
            &LogSink,
        )
        .into_diagnostic()?;
    tracing::info!(deposit_id = published_id, "version published");
    Ok(())
}

fn run_annotate(args: AnnotateArgs, store: &AtlasStore) -> miette::Result<()> {
    let batch = AnnotationBatch::from_json_file(&args.batch).into_diagnostic()?;
    let importer = Importer::new(store);
    let outcome = importer.import_annotations(&batch).into_diagnostic()?;
    JsonOutput::print_annotation(&outcome).into_diagnostic()?;
    Ok(())
}
