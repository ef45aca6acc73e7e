use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use nmdc_client::app::{App, DEFAULT_PAGE_SIZE, SearchOptions, parse_match};
use nmdc_client::config::{ApiEnv, ConfigLoader};
use nmdc_client::domain::{Collection, Record};
use nmdc_client::enrichment::{
    DEFAULT_ALPHA, DEFAULT_ANNOTATION_TYPE, DEFAULT_MIN_COUNT, EnrichmentOptions, FdrMethod,
    GroupingMode, TestMethod, run_enrichment,
};
use nmdc_client::error::NmdcError;
use nmdc_client::output::{ConsoleOutput, ExportFormat, export_enrichment, export_records};
use nmdc_client::transport::{HttpTransport, ReqwestTransport};

#[derive(Parser)]
#[command(name = "nmdc")]
#[command(about = "Query the NMDC metadata API and run annotation enrichment on dumped studies")]
#[command(version)]
struct Cli {
    /// API deployment to query.
    #[arg(long, global = true, env = "NMDC_ENV", value_enum)]
    env: Option<ApiEnv>,

    /// JSON config file (defaults to ./nmdc.json, then the user config dir).
    #[arg(long, global = true)]
    config: Option<String>,

    /// More logging on stderr (-v info, -vv debug). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search biosamples")]
    Biosample(RecordArgs),
    #[command(about = "Search studies")]
    Study(RecordArgs),
    #[command(about = "Search data objects")]
    DataObject(RecordArgs),
    #[command(about = "Search any nmdcschema collection")]
    Collection(CollectionArgs),
    #[command(about = "Report ids that do not exist in a collection")]
    CheckIds(CheckIdsArgs),
    #[command(about = "Annotation enrichment between two groups of biosamples in a dumped study")]
    Enrich(EnrichArgs),
}

#[derive(Args)]
struct RecordArgs {
    /// Fetch a single record by id.
    #[arg(long, conflicts_with_all = ["filter", "matches", "bbox", "all"])]
    id: Option<String>,

    /// Filter as JSON or a YAML mapping, e.g. 'ecosystem_category: Plants'.
    #[arg(long)]
    filter: Option<String>,

    /// Case-insensitive substring match on a field; repeatable.
    #[arg(long = "match", value_name = "KEY=VALUE", value_parser = parse_match_arg)]
    matches: Vec<(String, String)>,

    /// Match --match values exactly instead of as substrings.
    #[arg(long)]
    exact: bool,

    /// Bounding box on lat_lon.
    #[arg(long, value_name = "MIN_LAT,MIN_LON,MAX_LAT,MAX_LON", allow_hyphen_values = true)]
    bbox: Option<String>,

    /// Page size.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = parse_page_size)]
    limit: usize,

    /// Follow continuation tokens until the last page.
    #[arg(long)]
    all: bool,

    /// Comma-separated projection.
    #[arg(long)]
    fields: Option<String>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export format; inferred from the output extension when omitted.
    #[arg(long, value_enum)]
    format: Option<ExportFormat>,
}

#[derive(Args)]
struct CollectionArgs {
    /// Collection name, e.g. biosample_set or workflow_execution.
    #[arg(value_parser = parse_collection)]
    name: Collection,

    #[command(flatten)]
    records: RecordArgs,
}

#[derive(Args)]
struct CheckIdsArgs {
    #[arg(value_parser = parse_collection)]
    collection: Collection,

    #[arg(required = true)]
    ids: Vec<String>,
}

#[derive(Args)]
struct EnrichArgs {
    /// Study directory written by the dump step.
    study_dir: Utf8PathBuf,

    /// Biosample property to group by, e.g. depth, ph, ecosystem_type.
    #[arg(long)]
    group_by: String,

    /// GFF attribute to count: ec_number, pfam, cog, ko.
    #[arg(long, default_value = DEFAULT_ANNOTATION_TYPE)]
    annotation_type: String,

    /// Split numeric values at <= threshold vs > threshold.
    #[arg(long, conflicts_with_all = ["bins", "categories"], allow_hyphen_values = true)]
    threshold: Option<f64>,

    /// Equal-width bins; the lowest bin is compared with the highest.
    #[arg(long, conflicts_with = "categories")]
    bins: Option<usize>,

    /// One category (vs the rest) or two, comma-separated.
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    #[arg(long, value_enum, default_value_t = TestMethod::Fisher)]
    method: TestMethod,

    #[arg(long, value_enum, default_value_t = FdrMethod::BenjaminiHochberg)]
    fdr_method: FdrMethod,

    /// Minimum combined count for an annotation to be tested.
    #[arg(long, default_value_t = DEFAULT_MIN_COUNT)]
    min_count: u64,

    /// Significance level on the adjusted p-value.
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    alpha: f64,

    /// Count every occurrence instead of biosamples with the annotation.
    #[arg(long)]
    raw_counts: bool,

    /// Export every tested annotation, not only significant ones.
    #[arg(long)]
    include_nonsignificant: bool,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ExportFormat::Tsv)]
    format: ExportFormat,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<NmdcError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &NmdcError) -> u8 {
    match error {
        NmdcError::Network { .. }
        | NmdcError::Remote { .. }
        | NmdcError::Decode { .. }
        | NmdcError::Pagination { .. } => 3,
        NmdcError::MalformedFilter { .. }
        | NmdcError::MissingData(_)
        | NmdcError::EmptyGroup { .. }
        | NmdcError::InvalidGrouping(_)
        | NmdcError::InvalidEnvironment(_)
        | NmdcError::InvalidCollection(_)
        | NmdcError::InvalidId(_)
        | NmdcError::InvalidArgument(_)
        | NmdcError::ConfigRead(_)
        | NmdcError::ConfigParse(_) => 2,
        NmdcError::Filesystem(_) | NmdcError::Export(_) => 1,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let app = || connect(cli.config.as_deref(), cli.env);
    match cli.command {
        Commands::Biosample(args) => run_records(&app()?, Collection::Biosample, args),
        Commands::Study(args) => run_records(&app()?, Collection::Study, args),
        Commands::DataObject(args) => run_records(&app()?, Collection::DataObject, args),
        Commands::Collection(args) => run_records(&app()?, args.name, args.records),
        Commands::CheckIds(args) => run_check_ids(&app()?, args),
        Commands::Enrich(args) => run_enrich(args),
    }
}

fn connect(config_path: Option<&str>, env: Option<ApiEnv>) -> miette::Result<App<ReqwestTransport>> {
    let mut config = ConfigLoader::resolve(config_path)?;
    if let Some(env) = env {
        config.env = env;
        config.base_url = None;
    }
    tracing::debug!(env = %config.env, base_url = %config.base_url(), "resolved client config");
    Ok(App::connect(config)?)
}

fn run_records<T: HttpTransport>(
    app: &App<T>,
    collection: Collection,
    args: RecordArgs,
) -> miette::Result<ExitCode> {
    if let Some(id) = args.id.as_deref() {
        let Some(record) = app.lookup(collection, id, args.fields.as_deref())? else {
            eprintln!("No {collection} record found with id {id}");
            return Ok(ExitCode::from(2));
        };
        emit_records(&[record], args.output.as_deref(), args.format)?;
        return Ok(ExitCode::SUCCESS);
    }

    let options = SearchOptions {
        filter: args.filter,
        matches: args.matches,
        exact: args.exact,
        bbox: args.bbox,
        page_size: args.limit,
        all_pages: args.all,
        fields: args.fields,
    };
    let result = app.search(collection, &options)?;
    emit_records(&result.records, args.output.as_deref(), args.format)?;
    Ok(ExitCode::SUCCESS)
}

fn emit_records(
    records: &[Record],
    output: Option<&Path>,
    format: Option<ExportFormat>,
) -> miette::Result<()> {
    match output {
        Some(path) => {
            let format = export_records(records, path, format)?;
            eprintln!(
                "Saved {} record(s) to {} ({format})",
                records.len(),
                path.display()
            );
        }
        None => ConsoleOutput::print_record_preview(records).into_diagnostic()?,
    }
    Ok(())
}

fn run_check_ids<T: HttpTransport>(app: &App<T>, args: CheckIdsArgs) -> miette::Result<ExitCode> {
    let result = app.check_ids(args.collection, &args.ids);
    ConsoleOutput::print_missing_ids(&result.missing).into_diagnostic()?;
    if result.all_exist() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

fn run_enrich(args: EnrichArgs) -> miette::Result<ExitCode> {
    let grouping = if let Some(threshold) = args.threshold {
        GroupingMode::Threshold(threshold)
    } else if let Some(bins) = args.bins {
        GroupingMode::Bins(bins)
    } else if !args.categories.is_empty() {
        GroupingMode::Categories(args.categories)
    } else {
        GroupingMode::Auto
    };
    let options = EnrichmentOptions {
        group_by: args.group_by,
        annotation_type: args.annotation_type,
        grouping,
        method: args.method,
        fdr_method: args.fdr_method,
        min_count: args.min_count,
        alpha: args.alpha,
        raw_counts: args.raw_counts,
    };

    let report = run_enrichment(&args.study_dir, &options)?;
    match args.output {
        Some(path) => {
            let rows = if args.include_nonsignificant {
                &report.results[..]
            } else {
                report.significant()
            };
            export_enrichment(rows, &path, args.format)?;
            eprintln!(
                "Saved {} of {} tested annotation(s) to {}",
                rows.len(),
                report.results.len(),
                path.display()
            );
        }
        None => ConsoleOutput::print_enrichment_summary(&report).into_diagnostic()?,
    }
    Ok(ExitCode::SUCCESS)
}

fn parse_match_arg(text: &str) -> Result<(String, String), String> {
    parse_match(text).map_err(|err| err.to_string())
}

fn parse_collection(text: &str) -> Result<Collection, String> {
    text.parse::<Collection>().map_err(|err| err.to_string())
}

fn parse_page_size(text: &str) -> Result<usize, String> {
    match text.parse::<usize>() {
        Ok(0) => Err("page size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}
