use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use tess_ida::auxdb::{AuxStore, KeyValueStore, PositionPatch};
use tess_ida::client::{IdaClient, IdaHttpClient};
use tess_ida::config::{ConfigLoader, ConfigOverrides, PipelineConfig};
use tess_ida::domain::{InstrumentName, Period, Position, SourceDescriptor};
use tess_ida::ephemeris::LowPrecisionEphemeris;
use tess_ida::error::IdaError;
use tess_ida::output::{HumanOutput, JsonOutput, OutputMode};
use tess_ida::pipeline::{Pipeline, RunReport, RunRequest};
use tess_ida::selector::Selector;

#[derive(Parser)]
#[command(name = "tess-ida")]
#[command(about = "Fetch, enrich and combine TESS photometer IDA monthly files")]
#[command(version)]
struct Cli {
    /// JSON configuration file (default: ./tess-ida.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Auxiliary store file holding fingerprints and coordinates.
    #[arg(long, global = true)]
    aux_store: Option<String>,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download monthly IDA files into the staging directory")]
    Fetch(RunArgs),
    #[command(about = "Convert staged IDA files into enriched ECSV artifacts")]
    Transform(RunArgs),
    #[command(about = "Combine monthly artifacts into one file per instrument")]
    Combine(RunArgs),
    #[command(about = "Fetch, transform and combine in one run")]
    Pipe(PipeArgs),
    #[command(about = "Manage instrument coordinates")]
    Coords(CoordsArgs),
    #[command(about = "Auxiliary store administration")]
    Schema(SchemaArgs),
}

#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
struct SelectorArgs {
    /// Single instrument, e.g. stars1.
    #[arg(long)]
    name: Option<InstrumentName>,

    /// Exact remote file name, e.g. stars201_2020-02_-1.dat.
    #[arg(long)]
    exact: Option<String>,

    /// Several instruments by name.
    #[arg(long, num_args = 1..)]
    names: Vec<InstrumentName>,

    /// Photometer numbers.
    #[arg(long, num_args = 1..)]
    list: Vec<u32>,

    /// Inclusive photometer number range.
    #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
    range: Vec<u32>,

    /// Instruments with stored coordinates near a point.
    #[arg(
        long,
        num_args = 2..=3,
        value_names = ["LON", "LAT", "RADIUS_KM"],
        allow_negative_numbers = true
    )]
    near: Vec<f64>,
}

impl SelectorArgs {
    fn selector(&self) -> Result<Selector, IdaError> {
        if let Some(name) = &self.name {
            return Ok(Selector::Single(name.clone()));
        }
        if let Some(exact) = &self.exact {
            return Selector::exact(exact);
        }
        if !self.names.is_empty() {
            return Ok(Selector::Names(self.names.clone()));
        }
        if !self.list.is_empty() {
            return Ok(Selector::Numbers(self.list.clone()));
        }
        if let [from, to] = self.range[..] {
            return Selector::number_range(from, to);
        }
        match self.near[..] {
            [longitude, latitude] => Selector::near(longitude, latitude, None),
            [longitude, latitude, radius] => Selector::near(longitude, latitude, Some(radius)),
            _ => Err(IdaError::InvalidSelector("no instrument selected".to_string())),
        }
    }
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    selector: SelectorArgs,

    /// First month (YYYY-MM), default previous month.
    #[arg(long)]
    since: Option<Period>,

    /// Last month (YYYY-MM), default current month.
    #[arg(long)]
    until: Option<Period>,

    /// Recompute even when the source fingerprint is unchanged.
    #[arg(long)]
    force: bool,

    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Whole-run deadline in seconds.
    #[arg(long)]
    deadline: Option<u64>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    ida_dir: Option<String>,

    #[arg(long)]
    ecsv_dir: Option<String>,

    /// Name of the combined file.
    #[arg(long)]
    out_filename: Option<String>,
}

impl RunArgs {
    fn overrides(&self, aux_store: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.base_url.clone(),
            aux_store,
            ida_dir: self.ida_dir.clone(),
            ecsv_dir: self.ecsv_dir.clone(),
            concurrency: self.concurrency,
            timeout_secs: self.timeout,
            deadline_secs: self.deadline,
            force: self.force,
        }
    }

    fn request(&self) -> Result<RunRequest, IdaError> {
        let mut request = RunRequest::new(
            self.selector.selector()?,
            self.since.unwrap_or_else(Period::previous),
            self.until.unwrap_or_else(Period::current),
        );
        request.out_filename = self.out_filename.clone();
        Ok(request)
    }
}

#[derive(Args, Clone)]
struct PipeArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Transform what is already staged instead of downloading.
    #[arg(long)]
    skip_download: bool,

    /// Do not combine the transformed months.
    #[arg(long)]
    no_combine: bool,
}

#[derive(Args)]
struct CoordsArgs {
    #[command(subcommand)]
    command: CoordsCommand,
}

#[derive(Subcommand)]
enum CoordsCommand {
    #[command(about = "Register coordinates for an instrument")]
    Add {
        #[arg(long)]
        name: InstrumentName,
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        height: f64,
    },
    #[command(about = "Change stored coordinates (re-run with --force afterwards)")]
    Update {
        #[arg(long)]
        name: InstrumentName,
        #[arg(long, allow_negative_numbers = true)]
        longitude: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        latitude: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        height: Option<f64>,
    },
    #[command(about = "Remove stored coordinates")]
    Delete {
        #[arg(long)]
        name: InstrumentName,
    },
    #[command(about = "List stored coordinates")]
    List,
}

#[derive(Args)]
struct SchemaArgs {
    #[command(subcommand)]
    command: SchemaCommand,
}

#[derive(Subcommand)]
enum SchemaCommand {
    #[command(about = "Drop all fingerprints and coordinates")]
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<IdaError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &IdaError) -> u8 {
    match error {
        IdaError::NotFound(_) | IdaError::ConfigRead(_) => 2,
        IdaError::Network { .. } | IdaError::HttpStatus { .. } => 3,
        IdaError::Store(_) => 4,
        IdaError::MissingPosition { .. } => 5,
        _ => 1,
    }
}

fn report_exit_code(report: &RunReport) -> ExitCode {
    if !report.missing_position.is_empty() {
        ExitCode::from(5)
    } else if report.has_failures() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Fetch(args) => {
            let config = ConfigLoader::resolve(config_path, args.overrides(cli.aux_store))?;
            let client = http_client(&config)?;
            let pipeline = Pipeline::new(config, client, LowPrecisionEphemeris)?;
            finish(pipeline.fetch(&args.request()?)?, output_mode)
        }
        Commands::Transform(args) => {
            let config = ConfigLoader::resolve(config_path, args.overrides(cli.aux_store))?;
            let pipeline = Pipeline::new(config, OfflineClient, LowPrecisionEphemeris)?;
            finish(pipeline.transform(&args.request()?)?, output_mode)
        }
        Commands::Combine(args) => {
            let config = ConfigLoader::resolve(config_path, args.overrides(cli.aux_store))?;
            let pipeline = Pipeline::new(config, OfflineClient, LowPrecisionEphemeris)?;
            finish(pipeline.combine(&args.request()?)?, output_mode)
        }
        Commands::Pipe(args) => {
            let config = ConfigLoader::resolve(config_path, args.run.overrides(cli.aux_store))?;
            let mut request = args.run.request()?;
            request.skip_download = args.skip_download;
            // A single exact file has nothing to combine with.
            request.combine = !args.no_combine && !matches!(request.selector, Selector::Exact(_));
            let report = if args.skip_download {
                Pipeline::new(config, OfflineClient, LowPrecisionEphemeris)?.run(&request)?
            } else {
                let client = http_client(&config)?;
                Pipeline::new(config, client, LowPrecisionEphemeris)?.run(&request)?
            };
            finish(report, output_mode)
        }
        Commands::Coords(args) => {
            let config = ConfigLoader::resolve(config_path, store_overrides(cli.aux_store))?;
            run_coords(args.command, &config, output_mode)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Schema(args) => {
            let config = ConfigLoader::resolve(config_path, store_overrides(cli.aux_store))?;
            match args.command {
                SchemaCommand::Reset { yes } => {
                    if !yes {
                        return Err(miette::Report::msg(
                            "schema reset deletes every fingerprint and coordinate; pass --yes to confirm",
                        ));
                    }
                    AuxStore::open(config.aux_store.clone())?.reset()?;
                    println!("auxiliary store {} reset", config.aux_store);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn store_overrides(aux_store: Option<String>) -> ConfigOverrides {
    ConfigOverrides {
        aux_store,
        ..ConfigOverrides::default()
    }
}

fn http_client(config: &PipelineConfig) -> miette::Result<IdaHttpClient> {
    Ok(IdaHttpClient::new(
        config.require_base_url()?,
        config.timeout,
    )?)
}

fn finish(report: RunReport, output_mode: OutputMode) -> miette::Result<ExitCode> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_report(&report).into_diagnostic()?,
    }
    Ok(report_exit_code(&report))
}

fn run_coords(
    command: CoordsCommand,
    config: &PipelineConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let aux = AuxStore::open(config.aux_store.clone())?;
    let positions = aux.positions();
    match command {
        CoordsCommand::Add {
            name,
            longitude,
            latitude,
            height,
        } => {
            positions.add(
                &name,
                Position {
                    longitude,
                    latitude,
                    height,
                },
            )?;
            println!("{name}: {longitude}, {latitude}, {height} m");
        }
        CoordsCommand::Update {
            name,
            longitude,
            latitude,
            height,
        } => {
            let patch = PositionPatch {
                longitude,
                latitude,
                height,
            };
            if patch.is_empty() {
                return Err(miette::Report::msg(
                    "nothing to update: pass --longitude, --latitude or --height",
                ));
            }
            let position = positions.update(&name, patch)?;
            println!(
                "{name}: {}, {}, {} m",
                position.longitude, position.latitude, position.height
            );
        }
        CoordsCommand::Delete { name } => {
            if !positions.delete(name.as_str())? {
                return Err(IdaError::PositionUnknown(name.to_string()).into());
            }
            println!("{name}: coordinates removed");
        }
        CoordsCommand::List => {
            let records = positions.records()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_json(&records).into_diagnostic()?,
                OutputMode::Human => {
                    for record in records {
                        println!(
                            "{:<12} {:>11.6} {:>10.6} {:>8.1}",
                            record.instrument,
                            record.position.longitude,
                            record.position.latitude,
                            record.position.height
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// Client for commands that never touch the network.
struct OfflineClient;

impl IdaClient for OfflineClient {
    fn download(
        &self,
        descriptor: &SourceDescriptor,
        _timeout: Duration,
    ) -> Result<Vec<u8>, IdaError> {
        Err(IdaError::Network {
            file: descriptor.filename(),
            message: "offline".to_string(),
        })
    }
}
