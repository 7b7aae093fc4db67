use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colorbench_runner::{
    aggregate, batch, BatchOptions, BenchConfig, Catalog, FilterOptions, GeneratorGrid,
    GroupSelection, ProcessExecutor, RemoteSource, SolverFailure,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "colorbench",
    version = "0.3.0",
    about = "Benchmark driver for an external graph-coloring solver"
)]
struct Cli {
    /// Workspace configuration (YAML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Alternate benchmark catalog (YAML) instead of the built-in one.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    /// Solver binary, overriding the configuration.
    #[arg(long, global = true)]
    solver: Option<PathBuf>,
    /// Data directory, overriding the configuration.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and merge benchmark datasets into the data directory.
    Provision {
        /// Dataset tags; the default dataset when omitted.
        #[arg(short = 'd', long = "data", num_args = 0..)]
        data: Option<Vec<String>>,
        #[arg(long)]
        json: bool,
    },
    /// Generate the synthetic test instances and their manifest.
    Generate {
        #[arg(long)]
        json: bool,
    },
    /// Run the greedy ordering groups, writing JSON outputs below DIRECTORY.
    RunTests {
        directory: PathBuf,
        /// Group names; every group when omitted.
        #[arg(short = 't', long = "tests", num_args = 0..)]
        tests: Option<Vec<String>>,
        #[arg(long)]
        json: bool,
    },
    /// Run ALGORITHM on every instance of TIER and write results.csv.
    Bench {
        tier: String,
        algorithm: String,
        #[arg(short = 't', long)]
        time_limit: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Write results.csv for an already completed tier directory.
    Summarize {
        directory: PathBuf,
        tier: String,
        #[arg(long)]
        json: bool,
    },
    /// Keep the manifest instances ALGORITHM solves to optimality.
    FilterOptimal {
        algorithm: String,
        output: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List instance sets, greedy groups, tiers and datasets.
    Catalog {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = if err.downcast_ref::<SolverFailure>().is_some() {
                    "solver_failed"
                } else {
                    "command_failed"
                };
                emit_json(&json_error(code, format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct Context {
    config: BenchConfig,
    catalog: Catalog,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let mut config = BenchConfig::load_or_default(cli.config.as_deref())?;
        if let Some(solver) = &cli.solver {
            config.solver.path = solver.clone();
        }
        if let Some(data_dir) = &cli.data_dir {
            config.data_dir = data_dir.clone();
        }
        let catalog = match &cli.catalog {
            Some(path) => Catalog::load(path)?,
            None => Catalog::builtin()?.clone(),
        };
        Ok(Self { config, catalog })
    }

    fn executor(&self) -> ProcessExecutor {
        ProcessExecutor::new(&self.config.solver.path)
    }

    fn batch_options(&self, state_dir: &Path) -> BatchOptions {
        BatchOptions {
            data_dir: self.config.data_dir.clone(),
            verbosity_level: self.config.solver.verbosity_level,
            state_path: Some(state_dir.join("batch_state.json")),
        }
    }
}

fn run_command(cli: Cli) -> Result<Option<Value>> {
    let ctx = Context::load(&cli)?;
    match cli.command {
        Commands::Provision { data, json } => {
            let mut source = RemoteSource::new(&ctx.config.seven_zip)?;
            let root = std::env::current_dir()?;
            let report = colorbench_runner::provision_datasets(
                &mut source,
                &ctx.catalog,
                data.as_deref(),
                &root,
                &ctx.config.data_dir,
            )?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "provision",
                    "provisioned": report.provisioned,
                    "ignored": report.ignored,
                    "files_merged": report.files_merged,
                })));
            }
            for tag in &report.provisioned {
                println!("provisioned: {}", tag);
            }
            for tag in &report.ignored {
                println!("ignored: {}", tag);
            }
            println!("files_merged: {}", report.files_merged);
        }
        Commands::Generate { json } => {
            let report = colorbench_runner::generate_instances(
                &ctx.config.data_dir,
                &ctx.config.manifest,
                &GeneratorGrid::default(),
            )?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "generate",
                    "manifest": report.manifest.display().to_string(),
                    "instances": report.instances,
                    "edges": report.edges,
                })));
            }
            println!("manifest: {}", report.manifest.display());
            println!("instances: {}", report.instances);
            println!("edges: {}", report.edges);
        }
        Commands::RunTests {
            directory,
            tests,
            json,
        } => {
            let groups = ctx.catalog.greedy_batch_groups(&directory)?;
            let selection = GroupSelection::from_names(tests);
            let report = batch::run_batch(
                &mut ctx.executor(),
                &groups,
                &selection,
                &ctx.batch_options(&directory),
            )?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run-tests",
                    "batch": batch_report_to_json(&report),
                })));
            }
            print_batch_report(&report);
        }
        Commands::Bench {
            tier,
            algorithm,
            time_limit,
            json,
        } => {
            if let Some(limit) = time_limit {
                if !(limit.is_finite() && limit > 0.0) {
                    return Err(anyhow!("time limit must be positive (got {})", limit));
                }
            }
            let group = ctx.catalog.tier_batch_group(
                &tier,
                &algorithm,
                time_limit,
                &ctx.config.output_dir,
            )?;
            let out_dir = group.output_dir.clone();
            let report = batch::run_batch(
                &mut ctx.executor(),
                std::slice::from_ref(&group),
                &GroupSelection::All,
                &ctx.batch_options(&out_dir),
            )?;
            let rows = aggregate::summarize_directory(&out_dir, &group.instances)?;
            let summary = out_dir.join(aggregate::SUMMARY_FILE);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "bench",
                    "batch": batch_report_to_json(&report),
                    "summary": summary.display().to_string(),
                    "rows": rows.len(),
                })));
            }
            print_batch_report(&report);
            println!("summary: {}", summary.display());
            println!("rows: {}", rows.len());
        }
        Commands::Summarize {
            directory,
            tier,
            json,
        } => {
            if !ctx.catalog.has_tier(&tier) {
                return Err(anyhow!("unknown tier '{}'", tier));
            }
            let instances = ctx.catalog.instances(&tier)?;
            let rows = aggregate::summarize_directory(&directory, &instances)?;
            let summary = directory.join(aggregate::SUMMARY_FILE);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "summarize",
                    "summary": summary.display().to_string(),
                    "rows": rows.len(),
                })));
            }
            println!("summary: {}", summary.display());
            println!("rows: {}", rows.len());
        }
        Commands::FilterOptimal {
            algorithm,
            output,
            json,
        } => {
            let options = FilterOptions {
                data_dir: ctx.config.data_dir.clone(),
                manifest: ctx.config.manifest_path(),
                output_manifest: output.clone(),
                algorithm,
                time_limit: ctx.config.filter.time_limit,
                format: ctx.config.filter.format.clone(),
                scratch_dir: ctx.config.scratch_dir.clone(),
                verbosity_level: ctx.config.solver.verbosity_level,
            };
            let report = aggregate::filter_optimal(&mut ctx.executor(), &options)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "filter-optimal",
                    "output": output.display().to_string(),
                    "examined": report.examined,
                    "unsolved": report.unsolved,
                    "open": report.open,
                    "optimal": report.optimal,
                })));
            }
            println!("output: {}", output.display());
            println!("examined: {}", report.examined);
            println!("optimal: {}", report.optimal.len());
            println!("unsolved: {}", report.unsolved);
            println!("open: {}", report.open);
        }
        Commands::Catalog { json } => {
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "catalog",
                    "catalog": catalog_to_json(&ctx.catalog),
                })));
            }
            print_catalog(&ctx.catalog);
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Provision { json, .. }
        | Commands::Generate { json }
        | Commands::RunTests { json, .. }
        | Commands::Bench { json, .. }
        | Commands::Summarize { json, .. }
        | Commands::FilterOptimal { json, .. }
        | Commands::Catalog { json } => *json,
    }
}

fn batch_report_to_json(report: &colorbench_runner::BatchReport) -> Value {
    json!({
        "status": report.state.as_str(),
        "groups": report.groups,
        "invocations": report.invocations,
        "outputs": report
            .runs
            .iter()
            .map(|r| json!({
                "group": r.group,
                "instance": r.instance.path,
                "json": r.json.display().to_string(),
                "certificate": r.certificate.as_ref().map(|c| c.display().to_string()),
            }))
            .collect::<Vec<_>>(),
    })
}

fn print_batch_report(report: &colorbench_runner::BatchReport) {
    println!("status: {}", report.state.as_str());
    println!("groups: {}", report.groups.join(", "));
    println!("invocations: {}", report.invocations);
}

fn catalog_to_json(catalog: &Catalog) -> Value {
    json!({
        "instance_sets": catalog
            .instance_sets
            .iter()
            .map(|(name, set)| (name.clone(), json!({
                "format": set.format,
                "instances": set.instances.len(),
            })))
            .collect::<serde_json::Map<String, Value>>(),
        "greedy_groups": catalog
            .greedy_groups
            .iter()
            .map(|g| json!({
                "name": g.name,
                "instance_set": g.instance_set,
                "algorithm": g.algorithm,
                "ordering": g.ordering,
                "reverse": g.reverse,
            }))
            .collect::<Vec<_>>(),
        "tiers": catalog.tiers,
        "datasets": catalog
            .datasets
            .iter()
            .map(|d| json!({"tag": d.tag, "default": d.default}))
            .collect::<Vec<_>>(),
    })
}

fn print_catalog(catalog: &Catalog) {
    for (name, set) in &catalog.instance_sets {
        println!(
            "instance_set: {} ({} instances, {})",
            name,
            set.instances.len(),
            set.format
        );
    }
    for group in &catalog.greedy_groups {
        println!(
            "greedy_group: {} (ordering={}, reverse={})",
            group.name,
            group.ordering.as_deref().unwrap_or("-"),
            group.reverse
        );
    }
    println!("tiers: {}", catalog.tiers.join(", "));
    for dataset in &catalog.datasets {
        if dataset.default {
            println!("dataset: {} (default)", dataset.tag);
        } else {
            println!("dataset: {}", dataset.tag);
        }
    }
}
