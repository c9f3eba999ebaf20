use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use parity_harness::config::HarnessConfig;
use parity_harness::runner::{self, RunOptions};
use parity_harness::{logging, report, TeardownOptions};
use parity_synth::{RouteFilter, ScenarioFilter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration (built-in defaults otherwise)")
}

fn route_arg() -> Arg {
    Arg::new("route")
        .long("route")
        .help("Only routes whose key equals `METHOD /path` or whose path contains this")
}

fn scenario_arg() -> Arg {
    Arg::new("scenario")
        .long("scenario")
        .help("Only scenarios with this name, or under `prefix.*`")
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

fn cli() -> Command {
    Command::new("parity")
        .version(parity_harness::VERSION)
        .about("Differential conformance harness for a legacy API and its rewrite")
        .subcommand_required(true)
        .arg(flag("log-json", "Emit logs as JSON lines").global(true))
        .subcommand(
            Command::new("run")
                .about("Compare both servers scenario by scenario")
                .arg(
                    Arg::new("reference")
                        .long("reference")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Source tree routes are extracted from"),
                )
                .arg(
                    Arg::new("legacy-dir")
                        .long("legacy-dir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Working directory of the legacy server"),
                )
                .arg(
                    Arg::new("candidate-dir")
                        .long("candidate-dir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Working directory of the candidate server"),
                )
                .arg(config_arg())
                .arg(Arg::new("template").long("template").help("Template database name"))
                .arg(
                    Arg::new("admin-url")
                        .long("admin-url")
                        .env("PARITY_ADMIN_URL")
                        .help("Maintenance connection URL of the database server"),
                )
                .arg(route_arg())
                .arg(scenario_arg())
                .arg(flag("keep-databases", "Leave scratch databases behind"))
                .arg(flag("keep-logs", "Keep server logs after a successful run"))
                .arg(flag("drop-template", "Drop the template database at teardown"))
                .arg(flag("verbose", "Embed requests and responses in mismatch records"))
                .arg(flag("reseed", "Seed resources again before every route"))
                .arg(flag("progress", "Print one line per scenario to stderr"))
                .arg(flag("fail-on-mismatch", "Exit with status 1 when any mismatch is found"))
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Report directory"),
                ),
        )
        .subcommand(
            Command::new("routes")
                .about("Print extracted route descriptors as JSON")
                .arg(
                    Arg::new("source")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("scenarios")
                .about("Print the scenario matrix without launching servers")
                .arg(
                    Arg::new("source")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(config_arg())
                .arg(route_arg())
                .arg(scenario_arg()),
        )
}

fn load_config(args: &ArgMatches) -> anyhow::Result<HarnessConfig> {
    let path = args.get_one::<PathBuf>("config").map(PathBuf::as_path);
    HarnessConfig::load_or_builtin(path).context("loading configuration")
}

fn filters(args: &ArgMatches) -> (Option<RouteFilter>, Option<ScenarioFilter>) {
    (
        args.get_one::<String>("route").map(RouteFilter::new),
        args.get_one::<String>("scenario").map(|s| ScenarioFilter::new(s)),
    )
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let mut config = load_config(args)?;
    if let (Some(legacy), Some(candidate)) = (
        args.get_one::<PathBuf>("legacy-dir"),
        args.get_one::<PathBuf>("candidate-dir"),
    ) {
        config = config.with_server_dirs(legacy, candidate);
    } else if let Some(dir) = args.get_one::<PathBuf>("legacy-dir") {
        config.servers.legacy.working_dir.clone_from(dir);
    } else if let Some(dir) = args.get_one::<PathBuf>("candidate-dir") {
        config.servers.candidate.working_dir.clone_from(dir);
    }
    if let Some(template) = args.get_one::<String>("template") {
        config = config.with_template(template);
    }
    if let Some(url) = args.get_one::<String>("admin-url") {
        config = config.with_admin_url(url);
    }
    if let Some(out) = args.get_one::<PathBuf>("out") {
        config = config.with_report_dir(out);
    }
    config.validate().context("invalid configuration")?;

    let (route_filter, scenario_filter) = filters(args);
    let options = RunOptions {
        reference: args
            .get_one::<PathBuf>("reference")
            .cloned()
            .unwrap_or_default(),
        route_filter,
        scenario_filter,
        verbose: args.get_flag("verbose"),
        reseed: args.get_flag("reseed"),
        progress: args.get_flag("progress"),
        teardown: TeardownOptions {
            keep_databases: args.get_flag("keep-databases"),
            keep_logs: args.get_flag("keep-logs"),
            drop_template: args.get_flag("drop-template"),
        },
    };

    let report = runner::run(&config, &options).await.context("run aborted")?;
    let path = report::write(&report, &config.output.report_dir)?;
    print!("{}", report::summary(&report, Some(&path)));

    if args.get_flag("fail-on-mismatch") && !report.is_clean() {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn routes(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = load_config(args)?;
    let source = args.get_one::<PathBuf>("source").map_or(Path::new("."), PathBuf::as_path);
    let extraction = runner::extract(&config, source)?;
    let descriptors: Vec<_> = extraction
        .routes
        .iter()
        .map(parity_synth::sample::describe)
        .collect();
    print_json(&descriptors)?;
    Ok(ExitCode::SUCCESS)
}

fn scenarios(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = load_config(args)?;
    let (route_filter, scenario_filter) = filters(args);
    let options = RunOptions {
        reference: args.get_one::<PathBuf>("source").cloned().unwrap_or_default(),
        route_filter,
        scenario_filter,
        ..RunOptions::default()
    };
    print_json(&runner::offline_plans(&config, &options)?)?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("log-json"));

    let outcome = match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("routes", args)) => routes(args),
        Some(("scenarios", args)) => scenarios(args),
        _ => unreachable!("subcommand_required"),
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
