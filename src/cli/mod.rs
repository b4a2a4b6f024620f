use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;

use crate::aggregate::ScoringOptions;
use crate::config::EffectiveConfig;
use crate::core::{RunMode, RunResult, RunStatus, ScenarioName};
use crate::engine::{Engine, EngineOptions, RunRequest};
use crate::registry::{Registry, Selection};
use crate::scenarios::Scenario;
use crate::sink::{JsonFileSink, Persistable, ReportSink};
use crate::ui::UiConfig;
use crate::workers::CancelToken;

#[derive(Debug, Parser)]
#[command(
    name = "projorch",
    version,
    about = "複数プロジェクトに対してシナリオ（リリース/コンプライアンス/掃除/ドキュメント/ヘルスチェック）を安全に実行する"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,
    #[arg(long, global = true)]
    pub workers: Option<usize>,
    #[arg(long, global = true)]
    pub dry_run: bool,
    #[arg(long = "no-persist", global = true)]
    pub no_persist: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Run(RunArgs),
    Health(HealthArgs),
    Inspect(InspectArgs),
    Scenarios,
    Projects,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    pub scenario: String,
    #[arg(long = "project")]
    pub projects: Vec<String>,
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Debug, Args)]
pub struct HealthArgs {
    #[arg(long = "project")]
    pub projects: Vec<String>,
    #[arg(long)]
    pub markdown: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    #[arg(long = "project")]
    pub projects: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("PROJORCH_CONFIG").map(PathBuf::from);
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;
    apply_cli_overrides(&mut cfg, &cli, &home_dir)?;

    use std::io::IsTerminal;
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui_cfg = UiConfig {
        color: stdout_is_tty && cfg.ui.color && !cli.no_color,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let mode = if cli.dry_run {
        RunMode::DryRun
    } else {
        RunMode::Live
    };

    let engine = Engine::new(EngineOptions {
        timeout: Duration::from_secs(cli.timeout),
        workers: cfg.run.workers,
        exclude: cfg.inspect.exclude.clone(),
        stale_after_days: cfg.scoring.stale_after_days,
        scoring: ScoringOptions {
            issue_fraction_threshold: cfg.scoring.issue_fraction_threshold,
        },
        show_progress: !cli.quiet && !cli.json,
    });
    let sink = JsonFileSink::new(&cfg.report.dir);

    match cli.command {
        Commands::Run(args) => {
            let scenario = args
                .scenario
                .parse::<ScenarioName>()
                .map_err(crate::exit::invalid_args)?;
            let registry = load_registry(&cfg, &home_dir)?;
            let result = engine.run(
                &registry,
                &RunRequest {
                    scenario,
                    selection: Selection::from_ids(args.projects),
                    mode,
                    fail_fast: args.fail_fast,
                },
                &CancelToken::new(),
            )?;

            if cli.json {
                write_json(&result)?;
            } else {
                crate::ui::print_run(&result, &ui_cfg);
            }
            persist(&sink, &cfg, &Persistable::Run(&result), &ui_cfg, cli.json, &home_dir)?;
            finish_run(&result)?;
        }
        Commands::Health(args) => {
            let registry = load_registry(&cfg, &home_dir)?;
            let (run, report) =
                engine.health(&registry, &Selection::from_ids(args.projects), mode)?;

            if cli.json {
                write_json(&report)?;
            } else if args.markdown {
                write_stdout(crate::sink::format_health_markdown(&report).as_bytes())?;
            } else {
                crate::ui::print_health(&report, &ui_cfg);
            }
            persist(&sink, &cfg, &Persistable::Run(&run), &ui_cfg, cli.json, &home_dir)?;
            persist(&sink, &cfg, &Persistable::Health(&report), &ui_cfg, cli.json, &home_dir)?;
        }
        Commands::Inspect(args) => {
            let registry = load_registry(&cfg, &home_dir)?;
            let snapshots = engine.inspect(
                &registry,
                &Selection::from_ids(args.projects),
                &CancelToken::new(),
            )?;
            if cli.json {
                write_json(&snapshots)?;
            } else {
                crate::ui::print_inspect(&snapshots, &ui_cfg);
            }
        }
        Commands::Scenarios => {
            if cli.json {
                write_json(&scenario_catalog())?;
            } else {
                crate::ui::print_scenarios(&ui_cfg);
            }
        }
        Commands::Projects => {
            let registry = load_registry(&cfg, &home_dir)?;
            if cli.json {
                write_json(registry.projects())?;
            } else {
                crate::ui::print_projects(registry.projects(), &ui_cfg);
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "projorch", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `projorch config --show` を使用してください");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default = if verbose {
        "projorch=debug"
    } else {
        "projorch=warn"
    };
    let filter =
        EnvFilter::try_from_env("PROJORCH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

fn apply_cli_overrides(cfg: &mut EffectiveConfig, cli: &Cli, home_dir: &Path) -> Result<()> {
    if let Some(path) = &cli.registry {
        cfg.registry.path = crate::platform::expand_tilde(&path.to_string_lossy(), home_dir);
    }
    if let Some(workers) = cli.workers {
        if workers == 0 {
            return Err(crate::exit::invalid_args(
                "--workers は 1 以上で指定してください",
            ));
        }
        cfg.run.workers = workers;
    }
    if cli.timeout == 0 {
        return Err(crate::exit::invalid_args(
            "--timeout は 1 以上（秒）で指定してください",
        ));
    }
    if cli.no_persist {
        cfg.report.persist = false;
    }
    Ok(())
}

fn load_registry(cfg: &EffectiveConfig, home_dir: &Path) -> Result<Registry> {
    Registry::load(&cfg.registry.path, home_dir).map_err(crate::exit::invalid_args_err)
}

fn persist(
    sink: &JsonFileSink,
    cfg: &EffectiveConfig,
    doc: &Persistable<'_>,
    ui_cfg: &UiConfig,
    json: bool,
    home_dir: &Path,
) -> Result<()> {
    if !cfg.report.persist {
        return Ok(());
    }
    let path = sink.persist(doc).map_err(crate::exit::persist_err)?;
    if !json && !ui_cfg.quiet {
        eprintln!(
            "レポート: {}",
            crate::platform::mask_home(&path, home_dir)
        );
    }
    Ok(())
}

fn finish_run(result: &RunResult) -> Result<()> {
    match result.status {
        RunStatus::Succeeded | RunStatus::RolledBack => Ok(()),
        status => Err(crate::exit::run_status(
            status,
            format!(
                "シナリオ {} は {} で終了しました（run_id={}）",
                result.scenario,
                status.as_str(),
                result.run_id
            ),
        )),
    }
}

#[derive(Debug, Serialize)]
struct ScenarioInfo {
    name: ScenarioName,
    slug: &'static str,
    applies_to: Vec<crate::core::ProjectType>,
    steps: Vec<StepInfo>,
}

#[derive(Debug, Serialize)]
struct StepInfo {
    name: String,
    capability: &'static str,
}

fn scenario_catalog() -> Vec<ScenarioInfo> {
    ScenarioName::ALL
        .into_iter()
        .map(|name| {
            let scenario = Scenario::builtin(name);
            ScenarioInfo {
                name,
                slug: name.slug(),
                applies_to: scenario.applicable_types(),
                steps: scenario
                    .steps
                    .iter()
                    .map(|s| StepInfo {
                        name: s.name.clone(),
                        capability: s.capability.as_str(),
                    })
                    .collect(),
            }
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut buf = serde_json::to_vec_pretty(value)?;
    buf.push(b'\n');
    write_stdout(&buf)
}

fn write_stdout(buf: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_projects_and_global_flags() {
        let cli = Cli::try_parse_from([
            "projorch",
            "run",
            "cleanup",
            "--project",
            "A",
            "--project",
            "B",
            "--dry-run",
            "--fail-fast",
            "--json",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert!(cli.json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.scenario, "cleanup");
        assert_eq!(args.projects, ["A", "B"]);
        assert!(args.fail_fast);
    }

    #[test]
    fn zero_workers_flag_is_rejected() {
        let cli = Cli::try_parse_from(["projorch", "--workers", "0", "projects"]).unwrap();
        let mut cfg = EffectiveConfig::defaults(Path::new("/home/test"));
        let err = apply_cli_overrides(&mut cfg, &cli, Path::new("/home/test")).unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn registry_flag_overrides_config() {
        let cli = Cli::try_parse_from(["projorch", "--registry", "~/r.json", "projects"]).unwrap();
        let mut cfg = EffectiveConfig::defaults(Path::new("/home/test"));
        apply_cli_overrides(&mut cfg, &cli, Path::new("/home/test")).unwrap();
        assert_eq!(cfg.registry.path, PathBuf::from("/home/test/r.json"));
    }

    #[test]
    fn catalog_lists_every_scenario() {
        let catalog = scenario_catalog();
        assert_eq!(catalog.len(), ScenarioName::ALL.len());
        let cleanup = catalog.iter().find(|s| s.slug == "cleanup").unwrap();
        assert_eq!(cleanup.steps[1].capability, "mutate");
    }

    #[test]
    fn parse_shell_rejects_unknown() {
        assert!(parse_shell("bash").is_ok());
        let err = parse_shell("tcsh").unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);
    }
}
