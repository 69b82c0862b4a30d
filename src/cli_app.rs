//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use pvc_watch::core::config::{Config, WatchMode};
use pvc_watch::core::errors::PvcwError;
use pvc_watch::daemon::loop_main::{
    DaemonArgs, RunSummary, WatchDaemon, collect_report, render_report,
};
use pvc_watch::source::ClaimSource;
use pvc_watch::source::kubectl::KubectlSource;
use pvc_watch::source::replay::ReplaySource;

/// pvcwatch: PersistentVolumeClaim capacity watcher.
#[derive(Debug, Parser)]
#[command(
    name = "pvcwatch",
    author,
    version,
    about = "Tracks total PVC storage claims and acts when a ceiling is crossed",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Watch claims and fire the threshold action on every crossing.
    Watch(WatchArgs),
    /// List claims once, print the table, and exit.
    List(ListArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    /// Show version and build details.
    Version(VersionArgs),
}

/// Flags that select which claims are counted and against what ceiling.
#[derive(Debug, Clone, Args, Default)]
struct ClusterArgs {
    /// Only count claims in this namespace.
    #[arg(short = 'n', long, value_name = "NAMESPACE", conflicts_with = "all_namespaces")]
    namespace: Option<String>,
    /// Count claims in every namespace.
    #[arg(short = 'A', long)]
    all_namespaces: bool,
    /// Label selector passed through to the cluster.
    #[arg(short = 'l', long, value_name = "SELECTOR")]
    selector: Option<String>,
    /// Field selector passed through to the cluster.
    #[arg(short = 'f', long, value_name = "SELECTOR")]
    field_selector: Option<String>,
    /// kubeconfig file for kubectl.
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<String>,
    /// kubeconfig context for kubectl.
    #[arg(long, value_name = "NAME")]
    context: Option<String>,
    /// Claim ceiling as a Kubernetes quantity (e.g. 200Gi).
    #[arg(long, value_name = "QUANTITY")]
    max_claims: Option<String>,
    /// kubectl binary to run.
    #[arg(long, value_name = "PATH")]
    kubectl: Option<String>,
    /// Read the claim listing from a recorded `kubectl get pvc -o json` file.
    #[arg(long, value_name = "PATH")]
    replay_list: Option<PathBuf>,
    /// Replay recorded `--watch --output-watch-events -o json` output.
    #[arg(long, value_name = "PATH", requires = "replay_list")]
    replay_events: Option<PathBuf>,
}

impl ClusterArgs {
    fn apply(&self, config: &mut Config) {
        if self.all_namespaces {
            config.watch.namespace.clear();
        }
        for (flag, slot) in [
            (&self.namespace, &mut config.watch.namespace),
            (&self.selector, &mut config.watch.label_selector),
            (&self.field_selector, &mut config.watch.field_selector),
            (&self.kubeconfig, &mut config.watch.kubeconfig),
            (&self.context, &mut config.watch.context),
            (&self.max_claims, &mut config.threshold.max_claims),
            (&self.kubectl, &mut config.watch.kubectl_path),
        ] {
            if let Some(value) = flag {
                *slot = value.trim().to_string();
            }
        }
        // A recording has an end; reconnecting would relist forever.
        if self.replay_list.is_some() {
            config.watch.reconnect = false;
        }
    }

    fn source(&self, config: &Config) -> Result<Box<dyn ClaimSource>, CliError> {
        match &self.replay_list {
            Some(list) => {
                let replay = ReplaySource::from_files(list, self.replay_events.as_deref())
                    .map_err(|e| CliError::User(format!("cannot load replay: {e}")))?;
                Ok(Box::new(replay))
            }
            None => Ok(Box::new(KubectlSource::from_config(&config.watch))),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct WatchArgs {
    #[command(flatten)]
    cluster: ClusterArgs,
    /// Watch adapter: raw stream or cache-backed informer.
    #[arg(long, value_name = "MODE")]
    mode: Option<WatchMode>,
    /// Informer resync interval in milliseconds.
    #[arg(long, value_name = "MS")]
    resync_ms: Option<u64>,
    /// Print the claim table every N seconds (0 disables).
    #[arg(long, value_name = "SECS")]
    report_secs: Option<u64>,
    /// Skip the claim table after the initial listing.
    #[arg(long)]
    no_initial_report: bool,
}

impl WatchArgs {
    fn apply(&self, config: &mut Config) {
        self.cluster.apply(config);
        if let Some(mode) = self.mode {
            config.watch.mode = mode;
        }
        if let Some(ms) = self.resync_ms {
            config.watch.resync_interval_ms = ms;
        }
        if let Some(secs) = self.report_secs {
            config.report.interval_secs = secs;
        }
        if self.no_initial_report {
            config.report.initial = false;
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    #[command(flatten)]
    cluster: ClusterArgs,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include build metadata.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input: flags, config, replay files.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<PvcwError> for CliError {
    fn from(error: PvcwError) -> Self {
        if matches!(
            error,
            PvcwError::InvalidConfig { .. }
                | PvcwError::MissingConfig { .. }
                | PvcwError::ConfigParse { .. }
                | PvcwError::InvalidQuantity { .. }
        ) {
            Self::User(error.to_string())
        } else {
            Self::Runtime(error.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Watch(args) => run_watch(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// File, then env, then flags; validated once everything is applied.
fn resolve_config(cli: &Cli, apply: impl FnOnce(&mut Config)) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())
        .map_err(|e| CliError::User(format!("invalid config: {e}")))?;
    apply(&mut config);
    config
        .validate()
        .map_err(|e| CliError::User(format!("invalid config: {e}")))?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// watch / list
// ---------------------------------------------------------------------------

fn run_watch(cli: &Cli, args: &WatchArgs) -> Result<(), CliError> {
    let config = resolve_config(cli, |config| args.apply(config))?;
    let source = args.cluster.source(&config)?;
    let daemon_args = DaemonArgs {
        json_reports: output_mode(cli) == OutputMode::Json,
        handle_signals: true,
    };
    let summary = WatchDaemon::init(config, source, &daemon_args)?.run()?;

    emit(
        cli,
        || Ok(json!({ "command": "watch", "summary": serde_json::to_value(&summary)? })),
        || {
            print_summary(&summary);
            Ok(())
        },
    )
}

fn print_summary(summary: &RunSummary) {
    let state = if summary.over_ceiling {
        "over ceiling".red().bold()
    } else {
        "within ceiling".green()
    };
    println!(
        "{} {} claimed across {} claim(s), ceiling {} ({state})",
        "Stopped:".bold(),
        summary.final_total,
        summary.claims,
        summary.ceiling
    );
    println!(
        "  events: {} applied, {} unchanged, {} rejected",
        summary.events_applied, summary.events_unchanged, summary.events_rejected
    );
    println!(
        "  crossings: {}  resyncs: {}  faults: {}  inconsistencies: {}",
        summary.transitions, summary.resyncs, summary.faults, summary.inconsistencies
    );
    println!(
        "  reason: {}  uptime: {}s",
        summary.stop_reason, summary.uptime_secs
    );
}

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let config = resolve_config(cli, |config| args.cluster.apply(config))?;
    let ceiling = config.ceiling()?;
    let mut source = args.cluster.source(&config)?;
    let report = collect_report(&mut *source, ceiling)?;

    let json = output_mode(cli) == OutputMode::Json;
    let text = render_report(&report, json)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !json && report.over_ceiling {
        writeln!(stdout, "{}", "Claims exceed the ceiling".red().bold())?;
    }
    stdout.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command.as_ref().unwrap_or(&ConfigCommand::Path) {
        ConfigCommand::Path => show_config_path(cli),
        ConfigCommand::Show => show_config(cli),
        ConfigCommand::Validate => validate_config(cli),
    }
}

fn show_config_path(cli: &Cli) -> Result<(), CliError> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let exists = path.exists();
    emit(
        cli,
        || Ok(json!({ "command": "config path", "path": path.to_string_lossy(), "exists": exists })),
        || {
            println!("{}", path.display());
            if !exists {
                println!("  (no such file, built-in defaults apply)");
            }
            Ok(())
        },
    )
}

fn show_config(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    emit(
        cli,
        || Ok(json!({ "command": "config show", "config": serde_json::to_value(&config)? })),
        || {
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| CliError::Runtime(format!("cannot render config as TOML: {e}")))?;
            println!("{rendered}");
            Ok(())
        },
    )
}

/// Exits 1 when the file does not load, after reporting why.
fn validate_config(cli: &Cli) -> Result<(), CliError> {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            emit(
                cli,
                || {
                    Ok(json!({
                        "command": "config validate",
                        "valid": false,
                        "code": e.code(),
                        "error": e.to_string(),
                    }))
                },
                || {
                    eprintln!("{} {e}", "Configuration is INVALID:".red().bold());
                    Ok(())
                },
            )?;
            return Err(CliError::User(format!("invalid config: {e}")));
        }
    };

    let ceiling = config.ceiling()?;
    let hash = config.stable_hash()?;
    let source = &config.config_file;
    emit(
        cli,
        || {
            Ok(json!({
                "command": "config validate",
                "valid": true,
                "path": source.to_string_lossy(),
                "ceiling": ceiling.to_string(),
                "hash": hash,
            }))
        },
        || {
            println!("{} {}", "Configuration is valid:".green(), source.display());
            println!("  ceiling {ceiling}, hash {hash}");
            Ok(())
        },
    )
}

// ---------------------------------------------------------------------------
// version / output helpers
// ---------------------------------------------------------------------------

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let build = [
        ("package", env!("CARGO_PKG_NAME")),
        ("target", option_env!("TARGET").unwrap_or("unknown")),
        ("profile", option_env!("PROFILE").unwrap_or("unknown")),
        ("git_sha", option_env!("GIT_SHA").unwrap_or("unknown")),
    ];
    let version = env!("CARGO_PKG_VERSION");
    emit(
        cli,
        || {
            let details: serde_json::Map<String, Value> = build[1..]
                .iter()
                .map(|(key, value)| ((*key).to_string(), Value::from(*value)))
                .collect();
            Ok(json!({
                "binary": "pvcwatch",
                "version": version,
                "package": build[0].1,
                "build": details,
            }))
        },
        || {
            println!("pvcwatch {version}");
            if args.verbose {
                for (key, value) in build {
                    println!("{key}: {value}");
                }
            }
            Ok(())
        },
    )
}

/// Write `json()` as a single stdout line, or run `human` on a terminal.
fn emit(
    cli: &Cli,
    json: impl FnOnce() -> Result<Value, CliError>,
    human: impl FnOnce() -> Result<(), CliError>,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => human(),
        OutputMode::Json => write_json_line(&json()?),
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut line = serde_json::to_vec(payload)?;
    line.push(b'\n');
    let mut stdout = io::stdout().lock();
    stdout.write_all(&line)?;
    stdout.flush()?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("PVCW_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

/// `--json` wins, then `PVCW_OUTPUT_FORMAT`, then whether stdout is a TTY.
fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    let from_env = env_mode.map(|mode| mode.trim().to_ascii_lowercase());
    match (json_flag, from_env.as_deref()) {
        (true, _) | (false, Some("json")) => OutputMode::Json,
        (false, Some("human")) => OutputMode::Human,
        _ if stdout_is_tty => OutputMode::Human,
        _ => OutputMode::Json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "pvcwatch",
            "--config",
            "/tmp/pvcwatch.toml",
            "--json",
            "--no-color",
            "list",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["pvcwatch", "list", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_subcommands() {
        let cases = [
            vec!["pvcwatch", "watch", "-n", "apps", "--max-claims", "10Gi"],
            vec!["pvcwatch", "watch", "-A", "-l", "tier=db", "--mode", "informer"],
            vec!["pvcwatch", "watch", "--resync-ms", "500", "--report-secs", "30"],
            vec!["pvcwatch", "watch", "--replay-list", "l.json", "--replay-events", "e.json"],
            vec!["pvcwatch", "list", "-f", "status.phase=Bound", "--context", "prod"],
            vec!["pvcwatch", "config", "path"],
            vec!["pvcwatch", "config", "show"],
            vec!["pvcwatch", "config", "validate"],
            vec!["pvcwatch", "version", "--verbose"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn namespace_conflicts_with_all_namespaces() {
        assert!(Cli::try_parse_from(["pvcwatch", "list", "-n", "a", "-A"]).is_err());
    }

    #[test]
    fn replay_events_require_replay_list() {
        assert!(Cli::try_parse_from(["pvcwatch", "watch", "--replay-events", "e.json"]).is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["pvcwatch", "watch", "--mode", "poll"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["pvcwatch", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn flags_override_config() {
        let Ok(Cli {
            command: Command::Watch(args),
            ..
        }) = Cli::try_parse_from([
            "pvcwatch",
            "watch",
            "-n",
            " apps ",
            "--max-claims",
            "5Gi",
            "--mode",
            "informer",
            "--resync-ms",
            "750",
            "--no-initial-report",
            "--replay-list",
            "list.json",
        ])
        else {
            panic!("watch args should parse");
        };

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.watch.namespace, "apps");
        assert_eq!(config.threshold.max_claims, "5Gi");
        assert_eq!(config.watch.mode, WatchMode::Informer);
        assert_eq!(config.watch.resync_interval_ms, 750);
        assert!(!config.report.initial);
        assert!(!config.watch.reconnect);
    }

    #[test]
    fn all_namespaces_clears_configured_namespace() {
        let mut config = Config::default();
        config.watch.namespace = "apps".to_string();
        let args = ClusterArgs {
            all_namespaces: true,
            ..ClusterArgs::default()
        };
        args.apply(&mut config);
        assert!(config.watch.namespace.is_empty());
        assert!(config.watch.reconnect);
    }

    #[test]
    fn engine_errors_map_to_exit_codes() {
        let user: CliError = PvcwError::invalid_quantity("lots", "bad").into();
        assert_eq!(user.exit_code(), 1);
        let timeout: CliError = PvcwError::CacheSyncTimeout { waited_ms: 10 }.into();
        assert_eq!(timeout.exit_code(), 2);
        let runtime: CliError = PvcwError::transport("kubectl", "gone").into();
        assert_eq!(runtime.exit_code(), 2);
    }

    #[test]
    fn output_mode_resolution() {
        assert_eq!(resolve_output_mode(true, None, true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some(" JSON "), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
    }
}
