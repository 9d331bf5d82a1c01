//! Command line interface for routescout.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::{ColoredString, Colorize};

use crate::metrics::grade;
use crate::types::{Route, RouteKind, Status};

/// routescout - pick the best network path and tunnel over it
#[derive(Parser, Debug)]
#[command(
    name = "routescout",
    author,
    version,
    about = "Rank the host's network paths and bring a WireGuard tunnel up over the best one",
    long_about = r#"
routescout discovers every candidate network path on this host:

  - up, non-loopback network interfaces
  - visible wireless networks
  - configured default-gateway routes

It measures latency, throughput and stability of each path, ranks them
by a weighted score and can bring a WireGuard tunnel up over the winner.

QUICK START:
  List paths:      routescout routes --measure
  Watch ranking:   routescout analyze
  Tunnel:          routescout connect
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ROUTESCOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover candidate routes
    Routes(RoutesArgs),

    /// Continuously measure and rank routes
    Analyze(AnalyzeArgs),

    /// Tunnel over the best (or a chosen) route until interrupted
    Connect(ConnectArgs),

    /// Print or check configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Routes command arguments
#[derive(Args, Debug)]
pub struct RoutesArgs {
    /// Measure every route once and rank them
    #[arg(short, long)]
    pub measure: bool,

    /// Skip the wireless scan
    #[arg(long)]
    pub no_wifi: bool,
}

/// Analyze command arguments
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Stop after this many cycles
    #[arg(short = 'n', long)]
    pub cycles: Option<u64>,

    /// Override the probe interval (e.g. "10s")
    #[arg(short, long, value_parser = humantime_serde::re::humantime::parse_duration)]
    pub interval: Option<Duration>,
}

/// Connect command arguments
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Route id to use instead of the best one (see `routescout routes`)
    #[arg(short, long)]
    pub route: Option<String>,

    /// Do not keep measuring routes while connected
    #[arg(long)]
    pub no_watch: bool,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Validate the loaded configuration and print it
    #[arg(long)]
    pub check: bool,

    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Completions command arguments
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Shell for completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

impl From<Shell> for clap_complete::Shell {
    fn from(shell: Shell) -> Self {
        match shell {
            Shell::Bash => Self::Bash,
            Shell::Zsh => Self::Zsh,
            Shell::Fish => Self::Fish,
            Shell::PowerShell => Self::PowerShell,
        }
    }
}

/// Color a score by its grade.
pub fn colored_score(score: f64) -> ColoredString {
    let text = format!("{score:5.1}");
    match grade(score) {
        "excellent" | "good" => text.green(),
        "fair" => text.yellow(),
        _ => text.red(),
    }
}

fn kind_icon(kind: RouteKind) -> &'static str {
    match kind {
        RouteKind::PhysicalInterface => "⇄",
        RouteKind::Wifi => "≋",
        RouteKind::GatewayRoute => "→",
    }
}

/// One line of the route table.
pub fn route_line(rank: usize, route: &Route) -> String {
    let metrics = route
        .metrics
        .as_ref()
        .map_or_else(|| "not measured".dimmed().to_string(), |m| m.summary());

    format!(
        "  {:>2}. {} {} {} {}\n      {}",
        rank,
        kind_icon(route.kind),
        colored_score(route.score()),
        route.id.to_string().bright_white(),
        format!("({})", route.name).dimmed(),
        metrics
    )
}

/// Render a ranked route table.
pub fn render_routes(routes: &[Route]) -> String {
    if routes.is_empty() {
        return format!("  {} No routes found", "○".dimmed());
    }
    routes
        .iter()
        .enumerate()
        .map(|(i, route)| route_line(i + 1, route))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a status snapshot.
pub fn render_status(status: &Status) -> String {
    let state = match status.state.as_str() {
        "connected" => status.state.green(),
        "connecting" | "disconnecting" => status.state.yellow(),
        _ => status.state.red(),
    };

    let mut out = format!("{} {}", "State:".bright_white(), state);
    if let Some(route) = &status.active_route {
        out.push_str(&format!(" via {}", route.id.to_string().bright_white()));
    }
    let analysis = if status.analysis_running {
        "running".green()
    } else {
        "stopped".dimmed()
    };
    out.push_str(&format!("\n{} {}\n", "Analysis:".bright_white(), analysis));
    out.push_str(&render_routes(&status.ranked_routes));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSample;
    use crate::types::{ConnectionState, RouteId};
    use clap::CommandFactory;

    fn route() -> Route {
        let mut route = Route::new(
            RouteId::interface("eth0"),
            "eth0 (ethernet)",
            RouteKind::PhysicalInterface,
            "10.0.0.1".parse().unwrap(),
            Some("eth0".into()),
        );
        route.record(MetricsSample::measured(Some(10.0), 500.0, 0.95, 0.0, 1.0));
        route
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_connect() {
        let cli = Cli::parse_from(["routescout", "--format", "json", "connect", "--route", "iface:eth0"]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Connect(args) => assert_eq!(args.route.as_deref(), Some("iface:eth0")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_analyze_interval() {
        let cli = Cli::parse_from(["routescout", "analyze", "-n", "3", "--interval", "2s"]);
        match cli.command {
            Commands::Analyze(args) => {
                assert_eq!(args.cycles, Some(3));
                assert_eq!(args.interval, Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_render_routes() {
        colored::control::set_override(false);
        let rendered = render_routes(&[route()]);
        assert!(rendered.contains(" 1. ⇄  75.0 iface:eth0 (eth0 (ethernet))"));
        assert!(render_routes(&[]).contains("No routes found"));
    }

    #[test]
    fn test_render_status() {
        colored::control::set_override(false);
        let state = ConnectionState::Connected { route: route() };
        let rendered = render_status(&Status::new(&state, vec![route()], true));
        assert!(rendered.starts_with("State: connected via iface:eth0"));
        assert!(rendered.contains("Analysis: running"));
    }
}
