//! routescout CLI - rank network paths and tunnel over the best one.

use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use tokio::signal;
use tokio::sync::broadcast;

use routescout::cli::*;
use routescout::config::{init_logging, Config};
use routescout::error::{Error, Result};
use routescout::util::format_duration;
use routescout::{Engine, RouteId, Status, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    // Flags win over the config file
    let mut log_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        log_config.level.clone_from(level);
    }
    log_config.color &= !cli.no_color;
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.format;
    match cli.command {
        Commands::Routes(args) => {
            if args.no_wifi {
                config.analysis.scan_wifi = false;
            }
            run_routes(&args, &config, format).await
        }
        Commands::Analyze(args) => {
            if let Some(interval) = args.interval {
                config.analysis.interval = interval;
            }
            run_analyze(&args, &config, format).await
        }
        Commands::Connect(args) => run_connect(&args, &config, format).await,
        Commands::Config(args) => run_config(&args, &config),
        Commands::Completions(args) => run_completions(&args),
    }
}

fn banner(title: &str) {
    println!("{}", "╔══════════════════════════════════════════╗".bright_cyan());
    println!("{}", format!("║     {title:<37}║").bright_cyan());
    println!("{}", format!("║     Version {VERSION:<29}║").bright_cyan());
    println!("{}", "╚══════════════════════════════════════════╝".bright_cyan());
    println!();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
    println!("{json}");
    Ok(())
}

/// Discover routes, optionally measuring them once.
async fn run_routes(args: &RoutesArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::system(config);
    let analysis = engine.analysis();

    let found = analysis.refresh_catalog().await;
    if args.measure && found > 0 {
        analysis.run_cycle().await;
    }
    let routes = analysis.ranked();

    if format == OutputFormat::Json {
        return print_json(&routes);
    }

    let heading = if args.measure { "Ranked routes:" } else { "Discovered routes:" };
    println!("{}", heading.bright_white().bold());
    println!("{}", render_routes(&routes));
    Ok(())
}

/// Measure and rank routes until interrupted or `--cycles` is reached.
async fn run_analyze(args: &AnalyzeArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::system(config);
    let mut updates = engine.subscribe();

    if format == OutputFormat::Text {
        banner("ROUTESCOUT ANALYZE");
        println!(
            "{} Probing every {}. Press Ctrl+C to stop.",
            "●".green(),
            format_duration(config.analysis.interval)
        );
        println!();
    }

    engine.start_analysis().await?;

    let mut last_cycle = 0;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!();
                println!("{} Shutting down...", "→".yellow());
                break;
            }
            update = updates.recv() => match update {
                Ok(status) => {
                    let cycle = engine.analysis().cycles_completed();
                    if cycle == last_cycle {
                        continue;
                    }
                    last_cycle = cycle;
                    print_cycle(cycle, &status, format)?;
                    if args.cycles.is_some_and(|limit| cycle >= limit) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn print_cycle(cycle: u64, status: &Status, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(status);
    }
    println!("{} {}", "Cycle".bright_white().bold(), cycle);
    println!("{}", render_routes(&status.ranked_routes));
    println!();
    Ok(())
}

/// Bring the tunnel up and hold it until interrupted.
async fn run_connect(args: &ConnectArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let text = format == OutputFormat::Text;
    if !config.tunnel.is_complete() {
        return Err(Error::InvalidConfig(
            "tunnel needs a private key, an address, a peer public key and a peer endpoint \
             (see `routescout config`)"
                .into(),
        ));
    }

    let engine = Engine::system(config);
    let mut updates = engine.subscribe();

    if text {
        banner("ROUTESCOUT CONNECT");
    }

    if let Some(stale) = engine.recover().await? {
        if text {
            println!(
                "{} Cleaned up tunnel left over from a previous run ({})",
                "⚠".yellow(),
                stale.route_id
            );
        }
    }

    if text {
        println!("{} Measuring routes...", "→".cyan());
    }
    engine.analysis().refresh_catalog().await;
    engine.analysis().run_cycle().await;

    let result = match &args.route {
        Some(id) => engine.connect_route(&RouteId::from(id.as_str())).await,
        None => engine.connect_best().await,
    };
    let route = match result {
        Ok(route) => route,
        Err(e) => {
            if text {
                println!("{} Connection failed: {}", "✗".red(), e);
            }
            engine.shutdown().await;
            return Err(e);
        }
    };

    if text {
        println!(
            "{} Connected via {} {}",
            "✓".green(),
            route.id.to_string().bright_white(),
            format!("(score {:.1})", route.score()).dimmed()
        );
        println!();
        println!("{} Tunnel up. Press Ctrl+C to disconnect.", "●".green());
        println!();
    } else {
        print_json(&engine.status())?;
    }

    if !args.no_watch {
        engine.start_analysis().await?;
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                if text {
                    println!();
                    println!("{} Disconnecting...", "→".yellow());
                }
                break;
            }
            update = updates.recv() => match update {
                Ok(status) if text => {
                    println!("{}", render_status(&status));
                    println!();
                }
                Ok(status) => print_json(&status)?,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    if text {
        println!("{} Tunnel stopped.", "●".yellow());
    }
    Ok(())
}

/// Print the example configuration, or check the loaded one.
fn run_config(args: &ConfigArgs, loaded: &Config) -> Result<()> {
    let config = if args.check {
        loaded.validate()?;
        loaded.clone()
    } else {
        Config::example()
    };

    if let Some(path) = &args.output {
        config.save(path)?;
        println!("{} Configuration written to {}", "✓".green(), path.display());
        return Ok(());
    }

    let output = toml::to_string_pretty(&config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
    if args.check {
        println!("{} Configuration is valid", "✓".green());
        println!();
    }
    println!("{output}");
    Ok(())
}

fn run_completions(args: &CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::generate;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(
        clap_complete::Shell::from(args.shell),
        &mut cmd,
        name,
        &mut std::io::stdout(),
    );
    Ok(())
}
