//! Plugster CLI - runs the bot host over a unit root.
//!
//! This is the main binary entry point. See the `plugster` library for the
//! reload runtime.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use plugster::console::ConsoleProvider;
use plugster::host::dispatch::describe;
use plugster::{Bot, ConfigSource, ConnectionProvider, QueueProvider, ReloadCoordinator};

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: LazyLock<Arc<AtomicBool>> =
    LazyLock::new(|| Arc::new(AtomicBool::new(false)));

// CLI
#[derive(Parser)]
#[command(name = "plugster")]
#[command(version)]
#[command(about = "Chat bot host with hot-reloadable Lua plugins")]
struct Cli {
    /// Directory holding `core/`, the plugin directory and the config
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/config.json`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Feed stdin into the first connection and print replies to stdout
    #[arg(long)]
    console: bool,

    /// Longest wait for new input between reload passes, in milliseconds
    #[arg(long, default_value_t = 100)]
    idle_ms: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("ERROR: {e:?}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Unit root not found: {}", cli.root.display()))?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| ConfigSource::find(&root));

    let provider: Arc<dyn ConnectionProvider> = if cli.console {
        Arc::new(ConsoleProvider::new())
    } else {
        Arc::new(QueueProvider)
    };

    log::info!("Loading plugins from {}", root.display());
    let mut coordinator = ReloadCoordinator::new(&root);
    let bot = Bot::new(provider).with_config_source(ConfigSource::new(config_path));
    let mut bot = coordinator.reload(bot, true)?;

    bot.configure().context("malformed config file")?;

    log::info!("Running main loop");
    let idle = Duration::from_millis(cli.idle_ms);

    while !SHUTDOWN_FLAG.load(Ordering::Relaxed) {
        bot = coordinator.reload(bot, false)?;

        if let Err(e) = bot.configure() {
            log::error!("Config not reloaded: {e:#}");
        }

        bot.dispatch_once();

        for (conn, response) in bot.drain_outbound() {
            if cli.console {
                println!("{}", describe(&conn, &response));
            } else {
                log::info!("{}", describe(&conn, &response));
            }
        }

        bot.wait_for_drain(idle);
    }

    log::info!("Shutting down");
    bot.shutdown();
    Ok(())
}
