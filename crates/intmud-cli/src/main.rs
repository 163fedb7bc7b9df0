//! Thin command-line front end: argument parsing, logging, load, run.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use intmud::{Config, Scheduler};
use log::error;

/// IntMUD interpreter.
#[derive(Debug, Parser)]
#[command(name = "intmud", version, about)]
struct Args {
    /// Directory with the project file and sources.
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Load a single source file instead of the project's include list.
    #[arg(long)]
    principal: Option<String>,

    /// Server port (0 disables the server layer).
    #[arg(long, default_value_t = 0)]
    porta: u16,

    /// Bind address for the server layer.
    #[arg(long, default_value = "127.0.0.1")]
    ender: String,

    /// Scheduler tick interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    tick: u64,

    /// Maximum budget-resume cycles worked through per tick.
    #[arg(long, default_value_t = 10)]
    ciclos: u32,

    /// Reload sources when they change (driven by an external watcher).
    #[arg(long)]
    recarregar: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config {
        source_dir: args.dir.clone(),
        main_file: args.principal,
        port: args.porta,
        bind_addr: args.ender,
        tick_ms: args.tick,
        max_cycles_per_tick: args.ciclos,
        hot_reload: args.recarregar,
        ..Config::default()
    };

    let (mut world, diags) = intmud::load(config)
        .with_context(|| format!("loading {}", args.dir.display()))?;
    for err in &diags.parse_errors {
        error!("{err}");
    }
    for err in &diags.compile_errors {
        error!("{err}");
    }

    if world.terminate {
        // the program finished during inicializar (batch scripts)
        world.sink.flush();
        return Ok(());
    }

    let mut scheduler = Scheduler::new();
    scheduler.run(&mut world);
    Ok(())
}
