//! Dedicated voxelsync server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{info, warn};
use tracing_subscriber::EnvFilter;
use voxelsync_network::{NetworkCoordinator, NetworkMode, TcpTransport};
use voxelsync_runtime::{
    EngineConfig, GameState, IngameContext, IngameState, Module, ModuleManager,
    StaticModuleManager, open_storage,
};
use voxelsync_storage::{ComponentDef, EventDef};

/// Command line. Flags override the configuration file.
#[derive(Parser, Debug)]
#[command(name = "voxelsync-server", version, about = "Headless voxelsync authority")]
struct Args {
    /// Configuration file (TOML).
    #[arg(short, long, env = "VOXELSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address.
    #[arg(short, long)]
    bind: Option<String>,

    /// World directory name under the save root.
    #[arg(short, long)]
    world: Option<String>,

    /// Terrain seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Directory holding saved worlds.
    #[arg(long)]
    save_root: Option<PathBuf>,

    /// Message shown to joining players.
    #[arg(long)]
    motd: Option<String>,

    /// Simulation ticks per second.
    #[arg(long, default_value_t = 20)]
    tick_rate: u32,

    /// Stop after this many ticks.
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Run without saving or loading.
    #[arg(long)]
    no_storage: bool,
}

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxelsync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError: {e}\x1b[0m");
            ExitCode::FAILURE
        }
    }
}

fn core_module() -> Module {
    Module::new("core")
        .with_component(ComponentDef::new("position"))
        .with_component(ComponentDef::new("health"))
        .with_component(ComponentDef::new("name"))
        .with_component(ComponentDef::new("input").local_only())
        .with_event(EventDef::new("chat").replicable().server_event())
}

fn configure(args: &Args) -> voxelsync_foundation::Result<EngineConfig> {
    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(bind) = &args.bind {
        config = config.with_bind(bind.clone());
    }
    if let Some(world) = &args.world {
        let title = config.world.title.clone();
        config = config.with_world(world.clone(), title);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(root) = &args.save_root {
        config = config.with_save_root(root.clone());
    }
    if let Some(motd) = &args.motd {
        config = config.with_motd(motd.clone());
    }
    if args.no_storage {
        config = config.with_storage_enabled(false);
    }
    Ok(config)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = configure(&args)?;

    let mut modules = StaticModuleManager::new().with_module(core_module());
    let environment = modules.load_environment(&["core".to_string()], true)?;
    let position = environment.components().resolve("position")?;

    let listener = TcpTransport::bind(config.network.bind.as_str())?;
    let network = NetworkCoordinator::host(config.network_config(position), Box::new(listener));
    let storage = open_storage(&config, NetworkMode::Server)?;

    let mut ctx = IngameContext::headless(config, Box::new(modules), network, storage)?;
    let restored = ctx.restore_world()?;
    info!("{restored} entities restored");

    let mut state = IngameState::new(ctx);
    state.init()?;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    let tick = Duration::from_secs(1) / args.tick_rate.max(1);
    let delta = tick.as_secs_f32();
    let mut ticks = 0u64;
    let result = loop {
        if stop.load(Ordering::SeqCst) || args.max_ticks.is_some_and(|max| ticks >= max) {
            break Ok(());
        }
        let started = Instant::now();
        if let Err(e) = state.update(delta) {
            break Err(e);
        }
        ticks += 1;
        match tick.checked_sub(started.elapsed()) {
            Some(rest) => thread::sleep(rest),
            None => warn!("tick {ticks} overran by {:?}", started.elapsed() - tick),
        }
    };

    info!("stopping after {ticks} ticks");
    state.dispose(true);
    result.map_err(Into::into)
}
