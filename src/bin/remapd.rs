// Remapd CLI
// Controls the injection coordinator: start/stop presets, autoload, probes

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};

use remapd_core::{list_devices, Coordinator, KeyNameTable};

/// System-wide input remapper
#[derive(Parser, Debug)]
#[command(name = "remapd")]
#[command(version)]
#[command(about = "Remap keyboards, mice and gamepads system-wide", long_about = None)]
struct Args {
    /// Global config file (default: ~/.config/remapd/config.json)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List all known key and button names and exit
    #[arg(long)]
    key_names: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start injecting a preset for one device
    Start {
        /// Device name or event node path
        device: String,
        /// Path to the preset document
        preset: PathBuf,
        /// Optional layout dump with extra key names
        #[arg(long, value_name = "PATH")]
        aux: Option<PathBuf>,
    },
    /// Stop injecting for one device
    Stop {
        /// Device name or event node path
        device: String,
    },
    /// Start every device -> preset binding from the config
    Autoload,
    /// Liveness probe, echoes the message back
    Hello {
        message: String,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn print_devices() -> anyhow::Result<()> {
    let devices = list_devices().context("finding input devices")?;
    println!("Found {} input device(s):", devices.len());
    for (index, device) in devices.iter().enumerate() {
        println!("  {}: {} ({})", index, device.name, device.path);
    }
    Ok(())
}

fn print_key_names(keys: &KeyNameTable) {
    let mut names: Vec<&str> = keys.names().collect();
    names.sort_unstable();
    for name in names {
        println!("{}", name);
    }
}

/// Block until SIGINT/SIGTERM, then stop every session.
fn run_until_signalled(coordinator: &Coordinator) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("installing signal handlers")?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    log::info!("remapd is running, press Ctrl+C to stop");
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    coordinator.stop_all();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let keys = Arc::new(KeyNameTable::builtin());

    if args.list_devices {
        return print_devices();
    }
    if args.key_names {
        print_key_names(&keys);
        return Ok(());
    }

    let command = args
        .command
        .ok_or_else(|| anyhow!("no command given, see --help"))?;
    let coordinator = Coordinator::new(keys, args.config);

    match command {
        Command::Start {
            device,
            preset,
            aux,
        } => {
            coordinator
                .start(&device, &preset, aux.as_deref())
                .with_context(|| format!("starting injection for \"{}\"", device))?;
            run_until_signalled(&coordinator)
        }
        Command::Stop { device } => {
            // the coordinator lives in this process; stopping is idempotent
            coordinator.stop(&device).map_err(Into::into)
        }
        Command::Autoload => {
            coordinator.autoload();
            if coordinator.active_devices().is_empty() {
                return Err(anyhow!("autoload did not start any session"));
            }
            run_until_signalled(&coordinator)
        }
        Command::Hello { message } => {
            println!("{}", coordinator.hello(&message));
            Ok(())
        }
    }
}
