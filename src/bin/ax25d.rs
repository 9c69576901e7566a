/*! AX.25 v2.2 packet-radio link-layer daemon.

Loads an XML configuration describing plugin instances (interfaces),
starts the tick dispatcher and the async logger, and runs until
interrupted.

```no_run
$ ax25d --loglevel:INFO config.xml
```
*/
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use ax25rs::ax25_module::Ax25Module;
use ax25rs::callsign::Address;
use ax25rs::config::Configuration;
use ax25rs::dlsap::{DlsEndpoint, Registry};
use ax25rs::monitor::Monitor;
use ax25rs::tick::TickDispatcher;
use ax25rs::transport::LoopbackTransport;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevelArg {
    None,
    Error,
    Warning,
    Info,
    Debug,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::None => LevelFilter::Off,
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warning => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Minimum level of messages to log.
    #[arg(long = "loglevel", value_enum, default_value = "warning")]
    loglevel: LogLevelArg,

    /// Write this process's pid to the given path.
    #[arg(long = "pid")]
    pid: Option<PathBuf>,

    /// Override the terminal escape character (default `~`).
    #[arg(long = "esc", default_value = "~")]
    esc: char,

    /// Suppress the terminal's direction-prefix column.
    #[arg(long = "noleads")]
    noleads: bool,

    /// XML configuration file describing plugins and instances.
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    ax25rs::logging::init(opt.loglevel.into(), 1024)
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;

    if let Some(pid_path) = &opt.pid {
        let mut f = fs::File::create(pid_path)
            .with_context(|| format!("creating pid file {}", pid_path.display()))?;
        write!(f, "{}", std::process::id())?;
    }

    let _ = opt.esc;
    let _ = opt.noleads;

    let monitor = Arc::new(Monitor::new());
    let wheel = Arc::new(ax25rs::timer::TimerWheel::new());
    let dispatcher = TickDispatcher::new(wheel, Duration::from_millis(10));
    let registry = Registry::new();

    if let Some(config_path) = &opt.config {
        let xml = fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config = Configuration::parse(&xml)?;
        info!("loaded {} plugin(s) from {}", config.plugins.len(), config_path.display());
        for plugin in &config.plugins {
            for instance in &plugin.instances {
                let local_addr: Address = instance
                    .settings
                    .iter()
                    .find(|(name, _)| name == "callsign")
                    .map(|(_, value)| value.parse())
                    .transpose()?
                    .unwrap_or_else(|| Address::new("NOCALL", 0, false).unwrap());
                let (transport, _peer) = LoopbackTransport::pair();
                let module = Ax25Module::new(
                    &instance.name,
                    local_addr,
                    transport,
                    monitor.clone(),
                    dispatcher.timer_wheel(),
                    64,
                );
                registry.register(module.clone())?;
                dispatcher.register_listener(module.clone());
                dispatcher.register_timer_sink(module);
            }
        }
        // Second pass: wire up declared peer links now that every
        // instance is registered, mirroring the upstream DLSAP's
        // name-based lookup rather than requiring declaration order.
        for plugin in &config.plugins {
            for instance in &plugin.instances {
                let Some((_, peer_name)) = instance.settings.iter().find(|(n, _)| n == "peer") else {
                    continue;
                };
                let this = registry
                    .lookup(&instance.name)
                    .ok_or_else(|| anyhow::anyhow!("instance {} vanished after registration", instance.name))?;
                let peer = registry
                    .lookup(peer_name)
                    .ok_or_else(|| anyhow::anyhow!("peer '{peer_name}' named by instance {} not found", instance.name))?;
                this.open(Some(peer))?;
            }
        }
    } else {
        info!("no configuration given; running with no interfaces");
    }

    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            eprintln!("received Ctrl+C, shutting down");
            running.store(false, std::sync::atomic::Ordering::SeqCst);
        })
        .context("installing Ctrl-C handler")?;
    }

    let period = dispatcher.period();
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        dispatcher.fire();
        std::thread::sleep(period);
    }
    Ok(())
}
