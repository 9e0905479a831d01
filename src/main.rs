//! # Harbor - Wayland compositor core
//!
//! Standalone host for the compositor core: it runs a calloop event loop,
//! binds the listening socket and serves clients until interrupted. Nothing
//! is rendered; this binary is mostly useful for protocol testing.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::os::fd::RawFd;

use harbor::{Compositor, HarborConfig};

#[derive(Parser)]
#[command(name = "harbor")]
#[command(about = "Wayland compositor core with a calloop host loop")]
#[command(version, long_version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATE"), ")"))]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/harbor/harbor.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Name of the listening socket under XDG_RUNTIME_DIR
    #[arg(long)]
    wayland_socket_name: Option<String>,

    /// Already-listening socket descriptor to accept clients on (repeatable)
    #[arg(long = "socket-fd")]
    socket_fds: Vec<RawFd>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting Harbor");
    info!("📄 Version: {}", harbor::VERSION);

    let mut config = match HarborConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
            HarborConfig::default()
        }
    };
    if let Some(name) = cli.wayland_socket_name {
        config.socket.name = Some(name);
    }

    let mut event_loop =
        calloop::EventLoop::<Compositor>::try_new().context("Failed to create the event loop")?;
    let mut compositor = Compositor::new(config).context("Failed to construct the compositor")?;
    for fd in cli.socket_fds {
        compositor.add_socket_descriptor(fd);
    }

    let signal = event_loop.get_signal();
    ctrlc::set_handler(move || {
        info!("🛑 Interrupted, shutting down");
        signal.stop();
        signal.wakeup();
    })
    .context("Failed to install the interrupt handler")?;

    compositor.signals().client_connected.connect(|client| {
        info!("🔌 Client connected: {:?}", client);
    });
    compositor.signals().client_disconnected.connect(|client| {
        info!("👋 Client disconnected: {:?}", client);
    });

    compositor.pre_init();
    compositor.init(&event_loop.handle());
    if let Some(name) = compositor.socket_name() {
        info!("✨ Listening on {}", name);
    }

    harbor::event_loop::run(&mut event_loop, &mut compositor)?;
    info!("Harbor stopped");
    Ok(())
}
