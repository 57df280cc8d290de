// src/main.rs
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::{error, info};

use ravel::logging::init_logging;
use ravel::{Mode, Proxy, ProxyConfig};

#[derive(Parser, Debug)]
#[command(name = "ravel", version)]
#[command(about = "Edge-triggered epoll reverse proxy (TCP passthrough / HTTP/1.x aware)")]
struct Cli {
    /// Listen address (IPv4)
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0")]
    listen: Ipv4Addr,

    /// Listen port
    #[arg(short = 'p', long = "port", default_value_t = 8080)]
    port: u16,

    /// Upstream address (IPv4)
    #[arg(short = 'b', long = "backend", default_value = "127.0.0.1")]
    backend: Ipv4Addr,

    /// Upstream port
    #[arg(short = 'P', long = "backend-port", default_value_t = 8081)]
    backend_port: u16,

    /// Forwarding mode: "tcp" or "http"
    #[arg(short = 'm', long = "mode", default_value = "http")]
    mode: Mode,
}

fn banner(config: &ProxyConfig) {
    println!("╔════════════════════════════════════════╗");
    println!("║       ravel — epoll reverse proxy      ║");
    println!("║   edge-triggered | non-blocking I/O    ║");
    println!("╚════════════════════════════════════════╝");
    println!();
    println!("Configuration:");
    println!("  Listen:  {}:{}", config.listen_addr, config.listen_port);
    println!("  Backend: {}:{}", config.backend_addr, config.backend_port);
    println!("  Mode:    {}", config.mode);
    println!("  Max connections: {}", config.max_connections);
    println!();
}

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let config = ProxyConfig {
        listen_addr: cli.listen,
        listen_port: cli.port,
        backend_addr: cli.backend,
        backend_port: cli.backend_port,
        mode: cli.mode,
        ..Default::default()
    };

    if let Err(e) = config.validate() {
        error!(error = %e, "refusing to start");
        return ExitCode::FAILURE;
    }

    banner(&config);

    let mut proxy = match Proxy::new(config) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "initialization failed");
            return ExitCode::FAILURE;
        }
    };

    // SIGINT/SIGTERM flip the flag; the loop notices at its next iteration.
    let shutdown = proxy.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    }) {
        error!(error = %e, "failed to install signal handler");
        return ExitCode::FAILURE;
    }

    let result = proxy.run();
    proxy.shutdown();

    match result {
        Ok(()) => {
            info!("proxy terminated gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "proxy terminated with error");
            ExitCode::FAILURE
        }
    }
}
