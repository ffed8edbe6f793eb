// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use cpdlcd::{
    cfg::{
        cli::{resolve_config_path, Cli, USAGE},
        config::Config,
        logger::{init_logger, LogOutput},
        tls::build_server_config,
    },
    router::{AllowAll, Blocklist, FileBlocklist, Router},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::watch,
    task::JoinHandle,
    time::{interval, timeout},
};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

/// How long the shutdown path waits for in-flight connection tasks to drain
/// their writes and close on their own before forcibly aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() {
    std::process::exit(match run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("cpdlcd: startup failed: {e:#}");
            1
        }
    });
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse(std::env::args().skip(1)).context("failed to parse command-line arguments")?;
    if cli.help {
        println!("{USAGE}");
        return Ok(());
    }
    if !cli.foreground {
        println!("daemonization is delegated to the process supervisor; continuing in the foreground");
    }

    let mut cfg = match &cli.config_path {
        Some(path) => resolve_config_path(path).and_then(Config::load_from_file).context("failed to resolve or load config")?,
        None => Config::default(),
    };
    if let Some(port) = cli.port_override {
        cfg.override_port(port);
    }

    let _guard = init_logger("info", LogOutput::Stdout).context("failed to initialize logger")?;
    info!(callsigns = ?cfg.atc_callsigns, listeners = ?cfg.listen, "starting cpdlcd");

    rustls::crypto::ring::default_provider().install_default().map_err(|_| anyhow::anyhow!("failed to install default crypto provider"))?;

    let tls_config = build_server_config(&cfg).context("failed to build TLS server configuration")?;
    let acceptor = TlsAcceptor::from(tls_config);

    let blocklist: Arc<dyn Blocklist> = match &cfg.blocklist {
        Some(path) => Arc::new(FileBlocklist::new(path)),
        None => Arc::new(AllowAll),
    };
    let router = Arc::new(Router::with_queue_limits(blocklist, cfg.queued_msg_max_bytes, cfg.queued_msg_timeout()));

    let mut listeners = Vec::new();
    for l in &cfg.listen {
        let addr: SocketAddr = format!("{}:{}", l.host, l.port).parse().with_context(|| format!("invalid listen address {}:{}", l.host, l.port))?;
        let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "listening");
        listeners.push(listener);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    let shutdown = tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    let mut accept_tasks = Vec::new();
    for listener in listeners {
        let acceptor = acceptor.clone();
        let router = router.clone();
        let shutdown_rx = shutdown_rx.clone();
        let conn_tasks = conn_tasks.clone();
        accept_tasks.push(tokio::spawn(accept_loop(listener, acceptor, router, shutdown_rx, conn_tasks)));
    }

    let ticker_router = router.clone();
    let poll_timeout = cfg.poll_timeout();
    let ticker = tokio::spawn(async move {
        let mut tick = interval(poll_timeout);
        loop {
            tick.tick().await;
            ticker_router.tick(Instant::now());
        }
    });

    shutdown.await.context("shutdown signal task panicked")?;
    info!("shutdown signal received, draining in-flight connections");

    // Stop accepting new connections and stop polling the queue; existing
    // connection tasks get a bounded grace period to flush their writes and
    // close on their own before being forced down.
    ticker.abort();
    for task in accept_tasks {
        task.abort();
    }
    let _ = shutdown_tx.send(true);

    let draining: Vec<JoinHandle<()>> = std::mem::take(&mut *conn_tasks.lock().expect("lock poisoned"));
    let drain_count = draining.len();
    match timeout(SHUTDOWN_GRACE, join_all_handles(draining)).await {
        Ok(()) => info!(drained = drain_count, "all connections drained cleanly"),
        Err(_) => warn!(drain_grace_secs = SHUTDOWN_GRACE.as_secs(), "drain grace period elapsed, forcing remaining connections closed"),
    }

    let stats = router.stats();
    info!(?stats, "final router stats");
    Ok(())
}

/// Awaits every handle, swallowing join errors (a panicked or aborted
/// connection task is already logged at its own call site).
async fn join_all_handles(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Arc<Router>,
    shutdown_rx: watch::Receiver<bool>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let router = router.clone();
        let shutdown_rx = shutdown_rx.clone();
        let task = tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%peer_addr, "TLS handshake failed: {e}");
                    return;
                }
            };
            serve_connection(tls_stream, peer_addr, router, shutdown_rx).await;
        });
        conn_tasks.lock().expect("lock poisoned").push(task);
    }
}

async fn serve_connection(
    stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    peer_addr: SocketAddr,
    router: Arc<Router>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (sink, mut rx) = cpdlcd::router::Handle::new();
    let id = router.accept(peer_addr, Arc::new(sink));
    info!(%peer_addr, conn_id = id, "connection accepted");

    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => router.on_readable(id, &buf[..n]),
                    Err(e) => {
                        warn!(conn_id = id, "read error: {e}");
                        break;
                    }
                }
            }
            chunk = rx.recv() => {
                match chunk {
                    Some(bytes) => {
                        if let Err(e) = writer.write_all(&bytes).await {
                            warn!(conn_id = id, "write error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown_rx.changed() => {
                // Drain whatever outbound bytes the router already queued for
                // this connection, then close; don't accept further reads.
                rx.close();
                while let Ok(bytes) = rx.try_recv() {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    router.close(id);
    if let Err(e) = writer.shutdown().await {
        error!(conn_id = id, "shutdown error: {e}");
    }
    info!(conn_id = id, "connection closed");
}
