// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Logger initialization. The daemon binary (and the demo client binary)
//! call [`init_logger`] once at startup; the library crates themselves only
//! emit `tracing` events and never install a subscriber of their own.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::EnvFilter;

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rotated file under `dir` named `file_name`.
    File { dir: String, file_name: String },
}

/// Builds an `EnvFilter` from `level` (falling back to `RUST_LOG`), wires up
/// the chosen writer, and installs the global subscriber. Returns the
/// [`WorkerGuard`] that must be held for the lifetime of the process -- once
/// it drops, buffered log lines may be lost.
pub fn init_logger(level: &str, output: LogOutput) -> Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_new(level).or_else(|_| EnvFilter::try_from_default_env()).context("failed to parse log level")?;

    let (non_blocking, guard) = match output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { dir, file_name } => {
            let appender = rolling::daily(Path::new(&dir), file_name);
            tracing_appender::non_blocking(appender)
        }
    };

    tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(non_blocking).with_ansi(false).try_init().map_err(|e| anyhow::anyhow!(e))?;

    Ok(guard)
}
