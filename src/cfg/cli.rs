// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Daemon command-line parsing (spec §6.3): `-h`, `-c <path>`, `-d`, `-p
//! <port>`. Hand-rolled over `std::env::args()`, no `clap` dependency --
//! matching the teacher's own minimal CLI surface.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

pub const USAGE: &str = "usage: cpdlcd [-h] [-c <path>] [-d] [-p <port>]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    /// `-h`: print usage and exit before doing anything else.
    pub help: bool,
    /// `-c <path>`: config file path.
    pub config_path: Option<String>,
    /// `-d`: stay in the foreground.
    pub foreground: bool,
    /// `-p <port>`: override every configured listener's port.
    pub port_override: Option<u16>,
}

impl Cli {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut cli = Cli { help: false, config_path: None, foreground: false, port_override: None };
        let mut it = args.into_iter();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "-h" => cli.help = true,
                "-d" => cli.foreground = true,
                "-c" => {
                    let path = it.next().context("-c requires a path argument")?;
                    cli.config_path = Some(path);
                }
                "-p" => {
                    let port = it.next().context("-p requires a port argument")?;
                    cli.port_override = Some(port.parse().with_context(|| format!("invalid port {port:?}"))?);
                }
                other => bail!("unrecognized argument {other:?}\n{USAGE}"),
            }
        }
        Ok(cli)
    }
}

/// Resolves `rel` to a canonical absolute path (teacher's
/// `resolve_config_path`), used for the `-c` config path.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() { p.to_path_buf() } else { std::env::current_dir().context("cannot get current working dir")?.join(p) };

    let canon = abs.canonicalize().with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_help_flag() {
        let cli = Cli::parse(args(&["-h"])).expect("parses");
        assert!(cli.help);
    }

    #[test]
    fn parses_config_path_and_foreground() {
        let cli = Cli::parse(args(&["-c", "/tmp/cpdlcd.conf", "-d"])).expect("parses");
        assert_eq!(cli.config_path.as_deref(), Some("/tmp/cpdlcd.conf"));
        assert!(cli.foreground);
    }

    #[test]
    fn parses_port_override() {
        let cli = Cli::parse(args(&["-p", "9000"])).expect("parses");
        assert_eq!(cli.port_override, Some(9000));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(Cli::parse(args(&["--bogus"])).is_err());
    }

    #[test]
    fn rejects_missing_value_for_c() {
        assert!(Cli::parse(args(&["-c"])).is_err());
    }
}
