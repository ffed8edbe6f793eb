// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Daemon configuration (spec §6.2): a flat `key=value` text file, one pair
//! per line, blank lines and `#`-prefixed lines ignored. Mirrors the
//! teacher's `load_from_file` -> `validate_and_normalize` two-step shape,
//! but over a simpler text format than YAML.

use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{ensure, Context, Result};

/// Default TCP port, spec §6.1.
pub const DEFAULT_PORT: u16 = 17622;

/// A resolved listening endpoint (`host`, `port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Permitted ATC callsigns, from every `atc/name/*` key.
    pub atc_callsigns: Vec<String>,
    /// Listening endpoints, from every `listen/*` key.
    pub listen: Vec<Listener>,
    /// TLS private key path (PEM).
    pub keyfile: String,
    /// TLS certificate path (PEM).
    pub certfile: String,
    /// Optional CA trust file path (PEM).
    pub cafile: Option<String>,
    /// Optional blocklist file path, consumed by the blocklist collaborator.
    pub blocklist: Option<String>,

    /// Queue byte budget per recipient callsign (spec §3.3), supplemented key.
    pub queued_msg_max_bytes: usize,
    /// Queue entry TTL in seconds (spec §3.3), supplemented key.
    pub queued_msg_timeout_secs: u64,
    /// Post-logon input byte cap (spec §6.1), supplemented key.
    pub max_buf_sz: usize,
    /// Pre-logon input byte cap (spec §6.1), supplemented key.
    pub max_buf_sz_no_logon: usize,
    /// Event-loop poll timeout in milliseconds (spec §5), supplemented key.
    pub poll_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            atc_callsigns: vec!["TEST".to_string()],
            listen: vec![Listener { host: "localhost".to_string(), port: DEFAULT_PORT }],
            keyfile: "cpdlcd_key.pem".to_string(),
            certfile: "cpdlcd_cert.pem".to_string(),
            cafile: None,
            blocklist: None,
            queued_msg_max_bytes: crate::router::DEFAULT_QUEUED_MSG_MAX_BYTES,
            queued_msg_timeout_secs: crate::router::DEFAULT_QUEUED_MSG_TIMEOUT_SECS,
            max_buf_sz: crate::router::MAX_BUF_SZ,
            max_buf_sz_no_logon: crate::router::MAX_BUF_SZ_NO_LOGON,
            poll_timeout_ms: 1000,
        }
    }
}

/// The file as parsed into flat key-value pairs, before defaults merge in.
#[derive(Debug, Default)]
struct RawConfig {
    pairs: Vec<(String, String)>,
}

fn parse_kv_text(s: &str) -> RawConfig {
    let mut pairs = Vec::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            pairs.push((k.trim().to_string(), v.trim().to_string()));
        }
    }
    RawConfig { pairs }
}

fn parse_listener(value: &str) -> Result<Listener> {
    match value.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().with_context(|| format!("invalid port in listen value {value:?}"))?;
            Ok(Listener { host: host.to_string(), port })
        }
        None => Ok(Listener { host: value.to_string(), port: DEFAULT_PORT }),
    }
}

impl Config {
    /// Loads and validates the configuration from `path` (spec §6.2).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        Self::from_text(&s)
    }

    fn from_text(s: &str) -> Result<Self> {
        let raw = parse_kv_text(s);
        let mut cfg = Config { atc_callsigns: Vec::new(), listen: Vec::new(), ..Config::default() };
        let mut extra: HashMap<String, String> = HashMap::new();

        for (key, value) in &raw.pairs {
            if key.starts_with("atc/name/") {
                cfg.atc_callsigns.push(value.clone());
            } else if key.starts_with("listen/") {
                cfg.listen.push(parse_listener(value)?);
            } else {
                extra.insert(key.clone(), value.clone());
            }
        }

        if let Some(v) = extra.remove("keyfile") {
            cfg.keyfile = v;
        }
        if let Some(v) = extra.remove("certfile") {
            cfg.certfile = v;
        }
        if let Some(v) = extra.remove("cafile") {
            cfg.cafile = Some(v);
        }
        if let Some(v) = extra.remove("blocklist") {
            cfg.blocklist = Some(v);
        }
        if let Some(v) = extra.remove("runtime/queued_msg_max_bytes") {
            cfg.queued_msg_max_bytes = v.parse().context("invalid runtime/queued_msg_max_bytes")?;
        }
        if let Some(v) = extra.remove("runtime/queued_msg_timeout_secs") {
            cfg.queued_msg_timeout_secs = v.parse().context("invalid runtime/queued_msg_timeout_secs")?;
        }
        if let Some(v) = extra.remove("runtime/max_buf_sz") {
            cfg.max_buf_sz = v.parse().context("invalid runtime/max_buf_sz")?;
        }
        if let Some(v) = extra.remove("runtime/max_buf_sz_no_logon") {
            cfg.max_buf_sz_no_logon = v.parse().context("invalid runtime/max_buf_sz_no_logon")?;
        }
        if let Some(v) = extra.remove("runtime/poll_timeout_ms") {
            cfg.poll_timeout_ms = v.parse().context("invalid runtime/poll_timeout_ms")?;
        }

        if cfg.atc_callsigns.is_empty() {
            cfg.atc_callsigns = Config::default().atc_callsigns;
        }
        if cfg.listen.is_empty() {
            cfg.listen = Config::default().listen;
        }

        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.atc_callsigns.is_empty(), "at least one atc/name/* callsign is required");
        ensure!(!self.listen.is_empty(), "at least one listen/* endpoint is required");
        for l in &self.listen {
            ensure!(!l.host.is_empty(), "listen host must not be empty");
        }
        ensure!(!self.keyfile.is_empty(), "keyfile must not be empty");
        ensure!(!self.certfile.is_empty(), "certfile must not be empty");
        Ok(())
    }

    /// Overrides every configured listener's port with `port` (spec §6.3 `-p`).
    pub fn override_port(&mut self, port: u16) {
        for l in &mut self.listen {
            l.port = port;
        }
    }

    pub fn queued_msg_timeout(&self) -> Duration {
        Duration::from_secs(self.queued_msg_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_config_file_given() {
        let cfg = Config::default();
        assert_eq!(cfg.atc_callsigns, vec!["TEST".to_string()]);
        assert_eq!(cfg.listen, vec![Listener { host: "localhost".to_string(), port: DEFAULT_PORT }]);
        assert_eq!(cfg.keyfile, "cpdlcd_key.pem");
        assert_eq!(cfg.certfile, "cpdlcd_cert.pem");
    }

    #[test]
    fn parses_multiple_atc_names_and_listeners() {
        let text = "atc/name/a=ATC1\natc/name/b=ATC2\nlisten/a=0.0.0.0:9000\nlisten/b=127.0.0.1\n";
        let cfg = Config::from_text(text).expect("valid config");
        assert_eq!(cfg.atc_callsigns, vec!["ATC1", "ATC2"]);
        assert_eq!(
            cfg.listen,
            vec![
                Listener { host: "0.0.0.0".to_string(), port: 9000 },
                Listener { host: "127.0.0.1".to_string(), port: DEFAULT_PORT },
            ]
        );
    }

    #[test]
    fn runtime_overrides_parse() {
        let text = "runtime/queued_msg_max_bytes=1024\nruntime/poll_timeout_ms=250\n";
        let cfg = Config::from_text(text).expect("valid config");
        assert_eq!(cfg.queued_msg_max_bytes, 1024);
        assert_eq!(cfg.poll_timeout_ms, 250);
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let text = "# comment\n\n  \natc/name/a=ATC1\n";
        let cfg = Config::from_text(text).expect("valid config");
        assert_eq!(cfg.atc_callsigns, vec!["ATC1"]);
    }

    #[test]
    fn override_port_rewrites_every_listener() {
        let mut cfg = Config::from_text("listen/a=host1:1\nlisten/b=host2:2\n").expect("valid config");
        cfg.override_port(9);
        assert!(cfg.listen.iter().all(|l| l.port == 9));
    }
}
