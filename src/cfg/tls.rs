// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TLS server configuration (spec §6.1): builds a `rustls::ServerConfig`
//! from PEM cert/key files, with client certificates requested but not
//! verified (spec §6.1 "client certificates are requested-but-ignored").

use std::{fs::File, io::BufReader, sync::Arc};

use anyhow::{bail, Context, Result};
use rustls::{server::WebPkiClientVerifier, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use super::config::Config;

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("failed to open certificate file {path:?}"))?;
    let mut reader = BufReader::new(file);
    certs(&mut reader).collect::<Result<Vec<_>, _>>().with_context(|| format!("failed to parse certificates in {path:?}"))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("failed to open key file {path:?}"))?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader).with_context(|| format!("failed to parse private key in {path:?}"))?.context("no private key found")
}

/// Builds the server-side TLS configuration for [`Config::keyfile`] /
/// [`Config::certfile`] / [`Config::cafile`]. When a CA file is configured,
/// client certificates are requested but any presented certificate is
/// allowed through (requested-but-ignored per spec §6.1); without a CA file
/// no client certificate is requested at all.
pub fn build_server_config(cfg: &Config) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(&cfg.certfile)?;
    let key = load_key(&cfg.keyfile)?;
    if certs.is_empty() {
        bail!("certificate file {:?} contained no certificates", cfg.certfile);
    }

    let server_config = match &cfg.cafile {
        Some(cafile) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(cafile)? {
                roots.add(cert).context("failed to add CA certificate to root store")?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).allow_unauthenticated().build().context("failed to build client verifier")?;
            ServerConfig::builder().with_client_cert_verifier(verifier).with_single_cert(certs, key)?
        }
        None => ServerConfig::builder().with_no_client_auth().with_single_cert(certs, key)?,
    };

    Ok(Arc::new(server_config))
}
