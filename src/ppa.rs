// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Resolution of `ppa:<owner>/<name>` dependency ids.
//!
//! The Launchpad API reports the fingerprint of the archive signing key; the
//! key itself is fetched from the Ubuntu keyserver and accepted only if its
//! recomputed fingerprint matches.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use log::info;
use regex::Regex;
use sequoia_openpgp::{Cert, parse::Parse, serialize::SerializeInto};
use serde::Deserialize;
use thiserror::Error;

use crate::access::RepositoryAccess;

static PPA_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ppa:([a-z0-9][a-zA-Z0-9.+-]*)/([a-z0-9][a-zA-Z.+-]*)$")
        .expect("static regex compiles")
});

const PPA_API: &str = "http://api.launchpad.net/1.0";
const KEYSERVER: &str = "http://keyserver.ubuntu.com:80";

/// Errors of PPA resolution.
#[derive(Debug, Error)]
pub enum PpaError {
    /// The id does not have the `ppa:<owner>/<name>` shape
    #[error("Invalid PPA address {0}")]
    InvalidAddress(String),
    /// The Launchpad API or the keyserver could not be reached
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The PPA has no signing key or the key data is unusable
    #[error("Could not obtain signing key: {0}")]
    Key(String),
    /// The received key does not match the advertised fingerprint
    #[error("Invalid received key fingerprint {received}, expected {expected}")]
    FingerprintMismatch {
        /// Fingerprint advertised by the API
        expected: String,
        /// Fingerprint of the received key
        received: String,
    },
}

#[derive(Debug, Deserialize)]
struct PpaRecord {
    signing_key_fingerprint: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn fetch(owner: &str, name: &str) -> Result<(String, String), PpaError> {
    let client = reqwest::Client::new();

    let record: PpaRecord = client
        .get(format!("{PPA_API}/~{owner}/+archive/{name}"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let fingerprint = record
        .signing_key_fingerprint
        .ok_or_else(|| PpaError::Key("the PPA advertises no signing key".to_owned()))?;

    let armored = client
        .get(format!("{KEYSERVER}/pks/lookup"))
        .query(&[("op", "get"), ("options", "mr"), ("search", &format!("0x{fingerprint}"))])
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    Ok((fingerprint, armored))
}

/// Resolve a PPA id into an access record with a verified signing key.
/// The component map starts empty; edits fill it in.
pub fn resolve(address: &str) -> Result<RepositoryAccess, PpaError> {
    let captures = PPA_ADDRESS
        .captures(address)
        .ok_or_else(|| PpaError::InvalidAddress(address.to_owned()))?;
    let owner = &captures[1];
    let name = &captures[2];

    info!("resolving {address} via the Launchpad API");
    let (fingerprint, armored) = fetch(owner, name)?;

    let cert = Cert::from_bytes(armored.as_bytes()).map_err(|err| PpaError::Key(err.to_string()))?;
    let received = cert.fingerprint().to_hex();
    if received != fingerprint.to_uppercase() {
        return Err(PpaError::FingerprintMismatch {
            expected: fingerprint,
            received,
        });
    }

    let normalized = cert
        .armored()
        .to_vec()
        .map_err(|err| PpaError::Key(err.to_string()))?;
    Ok(RepositoryAccess {
        id: address.to_owned(),
        address: format!("http://ppa.launchpad.net/{owner}/{name}/ubuntu"),
        armored_public_key: Some(
            String::from_utf8(normalized).map_err(|err| PpaError::Key(err.to_string()))?,
        ),
        components: BTreeMap::new(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_shape() {
        assert!(PPA_ADDRESS.is_match("ppa:owner/name"));
        assert!(PPA_ADDRESS.is_match("ppa:team-0/next-release"));
        assert!(!PPA_ADDRESS.is_match("ppa:owner"));
        assert!(!PPA_ADDRESS.is_match("ppa:/name"));
        assert!(!PPA_ADDRESS.is_match("http://example.org"));
    }

    #[test]
    fn invalid_address_is_rejected() {
        assert!(matches!(
            resolve("not-a-ppa"),
            Err(PpaError::InvalidAddress(_))
        ));
    }
}
