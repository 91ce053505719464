// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: GPL-3.0-or-later

//! Clear-signature handling for manifests.
//!
//! Uploads arrive as clear-signed `.changes`/`.dsc` documents. The
//! authenticator verifies them against the keyring in the GnuPG home,
//! manages that keyring, and re-signs the change manifests the pipeline
//! generates itself with the locally configured secret key.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::debug;
use sequoia_openpgp::{
    Cert, KeyHandle,
    cert::CertParser,
    parse::{
        Parse,
        stream::{MessageLayer, MessageStructure, VerificationHelper, VerifierBuilder},
    },
    policy::StandardPolicy,
    serialize::{
        Serialize as _,
        stream::{Message, Signer},
    },
};
use thiserror::Error;

use basic_debian_utils::Address;

use crate::config::Config;

const CLEARSIGN_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";

/// Signature handling errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The document carries no clear-sign block
    #[error("File is not clearsigned")]
    NotSigned,
    /// The signature does not verify against the keyring
    #[error("Signature does not verify: {0}")]
    BadSignature(String),
    /// No usable secret key for signing
    #[error("No secret signing key available in {0}")]
    NoSecretKey(PathBuf),
    /// Keyring does not contain the requested key
    #[error("Key {0} is not in the keyring")]
    UnknownKey(String),
    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Failure inside the OpenPGP implementation
    #[error("OpenPGP error: {0}")]
    OpenPgp(String),
}

fn pgp_err(err: anyhow::Error) -> AuthError {
    AuthError::OpenPgp(err.to_string())
}

/// Identity of the key that produced a valid signature.
#[derive(Clone, Debug)]
pub struct SignerIdentity {
    /// Hex fingerprint of the signing certificate
    pub fingerprint: String,
    /// Hex key id of the signing certificate
    pub key_id: String,
    /// User ids bound to the certificate
    pub identities: Vec<String>,
}

impl SignerIdentity {
    fn from_cert(cert: &Cert) -> Self {
        Self {
            fingerprint: cert.fingerprint().to_hex(),
            key_id: cert.keyid().to_hex(),
            identities: cert
                .userids()
                .map(|uid| String::from_utf8_lossy(uid.userid().value()).into_owned())
                .collect(),
        }
    }

    /// Mail addresses extracted from the user ids.
    pub fn addresses(&self) -> Vec<Address> {
        self.identities
            .iter()
            .filter_map(|identity| Address::parse(identity))
            .collect()
    }
}

/// Outcome of running a document through the verifier.
#[derive(Debug)]
pub enum SignatureStatus {
    /// A signature verified against the keyring
    Verified(SignerIdentity),
    /// The document carries no clear-sign block
    NotSigned,
    /// The document is signed but no signature verified
    Invalid(String),
}

/// A checked document: the plaintext is always recovered, the status tells
/// whether it can be trusted.
#[derive(Debug)]
pub struct Checked {
    /// Plaintext with the clear-sign armor stripped
    pub plaintext: Vec<u8>,
    /// Verification outcome
    pub status: SignatureStatus,
}

impl Checked {
    /// Plaintext of a verified document, or the matching error.
    pub fn verified(self) -> Result<(Vec<u8>, SignerIdentity), AuthError> {
        match self.status {
            SignatureStatus::Verified(signer) => Ok((self.plaintext, signer)),
            SignatureStatus::NotSigned => Err(AuthError::NotSigned),
            SignatureStatus::Invalid(message) => Err(AuthError::BadSignature(message)),
        }
    }

    /// Plaintext of a document that is either verified or unsigned; only a
    /// present-but-invalid signature is an error.
    pub fn trusted_or_unsigned(self) -> Result<Vec<u8>, AuthError> {
        match self.status {
            SignatureStatus::Verified(_) | SignatureStatus::NotSigned => Ok(self.plaintext),
            SignatureStatus::Invalid(message) => Err(AuthError::BadSignature(message)),
        }
    }
}

/// Capability set the archiver and the listener rely on.
pub trait Authenticator: Send + Sync {
    /// Verify a clear-signed document and recover its plaintext.
    fn check_clearsigned(&self, data: &[u8]) -> Result<Checked, AuthError>;

    /// Clear-sign a generated change manifest in place with the local secret
    /// key. Signing an already signed file replaces the signature.
    fn sign_changes(&self, path: &Path) -> Result<(), AuthError>;
}

/// Authenticator backed by the keyrings of a GnuPG home directory.
pub struct GnupgAuthenticator {
    gnupg_home: PathBuf,
    certs: Vec<Cert>,
    sign_with: Option<String>,
}

impl std::fmt::Debug for GnupgAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GnupgAuthenticator")
            .field("gnupg_home", &self.gnupg_home)
            .field("certs", &self.certs.len())
            .finish()
    }
}

impl GnupgAuthenticator {
    /// Load the public keyring from the configured GnuPG home. A missing
    /// keyring file yields an empty keyring, not an error.
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let gnupg_home = config
            .gnupg_home()
            .map_err(|err| AuthError::OpenPgp(err.to_string()))?;
        let mut res = Self {
            gnupg_home,
            certs: Vec::new(),
            sign_with: (!config.sign_with.is_empty()).then(|| config.sign_with.clone()),
        };
        res.load()?;
        Ok(res)
    }

    fn pubring_path(&self) -> PathBuf {
        self.gnupg_home.join("pubring.gpg")
    }

    fn secring_path(&self) -> PathBuf {
        self.gnupg_home.join("secring.gpg")
    }

    fn load(&mut self) -> Result<(), AuthError> {
        self.certs.clear();
        let path = self.pubring_path();
        if !path.exists() {
            debug!("no keyring at {}", path.display());
            return Ok(());
        }
        for cert in CertParser::from_file(&path).map_err(pgp_err)? {
            self.certs.push(cert.map_err(pgp_err)?);
        }
        Ok(())
    }

    fn store(&self) -> Result<(), AuthError> {
        fs::create_dir_all(&self.gnupg_home)?;
        let mut file = File::create(self.pubring_path())?;
        for cert in &self.certs {
            cert.serialize(&mut file).map_err(pgp_err)?;
        }
        file.flush()?;
        Ok(())
    }

    /// Import an armored or binary public key into the keyring.
    pub fn add_key(&mut self, data: &[u8]) -> Result<SignerIdentity, AuthError> {
        let cert = Cert::from_bytes(data).map_err(pgp_err)?;
        let identity = SignerIdentity::from_cert(&cert);
        if self
            .certs
            .iter()
            .any(|existing| existing.fingerprint() == cert.fingerprint())
        {
            return Ok(identity);
        }
        self.certs.push(cert);
        self.store()?;
        Ok(identity)
    }

    /// Remove a key by (a suffix of) its hex key id.
    pub fn remove_key(&mut self, key_id: &str) -> Result<(), AuthError> {
        let needle = key_id.to_uppercase();
        let before = self.certs.len();
        self.certs
            .retain(|cert| !cert.keyid().to_hex().ends_with(&needle));
        if self.certs.len() == before {
            return Err(AuthError::UnknownKey(key_id.to_owned()));
        }
        self.store()
    }

    /// Enumerate the keys of the keyring.
    pub fn list_keys(&self) -> Vec<SignerIdentity> {
        self.certs.iter().map(SignerIdentity::from_cert).collect()
    }

    fn signing_cert(&self) -> Result<Cert, AuthError> {
        let path = self.secring_path();
        if !path.exists() {
            return Err(AuthError::NoSecretKey(path));
        }
        let mut candidates = Vec::new();
        for cert in CertParser::from_file(&path).map_err(pgp_err)? {
            let cert = cert.map_err(pgp_err)?;
            if !cert.is_tsk() {
                continue;
            }
            if let Some(wanted) = &self.sign_with {
                if !cert.keyid().to_hex().ends_with(&wanted.to_uppercase()) {
                    continue;
                }
            }
            candidates.push(cert);
        }
        candidates.pop().ok_or(AuthError::NoSecretKey(path))
    }
}

impl Authenticator for GnupgAuthenticator {
    fn check_clearsigned(&self, data: &[u8]) -> Result<Checked, AuthError> {
        if !contains_clearsign_block(data) {
            return Ok(Checked {
                plaintext: data.to_vec(),
                status: SignatureStatus::NotSigned,
            });
        }

        let plaintext = strip_clearsign(data)?;
        match verify(&self.certs, data) {
            Ok(signer) => Ok(Checked {
                plaintext,
                status: SignatureStatus::Verified(signer),
            }),
            Err(message) => Ok(Checked {
                plaintext,
                status: SignatureStatus::Invalid(message),
            }),
        }
    }

    fn sign_changes(&self, path: &Path) -> Result<(), AuthError> {
        let data = fs::read(path)?;
        let plaintext = if contains_clearsign_block(&data) {
            strip_clearsign(&data)?
        } else {
            data
        };

        let cert = self.signing_cert()?;
        let policy = StandardPolicy::new();
        let key = cert
            .keys()
            .unencrypted_secret()
            .with_policy(&policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .next()
            .ok_or_else(|| AuthError::NoSecretKey(self.secring_path()))?
            .key()
            .clone();
        let keypair = key.into_keypair().map_err(pgp_err)?;

        let mut signed = Vec::new();
        let message = Message::new(&mut signed);
        let mut message = Signer::new(message, keypair)
            .cleartext()
            .build()
            .map_err(pgp_err)?;
        message.write_all(&plaintext)?;
        message.finalize().map_err(pgp_err)?;

        fs::write(path, &signed)?;
        Ok(())
    }
}

fn contains_clearsign_block(data: &[u8]) -> bool {
    let text = String::from_utf8_lossy(data);
    text.lines().any(|line| line.trim_end() == CLEARSIGN_HEADER)
}

// Recover the signed text from the cleartext signature framework: skip the
// armor headers, un-escape dash sequences, stop at the signature block.
fn strip_clearsign(data: &[u8]) -> Result<Vec<u8>, AuthError> {
    let text =
        std::str::from_utf8(data).map_err(|err| AuthError::OpenPgp(err.to_string()))?;
    let mut lines = text.lines();

    for line in lines.by_ref() {
        if line.trim_end() == CLEARSIGN_HEADER {
            break;
        }
    }
    // armor headers end at the first empty line
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
    }

    let mut plaintext = String::new();
    for line in lines {
        if line.trim_end() == SIGNATURE_HEADER {
            break;
        }
        let line = line.strip_prefix("- ").unwrap_or(line);
        let _ = writeln!(plaintext, "{line}");
    }
    Ok(plaintext.into_bytes())
}

fn verify(certs: &[Cert], data: &[u8]) -> Result<SignerIdentity, String> {
    struct Helper<'a> {
        certs: &'a [Cert],
        signer: Option<SignerIdentity>,
    }

    impl VerificationHelper for &mut Helper<'_> {
        fn get_certs(&mut self, _ids: &[KeyHandle]) -> sequoia_openpgp::Result<Vec<Cert>> {
            Ok(self.certs.to_vec())
        }

        fn check(&mut self, structure: MessageStructure) -> sequoia_openpgp::Result<()> {
            for layer in structure.into_iter() {
                if let MessageLayer::SignatureGroup { results } = layer {
                    for result in results {
                        let Ok(good) = result else {
                            continue;
                        };
                        let issuers = good.sig.issuer_fingerprints().collect::<Vec<_>>();
                        let signer = self.certs.iter().find(|cert| {
                            issuers.iter().any(|fingerprint| {
                                cert.keys().any(|key| key.key().fingerprint() == **fingerprint)
                            })
                        });
                        if let Some(cert) = signer {
                            self.signer = Some(SignerIdentity::from_cert(cert));
                        }
                    }
                }
            }
            Ok(())
        }
    }

    let mut helper = Helper {
        certs,
        signer: None,
    };
    let policy = StandardPolicy::new();

    let verifier = VerifierBuilder::from_bytes(data)
        .map_err(|err| err.to_string())?
        .with_policy(&policy, None, &mut helper);
    match verifier {
        Ok(mut verifier) => {
            use std::io::Read;
            let mut content = Vec::new();
            verifier
                .read_to_end(&mut content)
                .map_err(|err| err.to_string())?;
        }
        Err(err) => return Err(err.to_string()),
    }

    helper.signer.ok_or_else(|| "no valid signature found".to_owned())
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;

    /// Test double: passes every document through unverified.
    #[derive(Debug, Default)]
    pub(crate) struct StubAuthenticator;

    impl Authenticator for StubAuthenticator {
        fn check_clearsigned(&self, data: &[u8]) -> Result<Checked, AuthError> {
            if contains_clearsign_block(data) {
                Ok(Checked {
                    plaintext: strip_clearsign(data)?,
                    status: SignatureStatus::Invalid("stub keyring is empty".into()),
                })
            } else {
                Ok(Checked {
                    plaintext: data.to_vec(),
                    status: SignatureStatus::NotSigned,
                })
            }
        }

        fn sign_changes(&self, _path: &Path) -> Result<(), AuthError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SIGNED: &str = "-----BEGIN PGP SIGNED MESSAGE-----
Hash: SHA256

Format: 1.8
Source: aha
- -- dash escaped line
-----BEGIN PGP SIGNATURE-----

iQEzBAEBCAAdFiEE
-----END PGP SIGNATURE-----
";

    #[test]
    fn detects_clearsign_block() {
        assert!(contains_clearsign_block(SIGNED.as_bytes()));
        assert!(!contains_clearsign_block(b"Format: 1.8\n"));
    }

    #[test]
    fn strips_armor() {
        let plaintext = strip_clearsign(SIGNED.as_bytes()).unwrap();
        assert_eq!(
            String::from_utf8(plaintext).unwrap(),
            "Format: 1.8\nSource: aha\n-- dash escaped line\n"
        );
    }

    #[test]
    fn unsigned_input_keeps_plaintext() {
        let authenticator = GnupgAuthenticator {
            gnupg_home: PathBuf::from("/nonexistent"),
            certs: vec![],
            sign_with: None,
        };
        let checked = authenticator.check_clearsigned(b"Format: 1.8\n").unwrap();
        assert!(matches!(checked.status, SignatureStatus::NotSigned));
        assert_eq!(checked.plaintext, b"Format: 1.8\n");
        assert!(matches!(
            checked.verified().unwrap_err(),
            AuthError::NotSigned
        ));
    }

    #[test]
    fn signed_without_matching_key_is_invalid() {
        let authenticator = GnupgAuthenticator {
            gnupg_home: PathBuf::from("/nonexistent"),
            certs: vec![],
            sign_with: None,
        };
        let checked = authenticator.check_clearsigned(SIGNED.as_bytes()).unwrap();
        assert!(matches!(checked.status, SignatureStatus::Invalid(_)));
        // the plaintext is still recovered for the reporting path
        assert!(!checked.plaintext.is_empty());
    }
}
