//! Signing and publishing secrets
//!
//! Secrets come from the process environment and stay in memory. The only
//! place they touch disk is a private temp directory that lives as long as
//! the signer command runs. `Debug` output is redacted.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

pub const CERTIFICATE_CHAIN_VAR: &str = "CERTIFICATE_CHAIN";
pub const PRIVATE_KEY_VAR: &str = "PRIVATE_KEY";
pub const PRIVATE_KEY_PASSWORD_VAR: &str = "PRIVATE_KEY_PASSWORD";
pub const PUBLISH_TOKEN_VAR: &str = "PUBLISH_TOKEN";

/// A string that must never be printed
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

fn required<F>(lookup: &F, name: &str) -> Result<Secret>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .map(Secret)
        .ok_or_else(|| Error::MissingSecret(name.to_string()))
}

/// Secret lookup backed by the process environment
pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Certificate chain, private key and its password
#[derive(Debug, Clone)]
pub struct SigningMaterial {
    pub certificate_chain: Secret,
    pub private_key: Secret,
    pub password: Secret,
}

/// Key material written out for an external signer
pub struct SigningFiles {
    _dir: tempfile::TempDir,
    pub certificate: PathBuf,
    pub key: PathBuf,
}

impl SigningMaterial {
    /// Read `CERTIFICATE_CHAIN`, `PRIVATE_KEY` and `PRIVATE_KEY_PASSWORD`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Read signing material through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            certificate_chain: required(&lookup, CERTIFICATE_CHAIN_VAR)?,
            private_key: required(&lookup, PRIVATE_KEY_VAR)?,
            password: required(&lookup, PRIVATE_KEY_PASSWORD_VAR)?,
        })
    }

    /// Write the certificate chain and key into a fresh private directory
    ///
    /// The files are removed when the returned value is dropped.
    pub fn write_files(&self) -> Result<SigningFiles> {
        let dir = tempfile::Builder::new().prefix("pluginctl-sign").tempdir()?;
        let certificate = dir.path().join("chain.crt");
        let key = dir.path().join("private.pem");
        write_private(&certificate, self.certificate_chain.expose())?;
        write_private(&key, self.private_key.expose())?;
        Ok(SigningFiles {
            _dir: dir,
            certificate,
            key,
        })
    }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)?;
    Ok(())
}

/// Marketplace upload token
#[derive(Debug, Clone)]
pub struct PublishToken(pub Secret);

impl PublishToken {
    /// Read `PUBLISH_TOKEN`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        required(&lookup, PUBLISH_TOKEN_VAR).map(Self)
    }
}
