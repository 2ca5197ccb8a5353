//! Docker secret lookup and a redacting wrapper for secret values.
use core::fmt;
use std::{fs, io, path::Path};

const DOCKER_SECRETS_PATH: &str = "/run/secrets/";

/// Read a Docker secret by name, stripping the trailing newline most
/// editors and `docker secret create` leave behind.
pub fn read_secret(name: &str) -> Result<String, io::Error> {
    let secret_val = fs::read_to_string(Path::new(DOCKER_SECRETS_PATH).join(name.to_lowercase()))?;
    Ok(secret_val.trim_end().to_owned())
}

/// A secret string which never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// The underlying secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}
