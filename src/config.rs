use crate::error::KrbError;
use serde::Deserialize;
use std::fs;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::error;

pub const DEFAULT_CONFIG_PATH: &str = "/var/heimdal/kdc.conf";

fn default_service() -> String {
    "krbtgt".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The keytab that accumulates every kvno of the extracted principals. Nothing
    /// is done if this is not set.
    pub alt_kvno_keytab: Option<String>,
    #[serde(default)]
    pub databases: Vec<PathBuf>,
    /// Extract `<service>/*@*`
    #[serde(default = "default_service")]
    pub service: String,
}

impl Config {
    pub fn parse<P: AsRef<Path>>(path: P) -> io::Result<Config> {
        let mut contents = String::new();
        let mut f = fs::File::open(&path)?;
        f.read_to_string(&mut contents)?;

        toml::from_str(&contents).map_err(|err| {
            error!(?err);
            io::Error::other("toml parse failure")
        })
    }

    pub fn validate(&self) -> Result<(), KrbError> {
        if self.service.is_empty() {
            error!("service must not be empty");
            return Err(KrbError::ConfigInvalid);
        }
        if self.databases.is_empty() {
            error!("no databases configured");
            return Err(KrbError::ConfigInvalid);
        }
        Ok(())
    }
}
