mod kt_file;

use crate::constants::PrincipalNameType;
use crate::error::KrbError;
use crate::principal::Name;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

pub use self::kt_file::KeytabCursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    pub enctype: i32,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    pub principal: Name,
    pub name_type: PrincipalNameType,
    // Seconds since the epoch at which the key was written to the keytab.
    pub timestamp: u32,
    pub kvno: u32,
    pub key: KeyBlock,
}

impl KeytabEntry {
    /// An entry stamped with the current time. The name type is inferred from the
    /// principal, set `name_type` afterwards if the real one is known.
    pub fn new(principal: Name, kvno: u32, key: KeyBlock) -> Result<Self, KrbError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| KrbError::DoYouHaveATimeMachine)?
            .as_secs();
        // Not 2106 safe, but neither is the keytab format.
        let timestamp = u32::try_from(timestamp).map_err(|_| KrbError::DoYouHaveATimeMachine)?;

        Ok(KeytabEntry {
            name_type: principal.name_type(),
            principal,
            timestamp,
            kvno,
            key,
        })
    }
}

#[derive(Debug)]
pub enum Keytab {
    File(PathBuf),
}

impl Keytab {
    /// Resolve a keytab name such as `FILE:/etc/krb5.keytab`. A bare absolute path is
    /// taken to be a file keytab.
    pub fn resolve(kt_name: &str) -> Result<Self, KrbError> {
        if let Some(path) = kt_name.strip_prefix("FILE:") {
            return Ok(Keytab::File(PathBuf::from(path)));
        }
        if kt_name.starts_with('/') {
            return Ok(Keytab::File(PathBuf::from(kt_name)));
        }
        error!(%kt_name, "Unsupported keytab type");
        Err(KrbError::UnsupportedKeytabType)
    }

    pub fn name(&self) -> String {
        match self {
            Keytab::File(path) => format!("FILE:{}", path.display()),
        }
    }

    /// Start a sequential read over the entries currently in the keytab. A keytab
    /// that does not exist yet reads as empty.
    pub fn cursor(&self) -> Result<KeytabCursor, KrbError> {
        match self {
            Keytab::File(path) => KeytabCursor::open(path),
        }
    }

    /// Append a single entry to the end of the keytab, creating it if needed.
    pub fn add_entry(&self, entry: &KeytabEntry) -> Result<(), KrbError> {
        match self {
            Keytab::File(path) => kt_file::append(path, entry),
        }
    }

    /// Stamp a key with the current time and append it. Nothing is rolled back if
    /// the write fails part way.
    pub fn append(
        &self,
        principal: &Name,
        name_type: PrincipalNameType,
        kvno: u32,
        key: KeyBlock,
    ) -> Result<(), KrbError> {
        let entry = KeytabEntry {
            name_type,
            ..KeytabEntry::new(principal.clone(), kvno, key)?
        };
        self.add_entry(&entry)
    }
}
