//! Read-only access to the principal database that keys are extracted from.

use crate::constants::PrincipalNameType;
use crate::error::KrbError;
use crate::keyblob::StoredKey;
use crate::principal::Name;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// One principal record from the database, with every key it holds at `kvno`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub principal: Name,
    // Not every backend records one.
    pub name_type: Option<PrincipalNameType>,
    pub kvno: u32,
    pub keys: Vec<StoredKey>,
}

pub trait PrincipalDatabase {
    fn name(&self) -> String;

    /// Call `handler` once for each record in the database. An error from the handler
    /// stops the scan and is returned as is.
    fn for_each(
        &self,
        handler: &mut dyn FnMut(DatabaseEntry) -> Result<(), KrbError>,
    ) -> Result<(), KrbError>;
}

impl PrincipalDatabase for Vec<DatabaseEntry> {
    fn name(&self) -> String {
        "MEMORY:".to_string()
    }

    fn for_each(
        &self,
        handler: &mut dyn FnMut(DatabaseEntry) -> Result<(), KrbError>,
    ) -> Result<(), KrbError> {
        self.iter().cloned().try_for_each(handler)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyRecord {
    enctype: i32,
    #[serde(deserialize_with = "hex::serde::deserialize")]
    value: Vec<u8>,
    master_kvno: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrincipalRecord {
    name: String,
    name_type: Option<u32>,
    kvno: u32,
    #[serde(default)]
    key: Vec<KeyRecord>,
}

#[derive(Debug, Deserialize)]
struct DatabaseFile {
    #[serde(default)]
    principal: Vec<PrincipalRecord>,
}

/// A principal database dumped to TOML.
///
/// ```toml
/// [[principal]]
/// name = "krbtgt/EXAMPLE.COM@EXAMPLE.COM"
/// name_type = 2
/// kvno = 3
///
/// [[principal.key]]
/// enctype = 18
/// value = "<hex>"
/// master_kvno = 1
/// ```
#[derive(Debug)]
pub struct TomlDatabase {
    path: PathBuf,
    records: Vec<PrincipalRecord>,
}

impl TomlDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KrbError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|io_err| {
            if io_err.kind() == ErrorKind::NotFound {
                error!("Database {} does not exist", path.display());
            } else {
                error!(?io_err, "Unable to read database at {}", path.display());
            }
            KrbError::DatabaseOpen
        })?;

        let db: DatabaseFile = toml::from_str(&contents).map_err(|err| {
            error!(?err, "Unable to parse database at {}", path.display());
            KrbError::DatabaseOpen
        })?;

        debug!(
            records = db.principal.len(),
            "opened database {}",
            path.display()
        );

        Ok(TomlDatabase {
            path: path.to_path_buf(),
            records: db.principal,
        })
    }
}

impl TryFrom<&PrincipalRecord> for DatabaseEntry {
    type Error = KrbError;

    fn try_from(value: &PrincipalRecord) -> Result<Self, Self::Error> {
        let principal = value.name.parse()?;
        let name_type = value
            .name_type
            .map(|nt| {
                PrincipalNameType::try_from(nt).map_err(|err| {
                    error!(?err, name = %value.name, "invalid principal name type");
                    KrbError::PrincipalNameInvalidType
                })
            })
            .transpose()?;
        let keys = value
            .key
            .iter()
            .map(|k| StoredKey::new(k.enctype, k.value.clone(), k.master_kvno))
            .collect();
        Ok(DatabaseEntry {
            principal,
            name_type,
            kvno: value.kvno,
            keys,
        })
    }
}

impl PrincipalDatabase for TomlDatabase {
    fn name(&self) -> String {
        format!("TOML:{}", self.path.display())
    }

    fn for_each(
        &self,
        handler: &mut dyn FnMut(DatabaseEntry) -> Result<(), KrbError>,
    ) -> Result<(), KrbError> {
        for record in &self.records {
            let entry = DatabaseEntry::try_from(record).map_err(|err| {
                error!(?err, name = %record.name, "invalid principal in database");
                KrbError::DatabaseScan
            })?;
            handler(entry)?;
        }
        Ok(())
    }
}
