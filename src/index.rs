use crate::error::KrbError;
use crate::keytab::Keytab;
use crate::principal::Name;
use std::collections::BTreeMap;
use tracing::{debug, error, instrument, trace};

/// The highest kvno already present in a keytab, per principal. Principals that
/// have no entries in the keytab are absent.
#[derive(Debug, Default, Clone)]
pub struct VersionIndex {
    max_kvno: BTreeMap<Name, u32>,
}

impl VersionIndex {
    /// Read every entry in the keytab once. A keytab with no entries, including one
    /// that does not exist yet, gives an empty index.
    #[instrument(level = "debug", skip_all, fields(keytab = %keytab.name()))]
    pub fn build(keytab: &Keytab) -> Result<Self, KrbError> {
        let mut index = VersionIndex::default();
        let mut n_keys: usize = 0;

        let cursor = keytab.cursor().inspect_err(|err| {
            error!(?err, "reading from keytab");
        })?;

        for entry in cursor {
            let entry = entry.inspect_err(|err| {
                error!(?err, "reading from keytab");
            })?;
            trace!(principal = %entry.principal, kvno = entry.kvno);
            index.observe(entry.principal, entry.kvno);
            n_keys += 1;
        }

        debug!(n_keys, n_principals = index.len(), "keytab indexed");
        Ok(index)
    }

    pub fn observe(&mut self, principal: Name, kvno: u32) {
        self.max_kvno
            .entry(principal)
            .and_modify(|max| *max = (*max).max(kvno))
            .or_insert(kvno);
    }

    pub fn get(&self, principal: &Name) -> Option<u32> {
        self.max_kvno.get(principal).copied()
    }

    pub fn len(&self) -> usize {
        self.max_kvno.len()
    }

    pub fn is_empty(&self) -> bool {
        self.max_kvno.is_empty()
    }
}
