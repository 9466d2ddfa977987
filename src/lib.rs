// #![deny(warnings)]

#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

//! Copy newly rotated principal keys out of a KDC database into an alternate kvno
//! keytab. Only kvnos newer than what the keytab already holds are appended, so
//! running it again is always safe.

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod index;
pub mod keyblob;
pub mod keytab;
pub mod principal;
pub mod reconcile;

use database::TomlDatabase;
use error::KrbError;
use keytab::Keytab;
use principal::PrincipalPattern;
use reconcile::{ReconciliationEngine, RunSummary};
use std::path::Path;
use tracing::{error, info, instrument};

pub use constants::EncryptionType;

/// Bring `keytab` up to date with every `<service>/*@*` key held in `databases`.
///
/// The keytab is indexed once, then each database is opened, scanned and closed in
/// turn. A storage error stops the run and leaves whatever was already appended in
/// place, the next run picks up from there.
#[instrument(level = "info", skip_all, fields(keytab = %keytab.name()))]
pub fn reconcile_databases<P: AsRef<Path>>(
    keytab: &Keytab,
    service: &str,
    databases: &[P],
    dry_run: bool,
) -> Result<RunSummary, KrbError> {
    let pattern = PrincipalPattern::service_wildcard(service)?;
    let mut engine = ReconciliationEngine::new(keytab, pattern)?.dry_run(dry_run);
    info!(principals = engine.index().len(), "keytab indexed");

    for path in databases {
        let db = TomlDatabase::open(path).inspect_err(|err| {
            error!(?err, "opening database {}", path.as_ref().display());
        })?;
        engine.scan(&db).inspect_err(|err| {
            error!(?err, "reading from database {}", path.as_ref().display());
        })?;
    }

    Ok(engine.finish())
}
