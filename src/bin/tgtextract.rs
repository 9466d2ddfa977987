#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::manual_let_else)]

use clap::Parser;
use kvnosync::config::{Config, DEFAULT_CONFIG_PATH};
use kvnosync::keytab::Keytab;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, clap::Parser)]
#[clap(about = "Append new kvnos of the krbtgt keys to the alternate kvno keytab")]
struct OptParser {
    #[clap(short, long, env = "KVNOSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Use this keytab instead of alt_kvno_keytab from the config.
    #[clap(short, long)]
    keytab: Option<String>,
    /// Report what would be extracted without writing to the keytab.
    #[clap(long)]
    dry_run: bool,
}

fn main() -> Result<(), ()> {
    // stdout is left to whatever runs us, diagnostics go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let opt = OptParser::parse();

    let cfg = Config::parse(&opt.config).map_err(|e| {
        error!("Could not parse config file {:?}: {:?}", opt.config, e);
    })?;

    let Some(kt_name) = opt.keytab.or_else(|| cfg.alt_kvno_keytab.clone()) else {
        info!("alt_kvno_keytab not set");
        return Ok(());
    };
    info!("    keytab: {}", kt_name);

    cfg.validate().map_err(|e| {
        error!("Invalid config file {:?}: {:?}", opt.config, e);
    })?;

    let keytab = Keytab::resolve(&kt_name).map_err(|e| {
        error!("opening keytab {}: {:?}", kt_name, e);
    })?;

    let summary = kvnosync::reconcile_databases(&keytab, &cfg.service, &cfg.databases, opt.dry_run)
        .map_err(|e| {
            error!("Could not extract keys to keytab {}: {:?}", kt_name, e);
        })?;

    info!(
        scanned = summary.scanned,
        matched = summary.matched,
        extracted = summary.extracted,
        keys_written = summary.keys_written,
        skipped = summary.skipped,
        duplicates = summary.duplicates,
        failed = summary.failed.len(),
        "run complete"
    );

    if !summary.is_success() {
        for f in &summary.failed {
            warn!(principal = %f.principal, kvno = f.kvno, error = ?f.error, "not extracted");
        }
        return Err(());
    }

    Ok(())
}
