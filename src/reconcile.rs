use crate::database::{DatabaseEntry, PrincipalDatabase};
use crate::error::KrbError;
use crate::index::VersionIndex;
use crate::keytab::{KeyBlock, Keytab};
use crate::principal::{Name, PrincipalPattern};
use std::collections::BTreeSet;
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip,
    Extract,
}

/// Whether `kvno` of `principal` should be copied into the keytab. Only the
/// snapshot index is consulted, so the answer does not change as the keytab grows.
pub fn decide(
    principal: &Name,
    kvno: u32,
    pattern: &PrincipalPattern,
    index: &VersionIndex,
) -> Action {
    if !pattern.matches(principal) {
        return Action::Skip;
    }
    match index.get(principal) {
        // The keytab is authoritative for any kvno it already has.
        Some(max_kvno) if kvno <= max_kvno => Action::Skip,
        _ => Action::Extract,
    }
}

/// A database entry that could not be extracted. The rest of the run carried on.
#[derive(Debug)]
pub struct EntryFailure {
    pub principal: Name,
    pub kvno: u32,
    pub error: KrbError,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub scanned: usize,
    pub matched: usize,
    pub extracted: usize,
    pub keys_written: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: Vec<EntryFailure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ReconciliationEngine<'a> {
    keytab: &'a Keytab,
    pattern: PrincipalPattern,
    index: VersionIndex,
    // (principal, kvno) pairs extracted by this run.
    written: BTreeSet<(Name, u32)>,
    dry_run: bool,
    summary: RunSummary,
}

impl<'a> ReconciliationEngine<'a> {
    /// Index the keytab as it is right now. That index is used for every decision
    /// this engine makes.
    pub fn new(keytab: &'a Keytab, pattern: PrincipalPattern) -> Result<Self, KrbError> {
        let index = VersionIndex::build(keytab)?;
        Ok(Self::with_index(keytab, pattern, index))
    }

    pub fn with_index(keytab: &'a Keytab, pattern: PrincipalPattern, index: VersionIndex) -> Self {
        ReconciliationEngine {
            keytab,
            pattern,
            index,
            written: BTreeSet::new(),
            dry_run: false,
            summary: RunSummary::default(),
        }
    }

    /// Make every decision but leave the keytab untouched.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn index(&self) -> &VersionIndex {
        &self.index
    }

    pub fn process(&self, entry: &DatabaseEntry) -> Action {
        decide(&entry.principal, entry.kvno, &self.pattern, &self.index)
    }

    /// Decide on and, if accepted, extract one database entry. Only a failure to write
    /// to the keytab is returned as an error, a key that can not be encoded fails
    /// just this entry and is recorded in the summary.
    pub fn handle(&mut self, entry: DatabaseEntry) -> Result<(), KrbError> {
        self.summary.scanned += 1;

        if !self.pattern.matches(&entry.principal) {
            trace!(principal = %entry.principal, "does not match {}", self.pattern);
            self.summary.skipped += 1;
            return Ok(());
        }
        self.summary.matched += 1;

        if self.process(&entry) == Action::Skip {
            debug!(
                principal = %entry.principal,
                kvno = entry.kvno,
                keytab_kvno = ?self.index.get(&entry.principal),
                "already in keytab"
            );
            self.summary.skipped += 1;
            return Ok(());
        }

        let name_type = entry
            .name_type
            .unwrap_or_else(|| entry.principal.name_type());
        let written_key = (entry.principal, entry.kvno);
        if self.written.contains(&written_key) {
            warn!(
                principal = %written_key.0,
                kvno = written_key.1,
                "database yielded this kvno twice, ignoring the repeat"
            );
            self.summary.duplicates += 1;
            return Ok(());
        }
        let (principal, kvno) = written_key;

        // Encode every key before writing any, so a bad key never leaves half an
        // entry behind.
        let key_blocks = match entry
            .keys
            .iter()
            .map(|k| k.to_key_block())
            .collect::<Result<Vec<KeyBlock>, _>>()
        {
            Ok(kbs) => kbs,
            Err(err) => {
                error!(?err, %principal, kvno, "unable to encode key, entry not extracted");
                self.summary.failed.push(EntryFailure {
                    principal,
                    kvno,
                    error: err,
                });
                return Ok(());
            }
        };

        info!(
            %principal,
            kvno,
            keys = key_blocks.len(),
            dry_run = self.dry_run,
            "extracting"
        );

        if !self.dry_run {
            for kb in key_blocks.iter().cloned() {
                self.keytab
                    .append(&principal, name_type, kvno, kb)
                    .inspect_err(|err| {
                        error!(
                            ?err,
                            %principal,
                            kvno,
                            "writing to keytab {}",
                            self.keytab.name()
                        );
                    })?;
            }
        }

        self.summary.extracted += 1;
        self.summary.keys_written += key_blocks.len();
        self.written.insert((principal, kvno));
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(database = %db.name()))]
    pub fn scan(&mut self, db: &dyn PrincipalDatabase) -> Result<(), KrbError> {
        db.for_each(&mut |entry| self.handle(entry))
    }

    pub fn finish(self) -> RunSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PrincipalNameType;
    use crate::keyblob::StoredKey;
    use crate::keytab::KeytabEntry;

    fn tgt_pattern() -> PrincipalPattern {
        PrincipalPattern::service_wildcard("krbtgt").expect("Failed to build pattern")
    }

    fn db_entry(name: &str, kvno: u32) -> DatabaseEntry {
        DatabaseEntry {
            principal: name.parse().expect("Failed to parse name"),
            name_type: None,
            kvno,
            keys: vec![StoredKey::new(18, vec![kvno as u8; 32], None)],
        }
    }

    fn read_all(kt: &Keytab) -> Vec<KeytabEntry> {
        kt.cursor()
            .expect("Failed to open keytab")
            .collect::<Result<_, _>>()
            .expect("Failed to read keytab")
    }

    #[test]
    fn test_decide() {
        let pattern = tgt_pattern();
        let tgt = Name::service_krbtgt("EXAMPLE.COM");
        let other: Name = "other/service@EXAMPLE.COM".parse().expect("parse");

        let mut index = VersionIndex::default();
        assert_eq!(decide(&tgt, 1, &pattern, &index), Action::Extract);
        assert_eq!(decide(&other, 1, &pattern, &index), Action::Skip);

        index.observe(tgt.clone(), 3);
        assert_eq!(decide(&tgt, 2, &pattern, &index), Action::Skip);
        assert_eq!(decide(&tgt, 3, &pattern, &index), Action::Skip);
        assert_eq!(decide(&tgt, 4, &pattern, &index), Action::Extract);

        // Not matching the pattern wins over being newer.
        index.observe(other.clone(), 1);
        assert_eq!(decide(&other, 100, &pattern, &index), Action::Skip);
    }

    #[test]
    fn test_equal_version_skip() {
        let _ = tracing_subscriber::fmt::try_init();

        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let kt = Keytab::File(dir.path().join("alt.keytab"));
        let tgt = Name::service_krbtgt("EXAMPLE.COM");
        kt.append(
            &tgt,
            PrincipalNameType::NtSrvInst,
            3,
            KeyBlock {
                enctype: 18,
                value: vec![3; 32],
            },
        )
        .expect("Failed to seed keytab");

        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern()).expect("Failed to index");
        engine
            .scan(&vec![
                db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 3),
                db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 4),
            ])
            .expect("Failed to scan");
        let summary = engine.finish();

        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.skipped, 1);

        let kvnos: Vec<u32> = read_all(&kt).iter().map(|e| e.kvno).collect();
        assert_eq!(kvnos, vec![3, 4]);
    }

    #[test]
    fn test_index_is_a_snapshot() {
        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let kt = Keytab::File(dir.path().join("alt.keytab"));

        // Versions arrive out of order during a rotation window. 4 is written before 2
        // is seen, but 2 is still new relative to the snapshot.
        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern()).expect("Failed to index");
        engine
            .scan(&vec![
                db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 4),
                db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 2),
            ])
            .expect("Failed to scan");
        assert!(engine.index().is_empty());
        let summary = engine.finish();
        assert_eq!(summary.extracted, 2);

        let kvnos: Vec<u32> = read_all(&kt).iter().map(|e| e.kvno).collect();
        assert_eq!(kvnos, vec![4, 2]);
    }

    #[test]
    fn test_repeated_kvno_written_once() {
        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let kt = Keytab::File(dir.path().join("alt.keytab"));

        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern()).expect("Failed to index");
        engine
            .scan(&vec![
                db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 5),
                db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 5),
            ])
            .expect("Failed to scan");
        let summary = engine.finish();

        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(read_all(&kt).len(), 1);
    }

    #[test]
    fn test_every_key_is_written() {
        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let kt = Keytab::File(dir.path().join("alt.keytab"));

        let entry = DatabaseEntry {
            principal: Name::service_krbtgt("EXAMPLE.COM"),
            name_type: None,
            kvno: 2,
            keys: vec![
                StoredKey::new(18, vec![0x11; 32], Some(1)),
                StoredKey::new(17, vec![0x22; 16], None),
            ],
        };

        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern()).expect("Failed to index");
        engine.handle(entry).expect("Failed to handle entry");
        let summary = engine.finish();
        assert_eq!(summary.keys_written, 2);

        let entries = read_all(&kt);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key.enctype, 0);
        assert_eq!(entries[0].key.value.len(), 40);
        assert_eq!(
            StoredKey::from_key_block(&entries[0].key),
            StoredKey::new(18, vec![0x11; 32], Some(1))
        );
        assert_eq!(entries[1].key.enctype, 17);
        assert_eq!(entries[1].key.value, vec![0x22; 16]);
        assert!(entries.iter().all(|e| e.kvno == 2));
    }

    #[test]
    fn test_bad_key_fails_only_its_entry() {
        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let kt = Keytab::File(dir.path().join("alt.keytab"));

        let oversized = DatabaseEntry {
            principal: "krbtgt/OTHER.ORG@EXAMPLE.COM".parse().expect("parse"),
            name_type: None,
            kvno: 7,
            keys: vec![
                StoredKey::new(17, vec![0; 16], None),
                StoredKey::new(18, vec![0; u16::MAX as usize], Some(1)),
            ],
        };

        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern()).expect("Failed to index");
        engine
            .scan(&vec![oversized, db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 1)])
            .expect("Failed to scan");
        let summary = engine.finish();

        assert!(!summary.is_success());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].kvno, 7);
        assert!(matches!(summary.failed[0].error, KrbError::KeyBlockTooLarge));
        assert_eq!(summary.extracted, 1);

        // Neither key of the failed entry reached the keytab.
        let entries = read_all(&kt);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].principal, Name::service_krbtgt("EXAMPLE.COM"));
    }

    #[test]
    fn test_unencodable_enctype_leaves_no_partial_entry() {
        let _ = tracing_subscriber::fmt::try_init();

        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let kt = Keytab::File(dir.path().join("alt.keytab"));

        let db = vec![
            DatabaseEntry {
                principal: Name::service_krbtgt("EXAMPLE.COM"),
                name_type: None,
                kvno: 2,
                keys: vec![
                    StoredKey::new(17, vec![0x11; 16], None),
                    StoredKey::new(70000, vec![0x22; 16], None),
                ],
            },
            db_entry("krbtgt/OTHER.ORG@EXAMPLE.COM", 1),
        ];

        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern()).expect("Failed to index");
        engine.scan(&db).expect("Failed to scan");
        let summary = engine.finish();

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].kvno, 2);
        assert!(matches!(summary.failed[0].error, KrbError::InvalidEncryptionType));
        assert_eq!(summary.extracted, 1);

        let entries = read_all(&kt);
        assert_eq!(entries.len(), 1);
        let cross: Name = "krbtgt/OTHER.ORG@EXAMPLE.COM".parse().expect("parse");
        assert_eq!(entries[0].principal, cross);

        // Nothing of kvno 2 was indexed, so the next run tries it again rather than
        // skipping it.
        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern()).expect("Failed to index");
        engine.scan(&db).expect("Failed to scan");
        let summary = engine.finish();
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_database_name_type_is_kept() {
        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let kt = Keytab::File(dir.path().join("alt.keytab"));

        let mut with_type = db_entry("host/a.example.com@EXAMPLE.COM", 3);
        with_type.name_type = Some(PrincipalNameType::NtSrvHst);
        let without_type = db_entry("host/b.example.com@EXAMPLE.COM", 1);

        let pattern = PrincipalPattern::service_wildcard("host").expect("Failed to build pattern");
        let mut engine = ReconciliationEngine::new(&kt, pattern).expect("Failed to index");
        engine
            .scan(&vec![with_type, without_type])
            .expect("Failed to scan");
        assert_eq!(engine.finish().extracted, 2);

        let name_types: Vec<PrincipalNameType> =
            read_all(&kt).iter().map(|e| e.name_type).collect();
        assert_eq!(
            name_types,
            vec![PrincipalNameType::NtSrvHst, PrincipalNameType::NtPrincipal]
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        let path = dir.path().join("alt.keytab");
        let kt = Keytab::File(path.clone());

        let mut engine = ReconciliationEngine::new(&kt, tgt_pattern())
            .expect("Failed to index")
            .dry_run(true);
        engine
            .scan(&vec![db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 1)])
            .expect("Failed to scan");
        let summary = engine.finish();

        assert_eq!(summary.extracted, 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("Failed to create temporary dir");
        // A directory can't be appended to.
        let kt = Keytab::File(dir.path().to_path_buf());
        let pattern = tgt_pattern();

        let mut engine = ReconciliationEngine::with_index(&kt, pattern, VersionIndex::default());
        let res = engine.scan(&vec![
            db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 1),
            db_entry("krbtgt/EXAMPLE.COM@EXAMPLE.COM", 2),
        ]);
        assert!(res.is_err());
        let summary = engine.finish();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.extracted, 0);
    }
}
