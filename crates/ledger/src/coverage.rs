use std::collections::{BTreeMap, BTreeSet};

use tlc_core::{CoverageRecord, PartitionKey, Service};
use tracing::info;

use crate::error::LedgerError;
use crate::store::LedgerStore;

/// What a merge did, counted per distinct key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Keys that had no record before.
    pub inserted: usize,
    /// Keys whose record was overwritten.
    pub replaced: usize,
    /// Incoming records older than the stored one, discarded.
    pub kept_existing: usize,
    /// Stored keys absent from the incoming set.
    pub untouched: usize,
}

/// Keep the record with the latest `checked_at`; on a tie the later arrival wins.
fn supersedes(incoming: &CoverageRecord, current: &CoverageRecord) -> bool {
    incoming.checked_at >= current.checked_at
}

fn index(records: impl IntoIterator<Item = CoverageRecord>) -> BTreeMap<PartitionKey, CoverageRecord> {
    let mut map: BTreeMap<PartitionKey, CoverageRecord> = BTreeMap::new();
    for record in records {
        match map.get(&record.key) {
            Some(current) if !supersedes(&record, current) => {}
            _ => {
                map.insert(record.key, record);
            }
        }
    }
    map
}

/// Upsert `incoming` over `existing`. Keys not in `incoming` are left as they
/// are. The result is sorted by key.
pub fn merge_records(
    existing: Vec<CoverageRecord>,
    incoming: &[CoverageRecord],
) -> (Vec<CoverageRecord>, MergeSummary) {
    let mut merged = index(existing);
    let winners = index(incoming.iter().cloned());
    let touched: BTreeSet<PartitionKey> = winners.keys().copied().collect();

    let mut summary = MergeSummary {
        untouched: merged.keys().filter(|k| !touched.contains(k)).count(),
        ..MergeSummary::default()
    };

    for (key, record) in winners {
        match merged.get(&key) {
            None => {
                summary.inserted += 1;
                merged.insert(key, record);
            }
            Some(current) if supersedes(&record, current) => {
                summary.replaced += 1;
                merged.insert(key, record);
            }
            Some(_) => summary.kept_existing += 1,
        }
    }

    (merged.into_values().collect(), summary)
}

/// Coverage totals for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceCoverage {
    pub available: usize,
    pub missing: usize,
    pub errors: usize,
}

pub fn summarize_by_service(records: &[CoverageRecord]) -> BTreeMap<Service, ServiceCoverage> {
    let mut out: BTreeMap<Service, ServiceCoverage> = BTreeMap::new();
    for record in records {
        let entry = out.entry(record.key.service()).or_default();
        if record.is_available {
            entry.available += 1;
        } else if record.is_error() {
            entry.errors += 1;
        } else {
            entry.missing += 1;
        }
    }
    out
}

/// Persisted coverage ledger over a [`LedgerStore`].
#[derive(Debug)]
pub struct CoverageLedger<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> CoverageLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current records, one per key, sorted by key.
    pub fn load(&self) -> Result<Vec<CoverageRecord>, LedgerError> {
        Ok(index(self.store.load()?).into_values().collect())
    }

    /// Upsert fresh probe results, preserving records for unprobed keys.
    pub fn merge(&self, records: &[CoverageRecord]) -> Result<MergeSummary, LedgerError> {
        let existing = self.store.load()?;
        let (merged, summary) = merge_records(existing, records);
        self.store.save(&merged)?;
        info!(
            inserted = summary.inserted,
            replaced = summary.replaced,
            kept_existing = summary.kept_existing,
            untouched = summary.untouched,
            "Coverage ledger merged ({} records)",
            merged.len()
        );
        Ok(summary)
    }

    /// Discard everything and persist `records` as the whole ledger.
    pub fn replace_all(&self, records: &[CoverageRecord]) -> Result<usize, LedgerError> {
        let rebuilt: Vec<CoverageRecord> = index(records.iter().cloned()).into_values().collect();
        self.store.save(&rebuilt)?;
        info!("Coverage ledger rebuilt ({} records)", rebuilt.len());
        Ok(rebuilt.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn rec(service: Service, month: u32, available: bool, checked: i64) -> CoverageRecord {
        let key = PartitionKey::new(service, 2024, month).unwrap();
        CoverageRecord {
            key,
            source_url: format!("u/{}", key.file_name()),
            is_available: available,
            probe_status_code: Some(if available { 200 } else { 404 }),
            content_length: None,
            checked_at: at(checked),
            note: if available { None } else { Some("missing".into()) },
        }
    }

    #[test]
    fn merge_leaves_unprobed_keys_alone() {
        let existing = vec![
            rec(Service::Yellow, 1, true, 0),
            rec(Service::Yellow, 2, false, 0),
            rec(Service::Green, 1, true, 0),
        ];
        let incoming = vec![rec(Service::Yellow, 2, true, 10), rec(Service::Yellow, 3, true, 10)];

        let (merged, summary) = merge_records(existing.clone(), &incoming);

        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0], existing[0]);
        assert_eq!(merged[1], incoming[0]);
        assert_eq!(merged[2], incoming[1]);
        assert_eq!(merged[3], existing[2]);
        assert_eq!(
            summary,
            MergeSummary {
                inserted: 1,
                replaced: 1,
                kept_existing: 0,
                untouched: 2
            }
        );
    }

    #[test]
    fn older_incoming_does_not_win() {
        let existing = vec![rec(Service::Green, 5, true, 100)];
        let incoming = vec![rec(Service::Green, 5, false, 50)];
        let (merged, summary) = merge_records(existing.clone(), &incoming);
        assert_eq!(merged, existing);
        assert_eq!(summary.kept_existing, 1);
    }

    #[test]
    fn equal_timestamps_prefer_the_later_arrival() {
        let existing = vec![rec(Service::Green, 5, true, 100)];
        let incoming = vec![
            rec(Service::Green, 5, false, 100),
            rec(Service::Green, 5, true, 100),
        ];
        let (merged, summary) = merge_records(existing, &incoming);
        assert_eq!(merged, vec![incoming[1].clone()]);
        assert_eq!(summary.replaced, 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let incoming = vec![rec(Service::Yellow, 1, true, 5), rec(Service::Green, 12, false, 5)];
        let (once, _) = merge_records(Vec::new(), &incoming);
        let (twice, summary) = merge_records(once.clone(), &incoming);
        assert_eq!(once, twice);
        assert_eq!(summary.replaced, 2);
        assert_eq!(summary.inserted, 0);
    }

    #[test]
    fn service_summary_splits_errors() {
        let mut err = rec(Service::Yellow, 4, false, 0);
        err.note = Some("error:timeout".into());
        err.probe_status_code = None;
        let records = vec![rec(Service::Yellow, 1, true, 0), rec(Service::Yellow, 2, false, 0), err];
        let summary = summarize_by_service(&records);
        assert_eq!(
            summary[&Service::Yellow],
            ServiceCoverage {
                available: 1,
                missing: 1,
                errors: 1
            }
        );
        assert!(!summary.contains_key(&Service::Green));
    }
}
