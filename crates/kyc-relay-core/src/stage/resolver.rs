//! Resolution of a user's current stage from possibly conflicting records.
//!
//! Only timestamps and tier priority matter; status is never consulted, so a
//! terminal stage does not outrank a more recently touched active one.

use super::StageRecord;
use crate::TierStage;
use std::collections::BTreeMap;

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;

/// Determine the single authoritative stage among `records`.
///
/// 1. No records with a known stage: `Unknown`
/// 2. Keep the latest record per stage (ties go to the later one in the slice)
/// 3. One stage left: that stage, whatever its status
/// 4. Otherwise the stage with the greatest `updated_at`
/// 5. Exact tie: the higher tier
pub fn resolve(records: &[StageRecord]) -> TierStage {
    let mut latest: BTreeMap<TierStage, &StageRecord> = BTreeMap::new();

    for record in records.iter().filter(|r| r.stage.is_known()) {
        match latest.get(&record.stage) {
            Some(current) if current.updated_at > record.updated_at => {}
            _ => {
                latest.insert(record.stage, record);
            }
        }
    }

    latest
        .values()
        .max_by_key(|record| (record.updated_at, record.stage))
        .map(|record| record.stage)
        .unwrap_or_default()
}
