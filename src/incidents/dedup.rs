use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::incidents::IncidentRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fields: Vec<String>,
    pub row_ids: Vec<usize>,
}

impl DuplicateGroup {
    pub fn count(&self) -> usize {
        self.row_ids.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Rows beyond the first in each group.
    pub fn redundant_rows(&self) -> usize {
        self.groups.iter().map(|g| g.count() - 1).sum()
    }
}

/// Reports rows identical across every raw column. The input is left as is;
/// duplicates are surfaced for manual review, not removed.
pub fn find_duplicates(records: &[IncidentRecord]) -> DuplicateReport {
    let mut first_seen: HashMap<&[String], usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let mut group_of: Vec<Option<usize>> = Vec::new();

    for record in records {
        let key = record.fields.as_slice();
        match first_seen.get(key) {
            Some(&first_pos) => {
                let group_idx = match group_of[first_pos] {
                    Some(idx) => idx,
                    None => {
                        groups.push(DuplicateGroup {
                            fields: records[first_pos].fields.clone(),
                            row_ids: vec![records[first_pos].id],
                        });
                        let idx = groups.len() - 1;
                        group_of[first_pos] = Some(idx);
                        idx
                    }
                };
                groups[group_idx].row_ids.push(record.id);
                group_of.push(None);
            }
            None => {
                first_seen.insert(key, group_of.len());
                group_of.push(None);
            }
        }
    }

    let report = DuplicateReport { groups };
    if !report.is_empty() {
        warn!(
            "found {} duplicate groups ({} redundant rows); left in place for review",
            report.groups.len(),
            report.redundant_rows()
        );
    }
    report
}
