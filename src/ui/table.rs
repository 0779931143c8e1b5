use tabled::{settings::Style, Table, Tabled};
use crate::prepare::BatchSummary;
use crate::storage::{NewIssueInstance, RunSummary, StoreStats};

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Table")]
    table: &'static str,
    #[tabled(rename = "Candidates")]
    candidates: usize,
    #[tabled(rename = "Inserted")]
    inserted: usize,
    #[tabled(rename = "Duplicates")]
    duplicates: usize,
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Rows")]
    rows: usize,
    #[tabled(rename = "Counter")]
    counter: String,
}

#[derive(Tabled)]
struct AlarmRow {
    #[tabled(rename = "Code")]
    code: i64,
    #[tabled(rename = "Instances")]
    instances: usize,
}

#[derive(Tabled)]
struct NewIssueRow {
    #[tabled(rename = "Instance")]
    instance_id: i64,
    #[tabled(rename = "Code")]
    code: i64,
    #[tabled(rename = "Callable")]
    callable: String,
    #[tabled(rename = "Location")]
    location: String,
}

/// Per-kind outcome of one ingest, kinds without candidates left out
pub fn summary_table(summary: &BatchSummary) -> String {
    let rows: Vec<SummaryRow> = summary
        .kinds
        .iter()
        .filter(|k| k.candidates > 0)
        .map(|k| SummaryRow {
            table: k.kind.table_name(),
            candidates: k.candidates,
            inserted: k.inserted,
            duplicates: k.duplicates,
        })
        .collect();
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn stats_table(stats: &StoreStats) -> String {
    let rows: Vec<StatsRow> = stats
        .rows
        .iter()
        .map(|(table, count)| StatsRow {
            table: table.clone(),
            rows: *count,
            counter: stats
                .counters
                .get(table)
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn alarm_table(summary: &RunSummary) -> String {
    if summary.alarm_counts.is_empty() {
        return String::new();
    }
    let rows = summary
        .alarm_counts
        .iter()
        .map(|(&code, &instances)| AlarmRow { code, instances });
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn new_issues_table(instances: &[NewIssueInstance]) -> String {
    if instances.is_empty() {
        return String::new();
    }
    let rows = instances.iter().map(|i| NewIssueRow {
        instance_id: i.instance_id,
        code: i.code,
        callable: i.callable.clone(),
        location: match &i.filename {
            Some(filename) => format!("{}:{}", filename, i.location),
            None => i.location.clone(),
        },
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::prepare::KindSummary;
    use std::collections::BTreeMap;

    #[test]
    fn test_summary_table_skips_empty_kinds() {
        let summary = BatchSummary {
            kinds: vec![
                KindSummary {
                    kind: EntityKind::SharedText,
                    candidates: 4,
                    inserted: 3,
                    duplicates: 1,
                },
                KindSummary {
                    kind: EntityKind::TraceFrameLeafAssoc,
                    candidates: 0,
                    inserted: 0,
                    duplicates: 0,
                },
            ],
        };
        let table = summary_table(&summary);
        assert!(table.contains("shared_texts"));
        assert!(table.contains("Duplicates"));
        assert!(!table.contains("trace_frame_leaf_assoc"));

        assert!(summary_table(&BatchSummary::default()).is_empty());
    }

    #[test]
    fn test_stats_table_marks_missing_counters() {
        let stats = StoreStats {
            rows: BTreeMap::from([("issues".to_string(), 2), ("runs".to_string(), 1)]),
            counters: BTreeMap::from([("issues".to_string(), 2)]),
        };
        let table = stats_table(&stats);
        assert!(table.contains("issues"));
        assert!(table.contains(" - "));
    }

    #[test]
    fn test_alarm_table_lists_codes() {
        let summary = RunSummary {
            id: 1,
            job_id: None,
            commit_hash: None,
            status: "finished".to_string(),
            num_new_issues: 1,
            num_total_issues: 3,
            alarm_counts: BTreeMap::from([(5005, 2), (6015, 1)]),
        };
        let table = alarm_table(&summary);
        assert!(table.contains("5005"));
        assert!(table.contains("6015"));

        let empty = RunSummary {
            alarm_counts: BTreeMap::new(),
            ..summary
        };
        assert!(alarm_table(&empty).is_empty());
    }

    #[test]
    fn test_new_issues_table_joins_file_and_location() {
        let instances = vec![NewIssueInstance {
            instance_id: 4,
            handle: "H1".to_string(),
            code: 5005,
            callable: "app.views.search".to_string(),
            filename: Some("app/views.py".to_string()),
            location: "14|4|40".to_string(),
        }];
        assert!(new_issues_table(&instances).contains("app/views.py:14|4|40"));
        assert!(new_issues_table(&[]).is_empty());
    }
}
