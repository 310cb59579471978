use indexmap::IndexMap;

use crate::change::ChangeSet;
use crate::columns::{JoinSide, MERGE_INDICATOR, split_join_suffix};
use crate::constants::columns::ADMIN_COLUMNS;
use crate::data::{ColumnName, Record, RecordOrigin, RecordSet, Value};

/// Collapses join-shaped rows back into the clean upstream schema.
///
/// For every shared column the upstream (`_x`) variant is kept under the bare
/// name and the remote (`_y`) variant is dropped. The join indicator and the
/// store-managed administrative columns are dropped as well.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnReconciler {
    drop_columns: Vec<ColumnName>,
}

impl Default for ColumnReconciler {
    fn default() -> Self {
        let mut drop_columns = vec![MERGE_INDICATOR.to_string()];
        drop_columns.extend(ADMIN_COLUMNS.iter().map(|key| key.as_str().to_string()));
        Self { drop_columns }
    }
}

impl ColumnReconciler {
    /// Also drop `column` from every reconciled row.
    pub fn with_dropped_column(mut self, column: impl Into<ColumnName>) -> Self {
        let column = column.into();
        if !self.drop_columns.contains(&column) {
            self.drop_columns.push(column);
        }
        self
    }

    /// Columns removed outright.
    pub fn dropped_columns(&self) -> &[ColumnName] {
        &self.drop_columns
    }

    /// Reconcile a change set into upload-ready upstream records.
    pub fn reconcile(&self, change_set: ChangeSet) -> RecordSet {
        let records = change_set
            .rows
            .into_iter()
            .map(|row| self.reconcile_record(row))
            .collect();
        RecordSet::new(RecordOrigin::UpstreamCurrent, records)
    }

    /// Reconcile a single row. A row without suffixed columns only loses the
    /// dropped columns, so reconciling twice is the same as reconciling once.
    pub fn reconcile_record(&self, row: Record) -> Record {
        let mut clean: IndexMap<ColumnName, Value> = IndexMap::new();
        for (column, value) in row.into_columns() {
            if self.is_dropped(&column) {
                continue;
            }
            match split_join_suffix(&column) {
                Some((_, JoinSide::Right)) => continue,
                Some((bare, JoinSide::Left)) => {
                    if !self.is_dropped(bare) {
                        clean.insert(bare.to_string(), value);
                    }
                }
                None => {
                    clean.insert(column, value);
                }
            }
        }
        Record::from_columns(clean)
    }

    /// Strip administrative columns from a remote snapshot so it can be republished.
    pub fn strip_administrative(&self, snapshot: RecordSet) -> RecordSet {
        let origin = snapshot.origin;
        let records = snapshot
            .records
            .into_iter()
            .map(|record| self.reconcile_record(record))
            .collect();
        RecordSet::new(origin, records)
    }

    fn is_dropped(&self, column: &str) -> bool {
        self.drop_columns
            .iter()
            .any(|dropped| dropped.eq_ignore_ascii_case(column))
    }
}
