use std::fmt;

pub use crate::constants::join::{LEFT_SUFFIX, MERGE_INDICATOR, RIGHT_SUFFIX};

/// Canonical identifier for a column of the EMS record contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    name: &'static str,
}

impl ColumnKey {
    /// Create a column key with a canonical static name.
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Return the raw column name.
    pub const fn as_str(&self) -> &'static str {
        self.name
    }

    /// Name of this column as it appears on one side of a join (e.g., `RESULT_x`).
    pub fn suffixed(&self, suffix: &str) -> String {
        format!("{}{}", self.name, suffix)
    }

    /// True when `column` names this column, ignoring ASCII case.
    pub fn matches(&self, column: &str) -> bool {
        column.eq_ignore_ascii_case(self.name)
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Which side of a join a suffixed column came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinSide {
    /// Upstream (left) variant.
    Left,
    /// Remote-store (right) variant.
    Right,
}

/// Split a join-suffixed column into its bare name and side.
///
/// Returns `None` for columns without a join suffix, or when stripping would
/// leave an empty name.
pub fn split_join_suffix(column: &str) -> Option<(&str, JoinSide)> {
    if let Some(bare) = column.strip_suffix(LEFT_SUFFIX)
        && !bare.is_empty()
    {
        return Some((bare, JoinSide::Left));
    }
    if let Some(bare) = column.strip_suffix(RIGHT_SUFFIX)
        && !bare.is_empty()
    {
        return Some((bare, JoinSide::Right));
    }
    None
}
