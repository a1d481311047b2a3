//! Statement-related data models.

use serde::{Deserialize, Serialize};

/// Row offset applied when no bounds are given.
pub const NO_ROW_OFFSET: usize = 0;

/// Row limit applied when no bounds are given.
pub const NO_ROW_LIMIT: usize = usize::MAX;

/// Offset/limit pair constraining which rows a list statement yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl RowBounds {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// First `limit` rows.
    pub fn limit(limit: usize) -> Self {
        Self::new(NO_ROW_OFFSET, limit)
    }

    /// Every row after the first `offset`.
    pub fn offset(offset: usize) -> Self {
        Self::new(offset, NO_ROW_LIMIT)
    }

    /// Whether these bounds let every row through.
    pub fn is_unbounded(&self) -> bool {
        self.offset == NO_ROW_OFFSET && self.limit == NO_ROW_LIMIT
    }
}

impl Default for RowBounds {
    fn default() -> Self {
        Self::new(NO_ROW_OFFSET, NO_ROW_LIMIT)
    }
}

/// Unit-of-work call a statement is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementCall {
    SelectOne,
    SelectList,
    Insert,
    Update,
    Delete,
}

impl StatementCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectOne => "select_one",
            Self::SelectList => "select_list",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Insert, update and delete.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Only list selects honor row bounds.
    pub fn accepts_bounds(&self) -> bool {
        matches!(self, Self::SelectList)
    }
}

impl std::fmt::Display for StatementCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bounds_are_unbounded() {
        assert!(RowBounds::default().is_unbounded());
        assert!(!RowBounds::limit(10).is_unbounded());
        assert_eq!(RowBounds::offset(5).limit, NO_ROW_LIMIT);
    }

    #[test]
    fn test_statement_call_classification() {
        assert!(StatementCall::Insert.is_write());
        assert!(StatementCall::Delete.is_write());
        assert!(!StatementCall::SelectOne.is_write());
        assert!(StatementCall::SelectList.accepts_bounds());
        assert!(!StatementCall::SelectOne.accepts_bounds());
        assert_eq!(StatementCall::Update.to_string(), "update");
    }
}
