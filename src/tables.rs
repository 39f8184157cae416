//! Ambient table resolution for the capture surface.
//!
//! Priority: explicit numeric id, then human-readable label, then nothing
//! (the surface must prompt). The id often arrives before the table list has
//! loaded, so resolution re-runs every time the candidate list refreshes.
//! The last resolved table is persisted and becomes the initial hint on the
//! next start.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::{self, DbState, RecordLoad};

const SELECTION_RECORD_KEY: &str = "active_table";
const SELECTION_RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCandidate {
    pub id: i64,
    pub label: String,
}

impl TableCandidate {
    pub fn new(id: i64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// What the capture surface was entered with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHint {
    pub id: Option<i64>,
    pub label: Option<String>,
}

impl TableHint {
    /// All-digit input is an id, anything else non-blank is a label.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        match trimmed.parse::<i64>() {
            Ok(id) if trimmed.bytes().all(|b| b.is_ascii_digit()) => Self {
                id: Some(id),
                label: None,
            },
            _ => Self {
                id: None,
                label: Some(trimmed.to_string()),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.label.as_deref().map_or(true, |l| l.trim().is_empty())
    }
}

impl From<&TableCandidate> for TableHint {
    fn from(table: &TableCandidate) -> Self {
        Self {
            id: Some(table.id),
            label: Some(table.label.clone()),
        }
    }
}

pub fn resolve_table<'a>(
    hint: &TableHint,
    candidates: &'a [TableCandidate],
) -> Option<&'a TableCandidate> {
    if let Some(id) = hint.id {
        if let Some(found) = candidates.iter().find(|t| t.id == id) {
            return Some(found);
        }
    }
    let label = hint.label.as_deref().map(str::trim).filter(|l| !l.is_empty())?;
    candidates
        .iter()
        .find(|t| t.label.trim().eq_ignore_ascii_case(label))
}

pub struct TableResolver {
    db: Arc<DbState>,
    hint: TableHint,
    candidates: Vec<TableCandidate>,
    current: Option<TableCandidate>,
}

impl TableResolver {
    pub fn open(db: Arc<DbState>) -> Self {
        let restored = match db.lock() {
            Ok(conn) => {
                match db::read_record::<Option<TableCandidate>>(
                    &conn,
                    SELECTION_RECORD_KEY,
                    SELECTION_RECORD_VERSION,
                ) {
                    RecordLoad::Loaded(table) => table,
                    RecordLoad::Missing => None,
                    RecordLoad::Reset(reason) => {
                        warn!(%reason, "Active table record unreadable, resetting");
                        if let Err(e) = db::write_record(
                            &conn,
                            SELECTION_RECORD_KEY,
                            SELECTION_RECORD_VERSION,
                            &Option::<TableCandidate>::None,
                        ) {
                            warn!("Failed to reset active table record: {e}");
                        }
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Active table record unavailable: {e}");
                None
            }
        };

        Self {
            db,
            hint: restored.as_ref().map(TableHint::from).unwrap_or_default(),
            candidates: Vec::new(),
            current: None,
        }
    }

    /// Capture-surface entry. A non-empty hint replaces the restored one.
    pub fn enter(&mut self, hint: TableHint) -> Option<&TableCandidate> {
        if !hint.is_empty() {
            self.hint = hint;
        }
        self.rerun()
    }

    /// The candidate table list loaded or changed.
    pub fn refresh_candidates(&mut self, candidates: Vec<TableCandidate>) -> Option<&TableCandidate> {
        self.candidates = candidates;
        self.rerun()
    }

    /// Staff answered the prompt.
    pub fn select(&mut self, table: TableCandidate) {
        self.hint = TableHint::from(&table);
        self.set_current(Some(table));
    }

    pub fn current(&self) -> Option<&TableCandidate> {
        self.current.as_ref()
    }

    pub fn needs_prompt(&self) -> bool {
        self.current.is_none()
    }

    fn rerun(&mut self) -> Option<&TableCandidate> {
        let resolved = resolve_table(&self.hint, &self.candidates).cloned();
        debug!(
            hint_id = ?self.hint.id,
            hint_label = ?self.hint.label,
            candidates = self.candidates.len(),
            resolved = ?resolved.as_ref().map(|t| t.id),
            "Table resolution"
        );
        // An unresolved hint keeps the previous pick until the list says otherwise.
        if resolved.is_some() || !self.candidates.is_empty() {
            self.set_current(resolved);
        }
        self.current.as_ref()
    }

    fn set_current(&mut self, table: Option<TableCandidate>) {
        if self.current == table {
            return;
        }
        self.current = table;
        // A cleared selection is persisted too, so it is not restored on restart.
        let result = self.db.lock().and_then(|conn| {
            db::write_record(
                &conn,
                SELECTION_RECORD_KEY,
                SELECTION_RECORD_VERSION,
                &self.current,
            )
        });
        if let Err(e) = result {
            warn!("Failed to persist active table: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Arc<DbState> {
        Arc::new(DbState::open_in_memory().expect("open in-memory db"))
    }

    fn floor() -> Vec<TableCandidate> {
        vec![
            TableCandidate::new(1, "T1"),
            TableCandidate::new(12, "Patio 2"),
            TableCandidate::new(30, "12"),
        ]
    }

    #[test]
    fn test_hint_parse() {
        assert_eq!(TableHint::parse(" 12 ").id, Some(12));
        assert_eq!(TableHint::parse("Patio 2").label.as_deref(), Some("Patio 2"));
        assert_eq!(TableHint::parse("-3").label.as_deref(), Some("-3"));
        assert!(TableHint::parse("  ").is_empty());
    }

    #[test]
    fn test_id_beats_label() {
        let tables = floor();
        let hint = TableHint {
            id: Some(12),
            label: Some("T1".into()),
        };
        assert_eq!(resolve_table(&hint, &tables).map(|t| t.id), Some(12));

        let unknown_id = TableHint {
            id: Some(99),
            label: Some("t1".into()),
        };
        assert_eq!(resolve_table(&unknown_id, &tables).map(|t| t.id), Some(1));

        assert_eq!(resolve_table(&TableHint::default(), &tables), None);
    }

    #[test]
    fn test_resolution_reruns_when_tables_load() {
        let mut resolver = TableResolver::open(test_db());
        assert!(resolver.enter(TableHint::parse("12")).is_none());
        assert!(resolver.needs_prompt());

        let resolved = resolver.refresh_candidates(floor()).cloned();
        assert_eq!(resolved, Some(TableCandidate::new(12, "Patio 2")));

        let without_12 = vec![TableCandidate::new(1, "T1")];
        assert!(resolver.refresh_candidates(without_12).is_none());
    }

    #[test]
    fn test_selection_restored_on_next_open() {
        let db = test_db();
        {
            let mut resolver = TableResolver::open(db.clone());
            resolver.refresh_candidates(floor());
            resolver.select(TableCandidate::new(30, "12"));
        }

        let mut resolver = TableResolver::open(db.clone());
        assert_eq!(resolver.refresh_candidates(floor()).map(|t| t.id), Some(30));

        // An explicit hint still overrides the restored selection.
        assert_eq!(resolver.enter(TableHint::parse("1")).map(|t| t.id), Some(1));
    }

    #[test]
    fn test_cleared_selection_is_not_restored() {
        let db = test_db();
        {
            let mut resolver = TableResolver::open(db.clone());
            resolver.enter(TableHint::parse("12"));
            assert_eq!(resolver.refresh_candidates(floor()).map(|t| t.id), Some(12));
            // Table 12 is gone from the floor plan; the selection clears.
            assert!(resolver
                .refresh_candidates(vec![TableCandidate::new(1, "T1")])
                .is_none());
        }

        let mut resolver = TableResolver::open(db);
        assert!(resolver.refresh_candidates(floor()).is_none());
        assert!(resolver.needs_prompt());
    }

    #[test]
    fn test_corrupt_selection_record_resets() {
        let db = test_db();
        {
            let conn = db.lock().unwrap();
            db::set_setting(&conn, "local", SELECTION_RECORD_KEY, "garbage").unwrap();
        }
        let mut resolver = TableResolver::open(db);
        assert!(resolver.refresh_candidates(floor()).is_none());
    }
}
