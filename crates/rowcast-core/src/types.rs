use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of the `name.basics` dataset, the unit the loader moves end to end.
///
/// Year fields stay raw strings because the upstream dump uses `\N` for
/// unknown values and the target columns are text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    pub nconst: String,
    pub primary_name: String,
    pub birth_year: String,
    pub death_year: String,
    pub primary_professions: Vec<String>,
    pub known_for_titles: Vec<String>,
}

impl NameRecord {
    /// Target relation for bulk writes.
    pub const RELATION: &'static str = "names";

    /// Column order for bulk writes; must match the field order of
    /// [`copy::encode_row`](crate::copy::encode_row).
    pub const COLUMNS: [&'static str; 6] = [
        "nconst",
        "primary_name",
        "birth_year",
        "death_year",
        "primary_professions",
        "known_for_titles",
    ];

    pub fn validate(&self) -> Result<(), NameRecordError> {
        if self.nconst.trim().is_empty() {
            return Err(NameRecordError::EmptyNconst);
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameRecordError {
    #[error("nconst must be non-empty")]
    EmptyNconst,
    #[error("expected {expected} tab-separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },
}
