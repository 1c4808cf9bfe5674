use crate::types::{NameRecord, NameRecordError};

/// Parses one data line of a `name.basics` dump (header line excluded).
///
/// List columns are comma-separated in the dump; the `\N` placeholder is kept
/// verbatim, matching what the feed actually contains.
pub fn parse_line(line: &str) -> Result<NameRecord, NameRecordError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != NameRecord::COLUMNS.len() {
        return Err(NameRecordError::FieldCount {
            expected: NameRecord::COLUMNS.len(),
            found: fields.len(),
        });
    }

    let record = NameRecord {
        nconst: fields[0].to_string(),
        primary_name: fields[1].to_string(),
        birth_year: fields[2].to_string(),
        death_year: fields[3].to_string(),
        primary_professions: split_list(fields[4]),
        known_for_titles: split_list(fields[5]),
    };
    record.validate()?;
    Ok(record)
}

fn split_list(field: &str) -> Vec<String> {
    field.split(',').map(str::to_string).collect()
}
