use crate::types::NameRecord;

/// Encodes one record as a line of Postgres `COPY ... FROM STDIN` text format.
///
/// Field order matches [`NameRecord::COLUMNS`]. List columns are rendered as
/// array literals before the COPY-level escaping is applied, so an element
/// containing a tab or backslash survives both layers.
pub fn encode_row(record: &NameRecord) -> String {
    let mut out = String::with_capacity(96);
    push_escaped(&mut out, &record.nconst);
    out.push('\t');
    push_escaped(&mut out, &record.primary_name);
    out.push('\t');
    push_escaped(&mut out, &record.birth_year);
    out.push('\t');
    push_escaped(&mut out, &record.death_year);
    out.push('\t');
    push_escaped(&mut out, &array_literal(&record.primary_professions));
    out.push('\t');
    push_escaped(&mut out, &array_literal(&record.known_for_titles));
    out.push('\n');
    out
}

fn push_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
}

fn array_literal(values: &[String]) -> String {
    let mut out = String::from("{");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if needs_quoting(value) {
            out.push('"');
            for ch in value.chars() {
                if ch == '"' || ch == '\\' {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out.push('}');
    out
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value
            .chars()
            .any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> NameRecord {
        NameRecord {
            nconst: "nm0000001".to_string(),
            primary_name: "Fred Astaire".to_string(),
            birth_year: "1899".to_string(),
            death_year: "1987".to_string(),
            primary_professions: vec!["actor".to_string(), "soundtrack".to_string()],
            known_for_titles: vec!["tt0072308".to_string(), "tt0050419".to_string()],
        }
    }

    #[test]
    fn encodes_a_plain_row() {
        let got = encode_row(&record());
        assert_eq!(
            got,
            "nm0000001\tFred Astaire\t1899\t1987\t{actor,soundtrack}\t{tt0072308,tt0050419}\n"
        );
    }

    #[test]
    fn escapes_copy_metacharacters() {
        let mut r = record();
        r.primary_name = "Tab\there".to_string();
        r.death_year = "\\N".to_string();
        let got = encode_row(&r);
        assert!(got.contains("Tab\\there"));
        assert!(got.contains("\t\\\\N\t"));
    }

    #[test]
    fn quotes_array_elements_with_separators() {
        let mut r = record();
        r.primary_professions = vec!["actor, retired".to_string(), "writer".to_string()];
        let got = encode_row(&r);
        assert!(got.contains("{\"actor, retired\",writer}"));
    }

    #[test]
    fn quotes_empty_and_null_like_elements() {
        assert_eq!(
            array_literal(&["".to_string(), "NULL".to_string()]),
            "{\"\",\"NULL\"}"
        );
    }

    #[test]
    fn empty_list_is_an_empty_array() {
        assert_eq!(array_literal(&[]), "{}");
    }

    #[test]
    fn array_quoting_survives_copy_escaping() {
        let mut r = record();
        r.known_for_titles = vec!["tt1\ttab".to_string()];
        let got = encode_row(&r);
        // Inner array quoting first, COPY escaping second.
        assert!(got.ends_with("{\"tt1\\ttab\"}\n"));
    }
}
