//! Best-effort extraction of the existing row from a conflict report.
//!
//! Range-partitioned engines report the conflicting index key in the error
//! text, e.g.
//!
//! ```text
//! Unique index violation on index unique_organization_string_index at index
//! key [5,dup,-8646911284551352320]. It conflicts with row [-8646911284551352320]
//! in table perfstringindexer.
//! ```
//!
//! When the text has another shape the caller falls back to a point read.

use strindex_storage::ConflictDetail;

const CONFLICT_SUFFIX: &str = "]. It conflicts with row";
const INDEX_KEY_MARKER: &str = "at index key [";

/// `(organization_id, string, encoded id)` of the row that won a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingRow {
    pub organization_id: u64,
    pub string: String,
    pub encoded_id: i64,
}

/// Parses the conflicting row out of the message or, failing that, the detail.
pub fn parse_conflict(conflict: &ConflictDetail) -> Option<ConflictingRow> {
    parse_index_key(&conflict.message).or_else(|| conflict.detail.as_deref().and_then(parse_index_key))
}

fn parse_index_key(text: &str) -> Option<ConflictingRow> {
    let start = text
        .find(INDEX_KEY_MARKER)
        .map(|pos| pos + INDEX_KEY_MARKER.len())
        .or_else(|| text.find('[').map(|pos| pos + 1))?;
    let rest = &text[start..];
    let end = rest.find(CONFLICT_SUFFIX).or_else(|| rest.rfind(']'))?;
    let key = &rest[..end];

    // The string may itself contain commas, so split off the outer fields.
    let (organization_id, rest) = key.split_once(',')?;
    let (string, encoded_id) = rest.rsplit_once(',')?;
    Some(ConflictingRow {
        organization_id: organization_id.trim().parse().ok()?,
        string: string.to_string(),
        encoded_id: encoded_id.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spanner_message(key: &str, id: i64) -> String {
        format!(
            "Unique index violation on index unique_organization_string_index at index key [{key},{id}]. \
             It conflicts with row [{id}] in table perfstringindexer."
        )
    }

    #[test]
    fn test_parses_index_key() {
        let conflict = ConflictDetail::new(spanner_message("5,dup", -42));
        assert_eq!(
            parse_conflict(&conflict),
            Some(ConflictingRow {
                organization_id: 5,
                string: "dup".to_string(),
                encoded_id: -42
            })
        );
    }

    #[test]
    fn test_string_with_commas_and_brackets() {
        let conflict = ConflictDetail::new(spanner_message("7,a,b]c", 9));
        let row = parse_conflict(&conflict).unwrap();
        assert_eq!(row.organization_id, 7);
        assert_eq!(row.string, "a,b]c");
        assert_eq!(row.encoded_id, 9);
    }

    #[test]
    fn test_falls_back_to_detail() {
        let conflict = ConflictDetail::new("insert failed").with_detail(spanner_message("1,x", 3));
        assert_eq!(parse_conflict(&conflict).unwrap().string, "x");
    }

    #[test]
    fn test_unrecognised_messages_yield_none() {
        let postgres_style = ConflictDetail::new(
            "duplicate key value violates unique constraint \"unique_organization_string_index\"",
        )
        .with_detail("Key (organization_id, string)=(5, dup) already exists.");
        assert_eq!(parse_conflict(&postgres_style), None);

        let exists = ConflictDetail::new("Row [12] in table perfstringindexer already exists");
        assert_eq!(parse_conflict(&exists), None);

        assert_eq!(parse_conflict(&ConflictDetail::new("")), None);
    }
}
