//! Server-side input checks run before any mutation.

use crate::errors::CountersignError;
use std::collections::HashSet;

pub const MAX_FILE_NAME_LEN: usize = 255;
pub const MAX_CONSENTED_NAME_LEN: usize = 200;

/// Trimmed value of a required text field.
pub fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, CountersignError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CountersignError::Validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

pub fn max_len(field: &str, value: &str, max: usize) -> Result<(), CountersignError> {
    if value.chars().count() > max {
        return Err(CountersignError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

/// Relative store path made of plain segments: no `..`, no leading slash, no
/// backslashes or control characters.
pub fn storage_path<'a>(field: &str, value: &'a str) -> Result<&'a str, CountersignError> {
    let path = required(field, value)?;
    let invalid = path.starts_with('/')
        || path.contains('\\')
        || path.chars().any(char::is_control)
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(CountersignError::Validation(format!(
            "{field} is not a valid document path"
        )));
    }
    Ok(path)
}

/// Trims ids, drops blanks and duplicates (first occurrence wins) and
/// requires at least one to remain.
pub fn distinct_ids(field: &str, ids: &[String]) -> Result<Vec<String>, CountersignError> {
    let mut seen = HashSet::new();
    let distinct: Vec<String> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect();

    if distinct.is_empty() {
        return Err(CountersignError::Validation(format!(
            "{field} must contain at least one id"
        )));
    }
    Ok(distinct)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("consentedName", "  Jane Doe ").unwrap(), "Jane Doe");
        assert!(matches!(
            required("consentedName", "   "),
            Err(CountersignError::Validation(msg)) if msg == "consentedName is required"
        ));
    }

    #[test]
    fn test_max_len_counts_characters() {
        assert!(max_len("name", "ééé", 3).is_ok());
        assert!(max_len("name", "éééé", 3).is_err());
    }

    #[test]
    fn test_storage_path_rejects_traversal() {
        assert!(storage_path("filePath", "consent-documents/abc-nda.pdf").is_ok());
        assert!(storage_path("filePath", "../etc/passwd").is_err());
        assert!(storage_path("filePath", "consent-documents/../../x").is_err());
        assert!(storage_path("filePath", "/abs/path.pdf").is_err());
        assert!(storage_path("filePath", "a//b.pdf").is_err());
        assert!(storage_path("filePath", "a\\b.pdf").is_err());
        assert!(storage_path("filePath", "").is_err());
    }

    #[test]
    fn test_distinct_ids_dedupes_in_order() {
        let result = distinct_ids("recipientIds", &ids(&["b", " a", "b", "", "a ", "c"])).unwrap();
        assert_eq!(result, ids(&["b", "a", "c"]));
    }

    #[test]
    fn test_distinct_ids_requires_one() {
        assert!(distinct_ids("recipientIds", &[]).is_err());
        assert!(distinct_ids("recipientIds", &ids(&["", "  "])).is_err());
    }
}
