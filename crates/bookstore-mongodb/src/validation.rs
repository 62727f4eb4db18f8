//! Name validation for query descriptors
//!
//! Collection and field names are checked when a descriptor is built, so a
//! malformed query fails before it is ever sent to the store.

use bookstore_common::{BookstoreError, Result};
use tracing::warn;

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Validated collection name
///
/// # Guarantees
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(BookstoreError::Validation(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(BookstoreError::Validation(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(BookstoreError::Validation(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(BookstoreError::Validation(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(BookstoreError::Validation(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") || name.contains("//") {
            warn!("Collection name contains suspicious pattern: '{}'", name);
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validated field path (dotted paths allowed)
///
/// # Guarantees
/// - Not empty, no empty path segments
/// - Maximum 1024 characters
/// - No null bytes
/// - No $ prefix, so a field can never be read as an operator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(BookstoreError::Validation(
                "Field name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(BookstoreError::Validation(format!(
                "Field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(BookstoreError::Validation(
                "Field name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with('$') {
            return Err(BookstoreError::Validation(format!(
                "Field name cannot start with '$' (reserved for operators): '{}'",
                name
            )));
        }

        if name.split('.').any(str::is_empty) {
            return Err(BookstoreError::Validation(format!(
                "Field path contains an empty segment: '{}'",
                name
            )));
        }

        Ok(ValidatedFieldName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The `$field` form used to reference this field inside aggregation expressions
    pub fn as_expression(&self) -> String {
        format!("${}", self.name)
    }
}

impl AsRef<str> for ValidatedFieldName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validate the name of a field produced by an aggregation stage
///
/// Output names are top-level: no `$` prefix and no dots.
pub fn validate_output_name(name: &str) -> Result<String> {
    let field = ValidatedFieldName::new(name)?;
    if field.as_str().contains('.') {
        return Err(BookstoreError::Validation(format!(
            "Output field name cannot contain '.': '{}'",
            name
        )));
    }
    Ok(field.name)
}
