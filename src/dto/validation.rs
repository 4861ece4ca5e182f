//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a join code only holds ASCII letters and digits.
///
/// Case is ignored: codes are upper-cased before lookup.
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    let trimmed = code.trim();
    if !(4..=12).contains(&trimmed.len()) {
        let mut err = ValidationError::new("join_code_length");
        err.message = Some(
            format!("Join code must be 4 to 12 characters (got {})", trimmed.len()).into(),
        );
        return Err(err);
    }

    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Rejects identifiers that are blank once trimmed.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}
