use crate::error::{ProcuraError, ProcuraResult};
use regex::Regex;
use std::sync::OnceLock;
use validator::{Validate, ValidationErrors};

/// System-wide id convention: short alphanumeric string ids, never raw
/// database object references.
const ENTITY_ID_PATTERN: &str = r"^[A-Za-z0-9_-]{1,50}$";
/// Numeric audit/log-style reference ids.
const NUMERIC_REF_PATTERN: &str = r"^\d{6,12}$";

fn entity_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ENTITY_ID_PATTERN).unwrap())
}

fn numeric_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NUMERIC_REF_PATTERN).unwrap())
}

pub fn validate_model<T: Validate>(model: &T) -> ProcuraResult<()> {
    match model.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let error_messages = format_validation_errors(&errors);
            Err(ProcuraError::validation("model", error_messages))
        }
    }
}

pub fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            let message = match &error.code {
                std::borrow::Cow::Borrowed("email") => "Invalid email format".to_string(),
                std::borrow::Cow::Borrowed("length") => {
                    format!("Length validation failed for field '{}'", field)
                }
                std::borrow::Cow::Borrowed("range") => {
                    format!("Value out of range for field '{}'", field)
                }
                std::borrow::Cow::Borrowed("required") => {
                    format!("Field '{}' is required", field)
                }
                _ => format!("Validation failed for field '{}': {}", field, error.code),
            };
            messages.push(message);
        }
    }

    messages.join(", ")
}

/// Validates a generic cross-entity id (company, vendor, order, ...).
pub fn validate_entity_id(field: &str, id: &str) -> ProcuraResult<()> {
    if !entity_id_regex().is_match(id) {
        return Err(ProcuraError::validation(
            field,
            format!("'{}' is not a valid identifier", id),
        ));
    }
    Ok(())
}

/// Validates a numeric audit/log reference id.
pub fn validate_numeric_ref(field: &str, id: &str) -> ProcuraResult<()> {
    if !numeric_ref_regex().is_match(id) {
        return Err(ProcuraError::validation(
            field,
            format!("'{}' is not a valid numeric reference", id),
        ));
    }
    Ok(())
}

pub fn validate_email_address(email: &str) -> ProcuraResult<()> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .unwrap()
    });

    if !re.is_match(email) {
        return Err(ProcuraError::validation("email", "Invalid email address format"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entity_id() {
        assert!(validate_entity_id("company_id", "CMP-001").is_ok());
        assert!(validate_entity_id("order_id", "ORD_2024_11").is_ok());
        assert!(validate_entity_id("id", "").is_err());
        assert!(validate_entity_id("id", "has spaces").is_err());
        assert!(validate_entity_id("id", &"x".repeat(51)).is_err());
        assert!(validate_entity_id("id", "semi;colon").is_err());
    }

    #[test]
    fn test_validate_numeric_ref() {
        assert!(validate_numeric_ref("ref", "123456").is_ok());
        assert!(validate_numeric_ref("ref", "123456789012").is_ok());
        assert!(validate_numeric_ref("ref", "12345").is_err());
        assert!(validate_numeric_ref("ref", "1234567890123").is_err());
        assert!(validate_numeric_ref("ref", "12345a").is_err());
    }

    #[test]
    fn test_validate_email_address() {
        assert!(validate_email_address("test@example.com").is_ok());
        assert!(validate_email_address("invalid-email").is_err());
        assert!(validate_email_address("@example.com").is_err());
    }
}
