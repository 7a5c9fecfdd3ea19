use sqlx::types::BigDecimal;
use std::fmt;

use crate::domain::ORDER_REF_PREFIX;

pub const METHOD_CODE_MAX_LEN: usize = 8;
pub const ORDER_REF_MAX_LEN: usize = 64;
pub const NOTES_MAX_LEN: usize = 500;
pub const SIGNATURE_MAX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_method_code(method_code: &str) -> ValidationResult {
    validate_required("method_code", method_code)?;
    validate_max_len("method_code", method_code, METHOD_CODE_MAX_LEN)?;

    if !method_code
        .chars()
        .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
    {
        return Err(ValidationError::new(
            "method_code",
            "must contain only uppercase letters and digits",
        ));
    }

    Ok(())
}

pub fn validate_item_id(item_id: i64) -> ValidationResult {
    if item_id <= 0 {
        return Err(ValidationError::new("item_id", "must be a positive id"));
    }

    Ok(())
}

pub fn validate_order_ref(order_ref: &str) -> ValidationResult {
    validate_required("order_ref", order_ref)?;
    validate_max_len("order_ref", order_ref, ORDER_REF_MAX_LEN)?;

    if !order_ref.starts_with(ORDER_REF_PREFIX) {
        return Err(ValidationError::new(
            "order_ref",
            format!("must start with '{}'", ORDER_REF_PREFIX),
        ));
    }

    Ok(())
}

/// Notes are mandatory on administrative overrides.
pub fn validate_notes(notes: &str) -> ValidationResult {
    let notes = sanitize_string(notes);
    validate_required("notes", &notes)?;
    validate_max_len("notes", &notes, NOTES_MAX_LEN)
}

pub fn validate_signature_format(signature: &str) -> ValidationResult {
    validate_required("signature", signature)?;
    validate_max_len("signature", signature, SIGNATURE_MAX_LEN)
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}
