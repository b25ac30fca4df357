//! Validation and truncation of recorded values.
//!
//! Sequence-like data (strings, lists, event extras) that runs over its limit
//! is truncated. Numeric data that is out of range is rejected, never
//! clamped. Either way the caller gets back a `Validation` naming the
//! recording error to count, if any.

use crate::error::ErrorType;
use uuid::Uuid;

/// Maximum length of a string metric, in UTF-8 bytes.
pub const MAX_STRING_BYTES: usize = 50;
/// Maximum number of items in a string list metric.
pub const MAX_LIST_ITEMS: usize = 20;
/// Maximum length of an event extra value, in UTF-8 bytes.
pub const MAX_EXTRA_VALUE_BYTES: usize = 100;

/// The outcome of validating a raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
    /// The value is fine as it is.
    Accepted(T),
    /// The value was cut down to fit. `original_size` is the size before
    /// truncation, in the unit of the limit that applied.
    Truncated {
        /// The truncated value.
        value: T,
        /// Size of the raw value.
        original_size: usize,
    },
    /// The value can't be stored.
    Rejected(ErrorType),
}

impl<T> Validation<T> {
    /// The recording error this outcome implies, if any.
    pub fn error(&self) -> Option<ErrorType> {
        match *self {
            Validation::Accepted(_) => None,
            Validation::Truncated { .. } => Some(ErrorType::InvalidOverflow),
            Validation::Rejected(e) => Some(e),
        }
    }

    /// The value to store, if there is one.
    pub fn into_value(self) -> Option<T> {
        match self {
            Validation::Accepted(v) | Validation::Truncated { value: v, .. } => Some(v),
            Validation::Rejected(_) => None,
        }
    }
}

/// Longest prefix of `value` that fits in `max_bytes` without splitting a
/// code point.
pub fn truncate_to_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Fit a string into `max_bytes` UTF-8 bytes.
pub fn validate_string(value: String, max_bytes: usize) -> Validation<String> {
    let original_size = value.len();
    if original_size <= max_bytes {
        return Validation::Accepted(value);
    }
    let truncated = truncate_to_boundary(&value, max_bytes).to_string();
    warn!("string length {} > {}, truncating", original_size, max_bytes);
    Validation::Truncated {
        value: truncated,
        original_size,
    }
}

/// Counter increments must be strictly positive.
pub fn validate_count(amount: i32) -> Validation<i32> {
    if amount <= 0 {
        Validation::Rejected(ErrorType::InvalidValue)
    } else {
        Validation::Accepted(amount)
    }
}

/// Parse a textual UUID.
pub fn validate_uuid(value: &str) -> Validation<Uuid> {
    match Uuid::parse_str(value) {
        Ok(uuid) => Validation::Accepted(uuid),
        Err(_) => Validation::Rejected(ErrorType::InvalidValue),
    }
}

/// Trim a list down to `max_items`.
///
/// The surplus is dropped and counted as `invalid_value`: these are whole
/// values turned away, not a value cut short.
pub fn validate_list_len<T>(mut items: Vec<T>, max_items: usize) -> (Vec<T>, Option<ErrorType>) {
    if items.len() <= max_items {
        return (items, None);
    }
    items.truncate(max_items);
    (items, Some(ErrorType::InvalidValue))
}
