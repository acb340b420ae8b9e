//! Lenient JSON bodies.
//!
//! Mobile clients send action endpoints with no body at all, so an empty
//! payload decodes to `T::default()` instead of a 415/422 from `Json<T>`.

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{DomainError, DomainResult};

pub fn json_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> DomainResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| DomainError::validation("body", "invalid json"))
}
