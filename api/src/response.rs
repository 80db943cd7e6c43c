//! Response helpers

use serde::Deserialize;

/// Wrap a value as `Ok(Json(value))`
#[macro_export]
macro_rules! ok_json {
    ($data:expr) => {
        Ok(axum::Json($data))
    };
}

/// Hex body field, with or without a `0x` prefix
pub fn decode_hex(field: &str, raw: &str) -> crate::ApiResult<Vec<u8>> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| crate::ApiError::BadRequest(format!("{} is not hex: {}", field, e)))
}

/// Optional status filter on list endpoints
#[derive(Debug, Deserialize)]
pub struct StatusFilter<T> {
    pub status: Option<T>,
}
