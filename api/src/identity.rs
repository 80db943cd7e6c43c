//! Caller identity from gateway headers
//!
//! The upstream auth gateway sets `x-governance-identity` after it has
//! authenticated the caller. Requests without it run with an anonymous
//! context.

use crate::ApiError;
use axum::{extract::FromRequestParts, http::request::Parts};
use governance::{Address, RequestContext};
use uuid::Uuid;

pub const IDENTITY_HEADER: &str = "x-governance-identity";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Request context built from the identity and correlation headers
pub struct Caller(pub RequestContext);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::BadRequest(format!("{} is not valid text", name)))
        })
        .transpose()
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let mut ctx = match header(parts, IDENTITY_HEADER)? {
            Some(raw) => RequestContext::authenticated(raw.parse::<Address>()?),
            None => RequestContext::system(),
        };
        if let Some(raw) = header(parts, CORRELATION_HEADER)? {
            let id = Uuid::parse_str(raw)
                .map_err(|e| ApiError::BadRequest(format!("bad correlation id: {}", e)))?;
            ctx = ctx.with_correlation_id(id);
        }
        Ok(Caller(ctx))
    }
}
