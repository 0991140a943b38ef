//! Build the caller's [`AuthContext`] from the request: query parameters plus the
//! `Authorization: Token <session id>` header.

use crate::auth::AuthContext;
use crate::error::ResourceException;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use std::collections::BTreeMap;

pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Extractor for the authenticated (or anonymous) caller.
#[derive(Clone, Debug)]
pub struct Caller(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ResourceException;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let params = match parts.uri.query() {
            None => BTreeMap::new(),
            Some(_) => Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
                .map(|Query(q)| q)
                .map_err(|_| {
                    ResourceException::bad_request("bad_query", "The query string in the GET parameter is malformed.")
                })?,
        };
        let header = parts
            .headers
            .get(AUTHORIZATION_HEADER)
            .and_then(|v: &axum::http::HeaderValue| v.to_str().ok())
            .map(str::trim)
            .filter(|s: &&str| !s.is_empty());
        let ctx = AuthContext::from_authorization(
            header,
            parts.method.as_str(),
            params,
            state.sessions.as_ref(),
            state.settings.session_duration(),
        )?;
        Ok(Caller(ctx))
    }
}
