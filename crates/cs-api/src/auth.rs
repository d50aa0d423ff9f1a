//! Bearer token to principal resolution

use crate::AppState;
use axum::http::{header, HeaderMap};
use cs_core::{Principal, RequestContext};
use std::collections::BTreeMap;
use tracing::debug;

/// Parse `owner=token,owner=token`. Malformed or blank pairs are skipped.
pub fn parse_api_tokens(raw: &str) -> BTreeMap<String, String> {
    let mut tokens = BTreeMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((owner, token)) = pair.split_once('=') {
            let owner = owner.trim();
            let token = token.trim();
            if !owner.is_empty() && !token.is_empty() {
                tokens.insert(owner.to_string(), token.to_string());
            }
        }
    }
    tokens
}

/// Resolve the caller from the `Authorization` header.
///
/// A missing or unknown token yields an anonymous context; the core
/// decides which operations need a principal.
pub fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");

    if token.is_empty() {
        return RequestContext::anonymous();
    }

    match owner_for_token(&state.config.api_tokens, token) {
        Some(owner) => RequestContext::for_principal(Principal::new(owner)),
        None => {
            debug!("Unknown bearer token presented");
            RequestContext::anonymous()
        }
    }
}

fn owner_for_token<'a>(tokens: &'a BTreeMap<String, String>, token: &str) -> Option<&'a str> {
    tokens
        .iter()
        .find(|(_, expected)| expected.as_str() == token)
        .map(|(owner, _)| owner.as_str())
}
