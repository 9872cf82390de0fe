//! Bearer-token access filtering. Pure and synchronous: no I/O, easy to unit
//! test in isolation from the HTTP layer that calls it.

use config::TokenStore;

/// Result of running a request's bearer token against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Token was valid; request is restricted to this set of model names.
    Allowed(Vec<String>),
    /// No filter applies to this request (no token required, or a missing /
    /// unknown token tolerated because strict mode is off).
    None,
    /// Request must be rejected with this status and message.
    Rejected(u16, String),
}

/// Extract a bearer token from an `Authorization` header, matching the
/// `Bearer` scheme case-insensitively.
pub fn extract_token(headers: &http::HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

/// Validates bearer tokens against the in-memory token store.
pub struct AccessFilter<'a> {
    tokens: &'a TokenStore,
    strict: bool,
}

impl<'a> AccessFilter<'a> {
    pub fn new(tokens: &'a TokenStore, strict: bool) -> Self {
        Self { tokens, strict }
    }

    /// Rules, in order: no token + lax mode -> `None`; no token + strict ->
    /// reject 401; unknown token + lax -> `None`; unknown token + strict ->
    /// reject 401; valid token -> `Allowed(token.models)`.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> AuthOutcome {
        let Some(token) = extract_token(headers) else {
            return if self.strict {
                AuthOutcome::Rejected(401, "Authorization required".to_string())
            } else {
                AuthOutcome::None
            };
        };

        match self.tokens.get(&token) {
            Some(record) => AuthOutcome::Allowed(record.models.clone()),
            None if self.strict => AuthOutcome::Rejected(401, "Invalid token".to_string()),
            None => AuthOutcome::None,
        }
    }
}

/// The strict-mode global gate: reject 403 unless the request carries a
/// valid token whose allowed models intersect the configured model set.
/// Exempting preflight/health/version by method or path is the HTTP layer's
/// job (it knows the request method and path); this function only judges the
/// token-vs-models question.
pub fn strict_gate(outcome: &AuthOutcome, configured_models: &[&str]) -> Option<(u16, String)> {
    match outcome {
        AuthOutcome::Allowed(models) if models.iter().any(|m| configured_models.contains(&m.as_str())) => None,
        AuthOutcome::Allowed(_) => Some((
            403,
            "Forbidden: token does not grant access to any available model".to_string(),
        )),
        _ => Some((403, "Forbidden: valid bearer token required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use super::*;

    fn headers_with_bearer(token: &str) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn store_with(token: &str, models: &[&str]) -> TokenStore {
        let mut store = TokenStore::default();
        store.upsert(
            token,
            config::TokenRecord {
                note: "test".to_string(),
                models: models.iter().map(|m| m.to_string()).collect(),
                created_at: Timestamp::constant(0, 0),
            },
        );
        store
    }

    #[test]
    fn no_token_lax_mode_is_unfiltered() {
        let store = TokenStore::default();
        let filter = AccessFilter::new(&store, false);
        assert_eq!(filter.authenticate(&http::HeaderMap::new()), AuthOutcome::None);
    }

    #[test]
    fn no_token_strict_mode_is_rejected() {
        let store = TokenStore::default();
        let filter = AccessFilter::new(&store, true);
        assert_eq!(
            filter.authenticate(&http::HeaderMap::new()),
            AuthOutcome::Rejected(401, "Authorization required".to_string())
        );
    }

    #[test]
    fn unknown_token_lax_mode_is_unfiltered() {
        let store = TokenStore::default();
        let filter = AccessFilter::new(&store, false);
        assert_eq!(filter.authenticate(&headers_with_bearer("deadbeef")), AuthOutcome::None);
    }

    #[test]
    fn unknown_token_strict_mode_is_rejected() {
        let store = TokenStore::default();
        let filter = AccessFilter::new(&store, true);
        assert_eq!(
            filter.authenticate(&headers_with_bearer("deadbeef")),
            AuthOutcome::Rejected(401, "Invalid token".to_string())
        );
    }

    #[test]
    fn valid_token_is_allowed_with_its_models() {
        let store = store_with("abc123", &["baseball"]);
        let filter = AccessFilter::new(&store, true);
        assert_eq!(
            filter.authenticate(&headers_with_bearer("abc123")),
            AuthOutcome::Allowed(vec!["baseball".to_string()])
        );
    }

    #[test]
    fn scheme_match_is_case_insensitive() {
        let store = store_with("abc123", &["baseball"]);
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, http::HeaderValue::from_static("bearer abc123"));
        let filter = AccessFilter::new(&store, true);
        assert!(matches!(filter.authenticate(&headers), AuthOutcome::Allowed(_)));
    }

    #[test]
    fn strict_gate_allows_intersecting_token() {
        let outcome = AuthOutcome::Allowed(vec!["baseball".to_string()]);
        assert!(strict_gate(&outcome, &["baseball", "assistant"]).is_none());
    }

    #[test]
    fn strict_gate_rejects_non_intersecting_token() {
        let outcome = AuthOutcome::Allowed(vec!["baseball".to_string()]);
        let rejection = strict_gate(&outcome, &["assistant"]).unwrap();
        assert_eq!(rejection.0, 403);
        assert!(rejection.1.contains("does not grant access"));
    }

    #[test]
    fn strict_gate_rejects_missing_token() {
        let rejection = strict_gate(&AuthOutcome::None, &["assistant"]).unwrap();
        assert_eq!(rejection.0, 403);
        assert!(rejection.1.contains("valid bearer token required"));
    }
}
