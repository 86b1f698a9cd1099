//! Per-session credential bindings.
//!
//! The store is the only state shared across sessions. It maps a session id
//! to the caller-supplied backend token, with per-key atomicity from
//! `DashMap` so unrelated sessions never contend. The store is passed by
//! reference into the transports and the session core; bindings are removed
//! in lockstep with session teardown and never outlive it.

use dashmap::DashMap;

/// Environment variable consulted when a connection supplies no credential
/// of its own.
pub const TOKEN_ENV_VAR: &str = "MERMAID_GATEWAY_TOKEN";

/// Header a creating HTTP request may carry its token in.
pub const TOKEN_HEADER: &str = "x-mermaid-token";

/// Query parameter a creating HTTP request may carry its token in.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Process-wide session-id → credential-token store.
#[derive(Debug, Default)]
pub struct CredentialStore {
    bindings: DashMap<String, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a credential to a session. First bind wins: once a session has
    /// a credential, later attempts are no-ops and the original binding is
    /// reported back.
    pub fn bind(&self, session_id: &str, token: String) -> bool {
        match self.bindings.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token);
                true
            }
        }
    }

    /// Looks up the credential bound to a session, if any.
    pub fn lookup(&self, session_id: &str) -> Option<String> {
        self.bindings.get(session_id).map(|t| t.value().clone())
    }

    /// Erases a session's binding. Called exactly once during teardown;
    /// removing an unbound session is a no-op.
    pub fn remove(&self, session_id: &str) {
        self.bindings.remove(session_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

/// Resolves the inbound credential for a new session.
///
/// Precedence: connection-time query parameter, then creation header, then
/// the process-level environment default. Absence is fine; capabilities that
/// need a token fail per-call instead.
pub fn resolve_credential(
    query_token: Option<&str>,
    header_token: Option<&str>,
) -> Option<String> {
    query_token
        .map(str::to_string)
        .or_else(|| header_token.map(str::to_string))
        .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
        .filter(|t| !t.is_empty())
}
