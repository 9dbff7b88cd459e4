use std::collections::HashMap;

use log::warn;

use crate::error::{AuthError, SubscribeError};
use crate::state::subscribers::ViewerId;

/// Maps a viewer token to the identity the server will trust.
pub trait ViewerAuthenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<ViewerId, AuthError>;
}

/// Token table loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, ViewerId>,
}

impl StaticTokenAuthenticator {
    /// Parses `token=viewer` pairs separated by commas. Malformed pairs are
    /// skipped with a warning.
    pub fn from_pairs(raw: &str) -> Self {
        let mut tokens = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((token, viewer)) if !token.trim().is_empty() && !viewer.trim().is_empty() => {
                    tokens.insert(token.trim().to_string(), viewer.trim().to_string());
                }
                _ => warn!("Ignoring malformed viewer token entry"),
            }
        }
        if tokens.is_empty() {
            warn!("No viewer tokens configured; every dashboard subscription will be rejected");
        }
        Self { tokens }
    }

    pub fn insert(&mut self, token: impl Into<String>, viewer_id: impl Into<ViewerId>) {
        self.tokens.insert(token.into(), viewer_id.into());
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl ViewerAuthenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Result<ViewerId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens.get(token).cloned().ok_or(AuthError::UnknownToken)
    }
}

/// Resolves the identity a connection is bound to. A client-asserted id that
/// disagrees with the authenticated one is rejected outright.
pub fn resolve_viewer(
    auth: &dyn ViewerAuthenticator,
    token: &str,
    asserted: Option<&str>,
) -> Result<ViewerId, SubscribeError> {
    let authenticated = auth.authenticate(token)?;
    match asserted {
        Some(asserted) if asserted != authenticated => Err(SubscribeError::ViewerMismatch {
            asserted: asserted.to_string(),
            authenticated,
        }),
        _ => Ok(authenticated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_pairs() {
        let auth = StaticTokenAuthenticator::from_pairs(" t1=alice, bad ,t2 = bob,=x");
        assert_eq!(auth.len(), 2);
        assert_eq!(auth.authenticate("t2").unwrap(), "bob");
        assert_eq!(auth.authenticate("nope"), Err(AuthError::UnknownToken));
        assert_eq!(auth.authenticate(" "), Err(AuthError::MissingToken));
    }

    #[test]
    fn asserted_viewer_must_match_token() {
        let mut auth = StaticTokenAuthenticator::default();
        auth.insert("t1", "alice");

        assert_eq!(resolve_viewer(&auth, "t1", None).unwrap(), "alice");
        assert_eq!(resolve_viewer(&auth, "t1", Some("alice")).unwrap(), "alice");
        assert!(matches!(
            resolve_viewer(&auth, "t1", Some("mallory")),
            Err(SubscribeError::ViewerMismatch { .. })
        ));
        assert!(matches!(
            resolve_viewer(&auth, "t9", None),
            Err(SubscribeError::Auth(AuthError::UnknownToken))
        ));
    }
}
