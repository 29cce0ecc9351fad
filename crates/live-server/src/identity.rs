//! Caller identity from upstream authentication headers.
//!
//! Authentication happens in front of this server; the proxy passes the
//! signed-in user along in `X-Live-*` headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use tenvis_live_core::{OrgRole, SignedInUser};

pub const ORG_ID_HEADER: &str = "x-live-org-id";
pub const USER_ID_HEADER: &str = "x-live-user-id";
pub const LOGIN_HEADER: &str = "x-live-login";
pub const ROLE_HEADER: &str = "x-live-role";

/// Extractor for the signed-in caller. Rejects with 401 when headers are
/// missing or malformed.
pub struct Caller(pub SignedInUser);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_headers(&parts.headers)
            .map(Caller)
            .ok_or((StatusCode::UNAUTHORIZED, "not authenticated"))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Read the caller from request headers.
#[must_use]
pub fn user_from_headers(headers: &HeaderMap) -> Option<SignedInUser> {
    Some(SignedInUser {
        org_id: header(headers, ORG_ID_HEADER)?.parse().ok()?,
        user_id: header(headers, USER_ID_HEADER)?.parse().ok()?,
        login: header(headers, LOGIN_HEADER).unwrap_or_default().to_string(),
        role: header(headers, ROLE_HEADER)
            .and_then(|r| r.parse::<OrgRole>().ok())
            .unwrap_or(OrgRole::Viewer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_full_identity() {
        let user = user_from_headers(&headers(&[
            (ORG_ID_HEADER, "2"),
            (USER_ID_HEADER, "7"),
            (LOGIN_HEADER, "ann"),
            (ROLE_HEADER, "Admin"),
        ]))
        .unwrap();
        assert_eq!(user.org_id, 2);
        assert_eq!(user.user_id, 7);
        assert_eq!(user.login, "ann");
        assert_eq!(user.role, OrgRole::Admin);
    }

    #[test]
    fn test_role_defaults_to_viewer() {
        let user =
            user_from_headers(&headers(&[(ORG_ID_HEADER, "1"), (USER_ID_HEADER, "1")])).unwrap();
        assert_eq!(user.role, OrgRole::Viewer);
    }

    #[test]
    fn test_missing_org_rejected() {
        assert!(user_from_headers(&headers(&[(USER_ID_HEADER, "1")])).is_none());
        assert!(user_from_headers(&headers(&[(ORG_ID_HEADER, "x"), (USER_ID_HEADER, "1")])).is_none());
    }
}
