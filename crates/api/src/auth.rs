use axum::http::HeaderMap;
use cardwise_core::domain::User;

/// Resolves the caller's identity. Credential checks happen upstream; the API only consumes
/// the result.
pub trait AuthGateway: Send + Sync {
    fn authenticated_user(&self, headers: &HeaderMap) -> Option<User>;
}

/// Trusts the identity headers injected by the fronting authentication proxy.
#[derive(Debug, Clone)]
pub struct TrustedHeaderAuth {
    user_header: String,
}

impl TrustedHeaderAuth {
    pub fn new(user_header: impl Into<String>) -> Self {
        Self {
            user_header: user_header.into().to_ascii_lowercase(),
        }
    }
}

impl AuthGateway for TrustedHeaderAuth {
    fn authenticated_user(&self, headers: &HeaderMap) -> Option<User> {
        let id = headers
            .get(self.user_header.as_str())?
            .to_str()
            .ok()?
            .trim();
        if id.is_empty() {
            return None;
        }
        let email = headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Some(User {
            id: id.to_string(),
            email,
        })
    }
}

/// Client key for rate limiting: first `x-forwarded-for` hop, then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_identity_from_configured_header() {
        let auth = TrustedHeaderAuth::new("X-Auth-User");
        let mut headers = HeaderMap::new();
        assert_eq!(auth.authenticated_user(&headers), None);

        headers.insert("x-auth-user", HeaderValue::from_static("  "));
        assert_eq!(auth.authenticated_user(&headers), None);

        headers.insert("x-auth-user", HeaderValue::from_static("u-42"));
        headers.insert("x-user-email", HeaderValue::from_static("a@b.test"));
        let user = auth.authenticated_user(&headers).unwrap();
        assert_eq!(user.id, "u-42");
        assert_eq!(user.email.as_deref(), Some("a@b.test"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "10.0.0.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }
}
