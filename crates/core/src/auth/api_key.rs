use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Shared-secret authentication.
///
/// The key is read from `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub struct ApiKeyAuthenticator {
    expected: String,
}

impl ApiKeyAuthenticator {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            expected: key.into(),
        }
    }

    fn presented<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        let bearer = request.header("authorization").and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        });
        bearer.or_else(|| request.header("x-api-key"))
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let key = self.presented(request).ok_or(AuthError::NotAuthenticated)?;
        if !constant_time_eq(key.as_bytes(), self.expected.as_bytes()) {
            return Err(AuthError::InvalidCredentials("Invalid API key".to_string()));
        }
        Ok(Identity {
            user_id: "api_key".to_string(),
            method: self.method_name(),
        })
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

/// Compares without an early exit on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, value: &str) -> AuthRequest {
        let mut request = AuthRequest::default();
        request.headers.insert(name.to_string(), value.to_string());
        request
    }

    #[tokio::test]
    async fn test_accepts_bearer_and_header() {
        let auth = ApiKeyAuthenticator::new("s3cret");
        for req in [
            request("authorization", "Bearer s3cret"),
            request("authorization", "bearer s3cret"),
            request("x-api-key", "s3cret"),
        ] {
            assert_eq!(auth.authenticate(&req).await.unwrap().method, "api_key");
        }
    }

    #[tokio::test]
    async fn test_rejects_wrong_or_missing_key() {
        let auth = ApiKeyAuthenticator::new("s3cret");
        assert!(matches!(
            auth.authenticate(&request("x-api-key", "s3cre")).await,
            Err(AuthError::InvalidCredentials(_))
        ));
        assert!(matches!(
            auth.authenticate(&request("authorization", "Basic s3cret")).await,
            Err(AuthError::NotAuthenticated)
        ));
        assert!(matches!(
            auth.authenticate(&AuthRequest::default()).await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
