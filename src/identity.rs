//! Caller identity at connection open.
//!
//! Login and session cookies are handled in front of this service. Whatever
//! authenticated the request forwards the user id in a trusted header; a
//! missing or unparseable header means the recording is anonymous.

use actix_web::HttpRequest;

pub trait IdentityProvider: Send + Sync {
    fn user_id(&self, req: &HttpRequest) -> Option<i64>;
}

pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self { header: header.into() }
    }
}

impl IdentityProvider for HeaderIdentity {
    fn user_id(&self, req: &HttpRequest) -> Option<i64> {
        req.headers()
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_header_identity() {
        let identity = HeaderIdentity::new("x-user-id");

        let req = TestRequest::default().insert_header(("x-user-id", "12")).to_http_request();
        assert_eq!(identity.user_id(&req), Some(12));

        let req = TestRequest::default().insert_header(("x-user-id", "admin")).to_http_request();
        assert_eq!(identity.user_id(&req), None);

        let req = TestRequest::default().to_http_request();
        assert_eq!(identity.user_id(&req), None);
    }
}
