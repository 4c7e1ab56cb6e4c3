use actix_web::HttpRequest;

pub use crate::api::USER_ID_HEADER;
use crate::api::UserId;

/// The session-gate capability: the current user, if any.
pub fn current_user_id(req: &HttpRequest) -> Option<UserId> {
    req.headers()
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
mod auth_tests {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn parses_user_id_header() {
        let req = TestRequest::get()
            .insert_header((USER_ID_HEADER, "42"))
            .to_http_request();
        assert_eq!(current_user_id(&req), Some(42));
    }

    #[test]
    fn missing_or_malformed_header_yields_none() {
        let req = TestRequest::get().to_http_request();
        assert_eq!(current_user_id(&req), None);

        let req = TestRequest::get()
            .insert_header((USER_ID_HEADER, "not-a-number"))
            .to_http_request();
        assert_eq!(current_user_id(&req), None);
    }
}
