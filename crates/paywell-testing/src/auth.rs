//! Mock identity headers.
//!
//! Services behind the gateway trust `x-paywell-user-id` and
//! `x-paywell-user-role`. Tests inject them directly instead.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use paywell_auth_types::identity::{Role, USER_ID_HEADER, USER_ROLE_HEADER};

pub struct MockAuth {
    pub user_id: String,
    pub role: Role,
}

impl MockAuth {
    pub fn user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            role: Role::User,
        }
    }

    pub fn service(name: &str) -> Self {
        Self {
            user_id: name.to_owned(),
            role: Role::Service,
        }
    }

    /// Headers as the gateway would inject them.
    pub fn headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_static(USER_ID_HEADER),
            HeaderValue::from_str(&self.user_id).unwrap(),
        );
        map.insert(
            HeaderName::from_static(USER_ROLE_HEADER),
            HeaderValue::from_static(self.role.as_str()),
        );
        map
    }
}
