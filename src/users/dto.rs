use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::repo_types::User;
use crate::auth::claims::Role;

/// Request body for self-registration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Request body for login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Request body for administrative creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub address: String,
}

/// Partial update. An absent field is `None` and left untouched; `Some` is
/// validated and applied even when it equals the stored value. An explicit
/// `null` is rejected rather than read as absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[serde(default, deserialize_with = "present")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub address: Option<String>,
}

/// Only called for keys that are present, so `null` reaches `T` and fails.
fn present<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(de).map(Some)
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub address: String,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            phone_number: u.phone_number,
            address: u.address,
            role: u.role,
        }
    }
}

/// Query string of the admin listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    pub pagination: Option<bool>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserPageRequest {
    pub search: Option<String>,
    pub id: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl From<UserListQuery> for UserPageRequest {
    fn from(q: UserListQuery) -> Self {
        Self {
            search: q.search,
            id: q.id,
            page: q.page,
            per_page: q.per_page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub page: i64,
    pub per_page: i64,
    pub max_page: i64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct PaginatedUsers {
    pub data: Vec<UserResponse>,
    pub meta: PageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_distinguishes_absent_from_empty() {
        let req: UpdateUserRequest = serde_json::from_str(r#"{"address": ""}"#).unwrap();
        assert_eq!(req.address.as_deref(), Some(""));
        assert!(req.name.is_none());
        assert!(req.email.is_none());
        assert!(req.password.is_none());
        assert!(req.phone_number.is_none());
    }

    #[test]
    fn update_request_rejects_explicit_null() {
        for body in [r#"{"address": null}"#, r#"{"name": "Jane Doe", "email": null}"#] {
            assert!(serde_json::from_str::<UpdateUserRequest>(body).is_err(), "{body}");
        }
        let req: UpdateUserRequest = serde_json::from_str("{}").unwrap();
        assert!(req.address.is_none());
    }

    #[test]
    fn update_request_rejects_role() {
        let res = serde_json::from_str::<UpdateUserRequest>(r#"{"role": "admin"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn user_response_never_contains_password() {
        let json = serde_json::to_string(&UserResponse {
            id: Uuid::new_v4(),
            name: "Jane Doe".into(),
            email: "jane@x.com".into(),
            phone_number: String::new(),
            address: String::new(),
            role: Role::User,
        })
        .unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("password"));
    }
}
