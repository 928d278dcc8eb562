use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::claims::Role;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,           // lowercase, unique among live rows
    pub password_hash: String,   // Argon2 PHC string, never the raw password
    pub phone_number: String,
    pub address: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>, // soft-delete marker
}

/// Row to insert. Only ever built with an already hashed password.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone_number: String,
    pub address: String,
    pub role: Role,
}

/// Filter for the paged listing. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFilter {
    pub search: Option<String>,
    pub id: Option<Uuid>,
    pub page: i64,
    pub per_page: i64,
}

impl UserFilter {
    /// Saturates instead of overflowing on absurd page numbers.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.per_page.max(0))
    }
}

/// One page of users plus the total number of matching rows.
#[derive(Debug, Clone)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
}
