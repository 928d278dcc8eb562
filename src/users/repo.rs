use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewUser, User, UserFilter, UserPage};

/// Returned by `insert`/`update` when another live row already holds the
/// email. Callers test for it with `anyhow::Error::is`.
#[derive(Debug, thiserror::Error)]
#[error("email already in use")]
pub struct EmailTaken;

/// Storage port consumed by the user service. Lookups return `None` for
/// absent or soft-deleted rows instead of failing.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn insert(&self, user: &NewUser) -> anyhow::Result<User>;
    async fn update(&self, user: &User) -> anyhow::Result<User>;
    async fn soft_delete(&self, id: Uuid) -> anyhow::Result<()>;
    async fn list(&self, search: Option<&str>) -> anyhow::Result<Vec<User>>;
    /// Newest first. Count and page are read in one transaction.
    async fn list_page(&self, filter: &UserFilter) -> anyhow::Result<UserPage>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Maps the unique-index violation on `email` to [`EmailTaken`].
fn email_conflict(err: sqlx::Error, what: &'static str) -> anyhow::Error {
    let unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        anyhow::Error::new(EmailTaken)
    } else {
        anyhow::Error::new(err).context(what)
    }
}

fn search_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()))
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, phone_number, address, role,
                   created_at, updated_at, deleted_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, phone_number, address, role,
                   created_at, updated_at, deleted_at
            FROM users
            WHERE email = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn insert(&self, user: &NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, email, password_hash, phone_number, address, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, name, email, password_hash, phone_number, address, role,
                      created_at, updated_at, deleted_at
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone_number)
        .bind(&user.address)
        .bind(user.role.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(|e| email_conflict(e, "insert user"))?;
        Ok(user)
    }

    async fn update(&self, user: &User) -> anyhow::Result<User> {
        let updated = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET name = $2, email = $3, password_hash = $4,
                   phone_number = $5, address = $6, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, name, email, password_hash, phone_number, address, role,
                      created_at, updated_at, deleted_at
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone_number)
        .bind(&user.address)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| email_conflict(e, "update user"))?;
        updated.with_context(|| format!("user {} vanished during update", user.id))
    }

    async fn soft_delete(&self, id: Uuid) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET deleted_at = now()
             WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await
        .context("soft delete user")?;
        anyhow::ensure!(res.rows_affected() == 1, "user {id} already deleted");
        Ok(())
    }

    async fn list(&self, search: Option<&str>) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, phone_number, address, role,
                   created_at, updated_at, deleted_at
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR LOWER(name) LIKE $1 OR LOWER(email) LIKE $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(search_pattern(search))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(rows)
    }

    async fn list_page(&self, filter: &UserFilter) -> anyhow::Result<UserPage> {
        let pattern = search_pattern(filter.search.as_deref());
        let mut tx = self.db.begin().await.context("begin tx")?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR LOWER(name) LIKE $1 OR LOWER(email) LIKE $1)
              AND ($2::uuid IS NULL OR id = $2)
            "#,
        )
        .bind(&pattern)
        .bind(filter.id)
        .fetch_one(&mut *tx)
        .await
        .context("count users")?;

        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, phone_number, address, role,
                   created_at, updated_at, deleted_at
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR LOWER(name) LIKE $1 OR LOWER(email) LIKE $1)
              AND ($2::uuid IS NULL OR id = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&pattern)
        .bind(filter.id)
        .bind(filter.per_page)
        .bind(filter.offset())
        .fetch_all(&mut *tx)
        .await
        .context("list users page")?;

        tx.commit().await.context("commit tx")?;
        Ok(UserPage { users, total })
    }
}

/// In-memory repository for tests, with call counters and failure switches.
#[cfg(test)]
pub mod memory {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    use time::{Duration, OffsetDateTime};

    use super::*;

    #[derive(Default)]
    pub struct MemoryUserRepository {
        rows: Mutex<Vec<User>>,
        pub inserts: AtomicUsize,
        pub updates: AtomicUsize,
        pub deletes: AtomicUsize,
        pub lookups: AtomicUsize,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
        pub conflict_on_write: AtomicBool,
    }

    impl MemoryUserRepository {
        pub fn with_users(users: Vec<User>) -> Self {
            let repo = Self::default();
            *repo.rows.lock().unwrap() = users;
            repo
        }

        /// Every stored row, soft-deleted ones included.
        pub fn snapshot(&self) -> Vec<User> {
            self.rows.lock().unwrap().clone()
        }

        fn check_read(&self) -> anyhow::Result<()> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail_reads.load(Ordering::SeqCst), "read failed");
            Ok(())
        }

        fn check_write(&self) -> anyhow::Result<()> {
            anyhow::ensure!(!self.fail_writes.load(Ordering::SeqCst), "write failed");
            Ok(())
        }

        /// Emulates the unique email index, plus a forced conflict switch.
        fn check_email_free(&self, rows: &[User], email: &str, id: Uuid) -> anyhow::Result<()> {
            let taken = rows
                .iter()
                .any(|u| u.email == email && u.id != id && u.deleted_at.is_none());
            if taken || self.conflict_on_write.load(Ordering::SeqCst) {
                return Err(EmailTaken.into());
            }
            Ok(())
        }

        fn live_matching(&self, search: Option<&str>, id: Option<Uuid>) -> Vec<User> {
            let needle = search
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase);
            let mut rows: Vec<User> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.deleted_at.is_none())
                .filter(|u| id.map_or(true, |id| u.id == id))
                .filter(|u| {
                    needle.as_ref().map_or(true, |n| {
                        u.name.to_lowercase().contains(n) || u.email.to_lowercase().contains(n)
                    })
                })
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            rows
        }
    }

    #[async_trait]
    impl UserRepository for MemoryUserRepository {
        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            self.check_read()?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.id == id && u.deleted_at.is_none())
                .cloned())
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            self.check_read()?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email && u.deleted_at.is_none())
                .cloned())
        }

        async fn insert(&self, new: &NewUser) -> anyhow::Result<User> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.check_write()?;
            let mut rows = self.rows.lock().unwrap();
            self.check_email_free(&rows, &new.email, new.id)?;
            // Strictly increasing timestamps keep newest-first ordering stable.
            let created_at = OffsetDateTime::now_utc() + Duration::milliseconds(rows.len() as i64);
            let user = User {
                id: new.id,
                name: new.name.clone(),
                email: new.email.clone(),
                password_hash: new.password_hash.clone(),
                phone_number: new.phone_number.clone(),
                address: new.address.clone(),
                role: new.role,
                created_at,
                updated_at: created_at,
                deleted_at: None,
            };
            rows.push(user.clone());
            Ok(user)
        }

        async fn update(&self, user: &User) -> anyhow::Result<User> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.check_write()?;
            let mut rows = self.rows.lock().unwrap();
            self.check_email_free(&rows, &user.email, user.id)?;
            let row = rows
                .iter_mut()
                .find(|u| u.id == user.id && u.deleted_at.is_none())
                .ok_or_else(|| anyhow::anyhow!("user {} vanished during update", user.id))?;
            row.name = user.name.clone();
            row.email = user.email.clone();
            row.password_hash = user.password_hash.clone();
            row.phone_number = user.phone_number.clone();
            row.address = user.address.clone();
            row.updated_at = OffsetDateTime::now_utc();
            Ok(row.clone())
        }

        async fn soft_delete(&self, id: Uuid) -> anyhow::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.check_write()?;
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|u| u.id == id && u.deleted_at.is_none())
                .ok_or_else(|| anyhow::anyhow!("user {id} already deleted"))?;
            row.deleted_at = Some(OffsetDateTime::now_utc());
            Ok(())
        }

        async fn list(&self, search: Option<&str>) -> anyhow::Result<Vec<User>> {
            self.check_read()?;
            Ok(self.live_matching(search, None))
        }

        async fn list_page(&self, filter: &UserFilter) -> anyhow::Result<UserPage> {
            self.check_read()?;
            let all = self.live_matching(filter.search.as_deref(), filter.id);
            let total = all.len() as i64;
            let users = all
                .into_iter()
                .skip(filter.offset() as usize)
                .take(filter.per_page as usize)
                .collect();
            Ok(UserPage { users, total })
        }
    }
}
