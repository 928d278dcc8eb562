use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        CreateUserRequest, LoginRequest, LoginResponse, PageMeta, PaginatedUsers, RegisterRequest,
        RegisterResponse, UpdateUserRequest, UserPageRequest, UserResponse,
    },
    repo::{EmailTaken, UserRepository},
    repo_types::{NewUser, User, UserFilter},
};
use crate::auth::{
    claims::Role,
    jwt::{TokenError, TokenService},
    password::{hash_password, verify_password, PasswordError},
};

pub const MIN_NAME_LEN: usize = 5;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;

/// Verified against on unknown-email logins so both failure paths pay one
/// Argon2 run. Same parameters as `Argon2::default()`.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("invalid name")]
    InvalidName,
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid password")]
    InvalidPassword,
    #[error("invalid user id format")]
    InvalidId,
    #[error("email already exists")]
    EmailExists,
    #[error("new password same as old password")]
    PasswordSame,
    #[error("user not found")]
    NotFound,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("failed to issue tokens")]
    TokenIssue(#[source] TokenError),
    #[error("failed to hash password")]
    HashPassword(#[source] PasswordError),
    #[error("failed to {op}")]
    Storage {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

fn storage(op: &'static str) -> impl FnOnce(anyhow::Error) -> UserError {
    move |source| {
        error!(error = %source, op, "storage call failed");
        UserError::Storage { op, source }
    }
}

/// Like [`storage`], but a write that lost the race for an email to a
/// concurrent request is reported as `EmailExists`.
fn write_failure(op: &'static str) -> impl FnOnce(anyhow::Error) -> UserError {
    move |source| {
        if source.is::<EmailTaken>() {
            warn!(op, "email taken by concurrent write");
            return UserError::EmailExists;
        }
        storage(op)(source)
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn parse_id(id: &str) -> Result<Uuid, UserError> {
    Uuid::parse_str(id.trim()).map_err(|_| {
        warn!(%id, "invalid user id format");
        UserError::InvalidId
    })
}

fn check_name(name: &str) -> Result<(), UserError> {
    if name.chars().count() < MIN_NAME_LEN {
        return Err(UserError::InvalidName);
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), UserError> {
    if !is_valid_email(email) {
        return Err(UserError::InvalidEmail);
    }
    Ok(())
}

fn max_page(total: i64, per_page: i64) -> i64 {
    if total <= 0 || per_page <= 0 {
        0
    } else {
        total / per_page + i64::from(total % per_page != 0)
    }
}

/// Fields shared by self-registration and administrative creation.
struct NewAccount {
    name: String,
    email: String,
    password: String,
    phone_number: String,
    address: String,
    role: Role,
}

/// Validation and merge rules for the user entity. Storage and token
/// issuance are injected ports.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenService>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>, tokens: Arc<dyn TokenService>) -> Self {
        Self { repo, tokens }
    }

    /// Rule order: name, email shape, email uniqueness, password length.
    /// The password is hashed only after every rule passed.
    async fn create_account(&self, account: NewAccount, op: &'static str) -> Result<User, UserError> {
        check_name(&account.name).inspect_err(|_| warn!(op, "name too short"))?;
        check_email(&account.email).inspect_err(|_| warn!(op, "invalid email format"))?;

        if self
            .repo
            .find_by_email(&account.email)
            .await
            .map_err(storage(op))?
            .is_some()
        {
            warn!(op, email = %account.email, "email already exists");
            return Err(UserError::EmailExists);
        }

        if account.password.chars().count() < MIN_PASSWORD_LEN {
            warn!(op, "password too short");
            return Err(UserError::InvalidPassword);
        }

        let password_hash = hash_password(&account.password).map_err(UserError::HashPassword)?;
        let new_user = NewUser {
            id: Uuid::new_v4(),
            name: account.name,
            email: account.email,
            password_hash,
            phone_number: account.phone_number,
            address: account.address,
            role: account.role,
        };

        self.repo.insert(&new_user).await.map_err(write_failure(op))
    }

    #[instrument(skip(self, req))]
    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, UserError> {
        let user = self
            .create_account(
                NewAccount {
                    name: req.name,
                    email: normalize_email(&req.email),
                    password: req.password,
                    phone_number: String::new(),
                    address: String::new(),
                    role: Role::User,
                },
                "register user",
            )
            .await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(RegisterResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
        })
    }

    #[instrument(skip(self, req))]
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<UserResponse, UserError> {
        let user = self
            .create_account(
                NewAccount {
                    name: req.name,
                    email: normalize_email(&req.email),
                    password: req.password,
                    phone_number: req.phone_number,
                    address: req.address,
                    role: Role::Admin,
                },
                "create user",
            )
            .await?;

        info!(user_id = %user.id, email = %user.email, "user created");
        Ok(user.into())
    }

    /// Unknown email and wrong password both end in `InvalidCredentials`.
    #[instrument(skip(self, req))]
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, UserError> {
        let email = normalize_email(&req.email);

        let Some(user) = self
            .repo
            .find_by_email(&email)
            .await
            .map_err(storage("login user"))?
        else {
            let _ = verify_password(&req.password, DUMMY_HASH);
            warn!(%email, "login unknown email");
            return Err(UserError::InvalidCredentials);
        };

        match verify_password(&req.password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = %user.id, "login invalid password");
                return Err(UserError::InvalidCredentials);
            }
            Err(e) => {
                error!(error = %e, user_id = %user.id, "stored password hash unreadable");
                return Err(UserError::InvalidCredentials);
            }
        }

        let pair = self.tokens.issue(user.id, user.role).map_err(|e| {
            error!(error = %e, user_id = %user.id, "token issuance failed");
            UserError::TokenIssue(e)
        })?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        })
    }

    async fn load(&self, id: Uuid, op: &'static str) -> Result<User, UserError> {
        self.repo
            .find_by_id(id)
            .await
            .map_err(storage(op))?
            .ok_or_else(|| {
                warn!(user_id = %id, op, "user not found");
                UserError::NotFound
            })
    }

    #[instrument(skip(self))]
    pub async fn get_user_by_id(&self, id: &str) -> Result<UserResponse, UserError> {
        let id = parse_id(id)?;
        let user = self.load(id, "get user").await?;
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn get_all_users(&self, search: Option<&str>) -> Result<Vec<UserResponse>, UserError> {
        let users = self.repo.list(search).await.map_err(storage("list users"))?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_all_users_paginated(
        &self,
        req: UserPageRequest,
    ) -> Result<PaginatedUsers, UserError> {
        let id = match req.id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(parse_id(raw)?),
            _ => None,
        };
        let filter = UserFilter {
            search: req.search,
            id,
            page: req.page.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE),
            per_page: req
                .per_page
                .filter(|p| *p > 0)
                .map_or(DEFAULT_PER_PAGE, |p| p.min(MAX_PER_PAGE)),
        };

        let page = self
            .repo
            .list_page(&filter)
            .await
            .map_err(storage("list users"))?;

        info!(page = filter.page, count = page.total, "listed users");
        Ok(PaginatedUsers {
            data: page.users.into_iter().map(UserResponse::from).collect(),
            meta: PageMeta {
                page: filter.page,
                per_page: filter.per_page,
                max_page: max_page(page.total, filter.per_page),
                count: page.total,
            },
        })
    }

    /// Applies only the fields present in `req`, validating each; the
    /// record is written once, after every present field passed.
    #[instrument(skip(self, req))]
    pub async fn update_user(
        &self,
        id: &str,
        req: UpdateUserRequest,
    ) -> Result<UserResponse, UserError> {
        let id = parse_id(id)?;
        let mut user = self.load(id, "update user").await?;

        if let Some(name) = req.name {
            check_name(&name).inspect_err(|_| warn!(user_id = %id, "invalid name"))?;
            user.name = name;
        }

        if let Some(email) = req.email {
            let email = normalize_email(&email);
            check_email(&email).inspect_err(|_| warn!(user_id = %id, "invalid email format"))?;
            let holder = self
                .repo
                .find_by_email(&email)
                .await
                .map_err(storage("update user"))?;
            if holder.is_some_and(|other| other.id != user.id) {
                warn!(user_id = %id, "email already used by other user");
                return Err(UserError::EmailExists);
            }
            user.email = email;
        }

        if let Some(password) = req.password {
            if matches!(verify_password(&password, &user.password_hash), Ok(true)) {
                warn!(user_id = %id, "new password same as old");
                return Err(UserError::PasswordSame);
            }
            user.password_hash = hash_password(&password).map_err(UserError::HashPassword)?;
        }

        if let Some(phone_number) = req.phone_number {
            user.phone_number = phone_number;
        }

        if let Some(address) = req.address {
            user.address = address;
        }

        let user = self
            .repo
            .update(&user)
            .await
            .map_err(write_failure("update user"))?;
        info!(user_id = %user.id, "user updated");
        Ok(user.into())
    }

    /// Soft-deletes and returns the record as it was before deletion.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> Result<UserResponse, UserError> {
        let id = parse_id(id)?;
        let user = self.load(id, "delete user").await?;

        self.repo
            .soft_delete(id)
            .await
            .map_err(storage("delete user"))?;

        info!(user_id = %id, "user deleted");
        Ok(user.into())
    }
}
