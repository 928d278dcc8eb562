use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::{claims::Role, password::hash_password},
    users::{repo::UserRepository, repo_types::NewUser},
};

pub const DEFAULT_SEED_FILE: &str = "seeds/users.json";

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub address: String,
    pub role: Role,
}

pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Vec<SeedUser>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read seed file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse seed file {}", path.display()))
}

/// Inserts the seed users whose email is not taken yet. Returns how many
/// rows were written.
#[instrument(skip_all, fields(count = seeds.len()))]
pub async fn seed_users(repo: &dyn UserRepository, seeds: Vec<SeedUser>) -> anyhow::Result<usize> {
    let mut inserted = 0;
    for seed in seeds {
        let email = seed.email.trim().to_lowercase();
        if repo.find_by_email(&email).await?.is_some() {
            info!(%email, "seed user exists, skipping");
            continue;
        }

        let password_hash = hash_password(&seed.password)
            .with_context(|| format!("hash password of seed user {email}"))?;
        repo.insert(&NewUser {
            id: Uuid::new_v4(),
            name: seed.name,
            email,
            password_hash,
            phone_number: seed.phone_number,
            address: seed.address,
            role: seed.role,
        })
        .await?;
        inserted += 1;
    }
    info!(inserted, "seeding finished");
    Ok(inserted)
}
