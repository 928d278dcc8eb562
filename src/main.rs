use clap::Parser;

mod app;
mod auth;
mod config;
mod db;
mod error;
mod seed;
mod state;
mod users;

use crate::{config::AppConfig, state::AppState, users::repo::PgUserRepository};

#[derive(Parser)]
#[command(name = "userhub")]
#[command(about = "User management REST service")]
struct Cli {
    /// Apply pending database migrations and exit
    #[arg(long)]
    migrate: bool,

    /// Insert seed users, skipping emails already present, and exit
    #[arg(long)]
    seed: bool,

    /// Revert all applied migrations and exit
    #[arg(long)]
    rollback: bool,

    /// Seed file used by --seed
    #[arg(long, default_value = seed::DEFAULT_SEED_FILE)]
    seed_file: String,
}

impl Cli {
    fn is_command(&self) -> bool {
        self.migrate || self.seed || self.rollback
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "userhub=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    if cli.is_command() {
        let pool = db::connect(&config.database_url).await?;
        if cli.migrate {
            db::migrate(&pool).await?;
        }
        if cli.seed {
            let seeds = seed::load(&cli.seed_file)?;
            seed::seed_users(&PgUserRepository::new(pool.clone()), seeds).await?;
        }
        if cli.rollback {
            db::rollback(&pool).await?;
        }
        return Ok(());
    }

    let (state, pool) = AppState::init(config).await?;

    if let Err(e) = db::migrate(&pool).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let config = state.config.clone();
    app::serve(app::build_app(state), &config.host, config.port).await
}
