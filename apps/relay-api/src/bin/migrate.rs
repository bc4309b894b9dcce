//! Applies the embedded schema migrations (the `chat_messages` table).
//!
//! Usage:
//!   cargo run -p relay-api --bin relay-migrate
//!   cargo run -p relay-api --bin relay-migrate -- --revert
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy).

use std::path::Path;
use std::process::ExitCode;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use relay_api::config::Config;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    let Some(database_url) = config.database_url else {
        eprintln!("DATABASE_URL is not set; nothing to migrate.");
        return ExitCode::FAILURE;
    };
    let revert = std::env::args().any(|arg| arg == "--revert");

    let mut conn = match PgConnection::establish(&database_url) {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("failed to connect to database: {err}");
            return ExitCode::FAILURE;
        }
    };

    if revert {
        return match conn.revert_last_migration(MIGRATIONS) {
            Ok(version) => {
                println!("Reverted: {version}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to revert migration: {err}");
                ExitCode::FAILURE
            }
        };
    }

    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) if applied.is_empty() => println!("No pending migrations."),
        Ok(applied) => {
            for migration in &applied {
                println!("  Applied: {migration}");
            }
        }
        Err(err) => {
            eprintln!("failed to run migrations: {err}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
