//! Provisioning utility: creates one upload account per territory (username =
//! territory code) plus a single admin account. Operational script, run once
//! after the territory registry is loaded; existing accounts are left alone.
//!
//! Optionally seeds the territory registry first from a CSV-style file named
//! by TERRITORY_SEED_FILE, one territory per line: code,name,region,zone.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use threegen_portal::{
    auth,
    config::AppConfig,
    models::{NewAccount, NewTerritory},
    repository::{PostgresRepository, Repository, RepositoryState},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.db_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    if let Ok(seed_file) = std::env::var("TERRITORY_SEED_FILE") {
        seed_territories(&repo, &seed_file).await?;
    }

    let territory_password =
        std::env::var("PROVISION_TERRITORY_PASSWORD").unwrap_or_else(|_| "123456".to_string());
    let admin_password =
        std::env::var("PROVISION_ADMIN_PASSWORD").unwrap_or_else(|_| "rpl@123".to_string());

    // One account per territory, username = territory code.
    for territory in repo.list_territories().await? {
        if repo
            .get_account_by_username(&territory.code)
            .await?
            .is_some()
        {
            println!("User {} already exists", territory.code);
            continue;
        }

        repo.create_account(NewAccount {
            username: territory.code.clone(),
            password_hash: auth::hash_password(&territory_password)?,
            role: "territory".to_string(),
            territory_id: Some(territory.id),
        })
        .await?;
        println!("Created user for {}", territory.code);
    }

    // The administrative account.
    if repo.get_account_by_username("admin").await?.is_some() {
        println!("Admin user already exists");
    } else {
        repo.create_account(NewAccount {
            username: "admin".to_string(),
            password_hash: auth::hash_password(&admin_password)?,
            role: "admin".to_string(),
            territory_id: None,
        })
        .await?;
        println!("Created admin user");
    }

    Ok(())
}

async fn seed_territories(
    repo: &RepositoryState,
    seed_file: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let contents = tokio::fs::read_to_string(seed_file).await?;

    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            eprintln!("Skipping malformed seed line: {line}");
            continue;
        }

        let code = fields[0];
        if repo.get_territory_by_code(code).await?.is_some() {
            println!("Territory {code} already exists");
            continue;
        }

        repo.create_territory(NewTerritory {
            code: code.to_string(),
            name: fields[1].to_string(),
            region: fields[2].to_string(),
            zone: fields[3].to_string(),
        })
        .await?;
        println!("Created territory {code}");
    }

    Ok(())
}
