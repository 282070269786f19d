//! `agentry init` — write a default config file and prepare the database.

use agentry_config::AppConfig;
use agentry_store::SqliteStore;
use std::path::Path;

const CONFIG_FILE: &str = "agentry.toml";

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Agentry initialization");
    println!("======================");

    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        println!("✓ Config already exists: {CONFIG_FILE}");
    } else {
        std::fs::write(config_path, AppConfig::default_toml())?;
        println!("✓ Wrote default config: {CONFIG_FILE}");
    }

    let config = AppConfig::load()?;
    let store = SqliteStore::new(&config.database.path).await?;
    println!("✓ Database ready: {}", config.database.path);

    let seeded = store.seed_native_actions().await?;
    if seeded > 0 {
        println!("✓ Seeded {seeded} built-in actions");
    } else {
        println!("✓ Built-in actions already present");
    }

    println!();
    println!("Next: `agentry serve` to start the gateway on {}:{}",
        config.server.host, config.server.port);
    Ok(())
}
