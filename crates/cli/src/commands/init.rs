//! `carepilot init`: Print or write the default configuration.

use carepilot_config::AppConfig;

pub async fn run(write: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_toml = AppConfig::default_toml();
    if !write {
        println!("{default_toml}");
        return Ok(());
    }

    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run `carepilot init --write`.");
    } else {
        std::fs::write(&config_path, &default_toml)?;
        println!("Created config.toml at: {}", config_path.display());
        println!();
        println!("Next steps:");
        println!("  1. Add your API key to {} (or set CAREPILOT_API_KEY)", config_path.display());
        println!("  2. Run: carepilot assess --patient <id> --fixtures <file>");
    }

    Ok(())
}
