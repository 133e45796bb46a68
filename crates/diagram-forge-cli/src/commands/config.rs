//! Config command implementation.
//!
//! Manages CLI configuration.

use anyhow::Result;
use diagram_forge_ops::Config;

/// Show current configuration.
pub fn show(config: &Config) -> Result<()> {
    println!("Diagram-Forge CLI Configuration");
    println!("{:-<40}", "");

    for key in Config::KEYS {
        let value = config.get(key).unwrap_or_default();
        println!("{:<22}{}", format!("{key}:"), value);
    }

    if let Some(config_path) = Config::config_file_path() {
        println!("\nConfig file: {}", config_path.display());
    }

    Ok(())
}

/// Set a configuration value.
pub fn set(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let key = normalize(key);
    if let Err(e) = config.set(&key, value) {
        anyhow::bail!("{}. Valid keys: {}", e, Config::KEYS.join(", "));
    }
    config.save()?;

    let stored = config.get(&key).unwrap_or_default();
    println!("Set {} to: {}", key, stored);
    Ok(())
}

/// Get a configuration value.
pub fn get(config: &Config, key: &str) -> Result<()> {
    let key = normalize(key);
    let Some(value) = config.get(&key) else {
        anyhow::bail!("Unknown config key: {}", key);
    };
    println!("{}", value);
    Ok(())
}

/// Reset configuration to defaults.
pub fn reset() -> Result<()> {
    let config = Config::default();
    config.save()?;
    println!("Configuration reset to defaults");
    Ok(())
}

/// Accept `backend-url` as well as `backend_url`.
fn normalize(key: &str) -> String {
    key.trim().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_dashes() {
        assert_eq!(normalize("backend-url"), "backend_url");
        assert_eq!(normalize(" raster_scale "), "raster_scale");
    }
}
