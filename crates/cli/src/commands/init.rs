//! `agentgate init` — Write the default policy configuration.

use agentgate_config::PolicyConfig;

pub fn run() -> i32 {
    let config = PolicyConfig::default();
    let path = config.state_dir.join("config.toml");

    if path.exists() {
        println!("Config already exists at {}", path.display());
        return 0;
    }

    if let Err(e) = std::fs::create_dir_all(&config.state_dir) {
        eprintln!("Failed to create {}: {e}", config.state_dir.display());
        return 5;
    }
    if let Err(e) = std::fs::write(&path, PolicyConfig::default_toml()) {
        eprintln!("Failed to write {}: {e}", path.display());
        return 5;
    }

    println!("Wrote default policy config to {}", path.display());
    0
}
