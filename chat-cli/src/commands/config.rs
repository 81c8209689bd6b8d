//! Load and show the client configuration.

use anyhow::{Context, Result};
use relaychat_client::ClientConfig;
use std::path::Path;

/// Load `path`, or the defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => {
            let config = ClientConfig::from_file(path)?;
            tracing::debug!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(ClientConfig::default()),
    }
}

/// Run the config command.
pub fn run(config: &ClientConfig) -> Result<()> {
    let rendered = config
        .to_toml()
        .context("Failed to render configuration")?;
    println!("{}", rendered.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_without_file_uses_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn load_merges_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[background]\nmax_tracked = 7").unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.background.max_tracked, 7);
        assert_eq!(config.loader, ClientConfig::default().loader);
    }

    #[test]
    fn load_missing_file_fails() {
        let result = load(Some(Path::new("/nonexistent/relaychat.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn rendered_config_parses_back() {
        let config = ClientConfig::default();
        let rendered = config.to_toml().unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();
        assert_eq!(load(Some(file.path())).unwrap(), config);
        assert!(run(&config).is_ok());
    }
}
