//! Process-environment configuration, per spec §6's closed external-interface
//! table.
//!
//! Grounded in `graves-awful_aj::config::load_config`'s normalize-and-warn
//! idiom and `lib.rs::config_dir()`'s use of `directories::ProjectDirs` — but
//! reading from `std::env` rather than a YAML file, since spec.md's
//! configuration surface is explicitly env-var only (see DESIGN.md for the
//! YAML-file drop).

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::warn;

use crate::types::MemoryError;

/// Runtime configuration for the embedding provider ladder and the store's
/// on-disk location.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// `auto` | `openai` | `ollama` | `fastembed` | `endpoint`.
    pub embed_provider: String,
    pub embed_model: Option<String>,
    pub embed_base_url: Option<String>,
    pub ollama_host: String,
    pub openai_api_key: Option<String>,
    pub db_path: PathBuf,
}

/// Load configuration from the process environment, normalizing empty
/// strings to `None`/defaults and warning on anything that needed a default.
pub fn load_config() -> Result<MemoryConfig, MemoryError> {
    let embed_provider = non_empty_env("EMBED_PROVIDER").unwrap_or_else(|| "auto".to_string());
    let embed_model = non_empty_env("EMBED_MODEL");
    let embed_base_url = non_empty_env("EMBED_BASE_URL");
    let ollama_host = non_empty_env("OLLAMA_HOST").unwrap_or_else(|| "http://localhost:11434".to_string());
    let openai_api_key = non_empty_env("OPENAI_API_KEY");

    let db_path = match non_empty_env("MNEMEX_DB_PATH") {
        Some(path) => PathBuf::from(path),
        None => {
            warn!("MNEMEX_DB_PATH is unset, using default data directory");
            default_db_path()?
        }
    };

    Ok(MemoryConfig {
        embed_provider,
        embed_model,
        embed_base_url,
        ollama_host,
        openai_api_key,
        db_path,
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `directories::ProjectDirs::from("dev", "mnemex", "mnemex")`'s data
/// directory joined with `memory`, mirroring the teacher's `config_dir()`
/// for `com.awful-sec.aj`.
fn default_db_path() -> Result<PathBuf, MemoryError> {
    let proj_dirs = ProjectDirs::from("dev", "mnemex", "mnemex")
        .ok_or_else(|| MemoryError::Config("unable to determine default data directory".to_string()))?;
    Ok(proj_dirs.data_dir().join("memory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "EMBED_PROVIDER",
            "EMBED_MODEL",
            "EMBED_BASE_URL",
            "OLLAMA_HOST",
            "OPENAI_API_KEY",
            "MNEMEX_DB_PATH",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let config = load_config().unwrap();
        assert_eq!(config.embed_provider, "auto");
        assert_eq!(config.ollama_host, "http://localhost:11434");
        assert!(config.embed_model.is_none());
        clear_all();
    }

    #[test]
    fn explicit_db_path_is_honored() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe { std::env::set_var("MNEMEX_DB_PATH", "/tmp/mnemex-explicit") };
        let config = load_config().unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/mnemex-explicit"));
        clear_all();
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe { std::env::set_var("EMBED_MODEL", "   ") };
        let config = load_config().unwrap();
        assert!(config.embed_model.is_none());
        clear_all();
    }
}
