//! Configuration management for mend
//!
//! Two layers: the on-disk user config (API key and endpoint overrides,
//! stored in ~/.config/mend/config.json with the key itself living in the
//! system keychain), and the explicit `PipelineConfig` struct handed to the
//! orchestrator so limits are per-run values rather than process globals.

use crate::lang::ProjectKind;
use crate::llm::models::{DEFAULT_EMBEDDING_MODEL, DEFAULT_MODEL};
use crate::sandbox::DEFAULT_TEST_TIMEOUT;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const KEYRING_SERVICE: &str = "mend";
const KEYRING_USERNAME: &str = "api_key";

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_keyring_key(key: &str) -> Result<(), keyring::Error> {
    let entry = keyring_entry()?;
    entry.set_password(key)
}

/// On-disk user configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Legacy plaintext key; migrated to the keychain on first read.
    pub api_key: Option<String>,
    /// Override for the chat-completions endpoint.
    pub chat_endpoint: Option<String>,
    /// Override for the embeddings endpoint.
    pub embeddings_endpoint: Option<String>,
    /// Override for the chat model id.
    pub model: Option<String>,
    /// Override for the embedding model id.
    pub embedding_model: Option<String>,
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mend"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). Defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;

        Ok(())
    }

    /// Get the API key (environment takes precedence over the keychain).
    pub fn get_api_key(&mut self) -> Option<String> {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            if !key.is_empty() {
                return Some(key);
            }
        }

        match read_keyring_key() {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(err) => {
                eprintln!("  Warning: Failed to read API key from system keychain: {}", err);
                eprintln!("  Tip: Set the OPENROUTER_API_KEY environment variable as a workaround.");
            }
        }

        // Legacy migration of plaintext keys into the keychain.
        if let Some(key) = self.api_key.clone() {
            eprintln!("  Migrating API key from config file to system keychain...");
            match write_keyring_key(&key) {
                Ok(()) => {
                    self.api_key = None;
                    let _ = self.save();
                }
                Err(err) => {
                    eprintln!("  Warning: Failed to migrate API key to keychain: {}", err);
                }
            }
            return Some(key);
        }

        None
    }

    /// Set and save the API key
    pub fn set_api_key(&mut self, key: &str) -> Result<(), String> {
        if let Err(write_err) = write_keyring_key(key) {
            return Err(format!(
                "Failed to store API key in system keychain: {}. \
                 You can set the OPENROUTER_API_KEY environment variable instead.",
                write_err
            ));
        }
        self.api_key = None;
        self.save()
    }

    pub fn chat_model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn embedding_model(&self) -> String {
        self.embedding_model
            .clone()
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string())
    }
}

/// Interactive prompt to set up the API key
pub fn setup_api_key_interactive() -> Result<(), String> {
    use std::io::{self, Write};

    println!();
    println!("  mend uses an OpenRouter-compatible API for code generation.");
    println!();
    println!("  1. Get an API key at: https://openrouter.ai/keys");
    println!("  2. Paste it below (saved in your system keychain when available)");
    println!();
    print!("  API Key: ");
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut key = String::new();
    io::stdin().read_line(&mut key).map_err(|e| e.to_string())?;
    let key = key.trim().to_string();

    if key.is_empty() {
        return Err("No API key provided".to_string());
    }

    let mut config = Config::load();
    config.set_api_key(&key)?;

    println!();
    println!("  + API key saved.");
    Ok(())
}

/// Per-run limits and knobs for the orchestrator.
///
/// Passed into the pipeline constructor instead of living as process-wide
/// constants, so tests can run with different limits side by side.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chat model id for all generative calls.
    pub model: String,
    /// Docker image for the sandboxed test run.
    pub docker_image: String,
    /// Shell command executed inside the sandbox.
    pub test_command: String,
    /// Review/regenerate rounds before publishing the best attempt.
    pub max_review_iterations: u32,
    /// Test/repair rounds before publishing with a failure annotation.
    pub max_repairs: u32,
    /// Wall-clock limit for one sandboxed test run.
    pub test_timeout: Duration,
    /// Total prompt-context token budget.
    pub max_context_tokens: usize,
    /// Target chunk size (characters) for the retrieval index.
    pub chunk_size: usize,
    /// Candidate files requested from the retriever.
    pub max_candidate_files: usize,
    /// Run the sandboxed verification loop.
    pub sandbox_enabled: bool,
    /// Push and open PRs; disabled for local dry runs.
    pub push_enabled: bool,
    /// Rebuild the chunk index even when a cached one exists.
    pub force_reindex: bool,
}

impl PipelineConfig {
    /// Defaults for a repository of the given project kind.
    pub fn for_project(kind: ProjectKind) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            docker_image: kind.docker_image().to_string(),
            test_command: kind.test_command().to_string(),
            max_review_iterations: 3,
            max_repairs: 3,
            test_timeout: DEFAULT_TEST_TIMEOUT,
            max_context_tokens: 16000,
            chunk_size: 1000,
            max_candidate_files: 20,
            sandbox_enabled: true,
            push_enabled: true,
            force_reindex: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_project(ProjectKind::Unknown)
    }
}
