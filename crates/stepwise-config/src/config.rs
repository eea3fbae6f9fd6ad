//! Configuration management for stepwise
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > file > defaults. Config files are TOML with `[run]`,
//! `[chunking]` and `[llm]` sections.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use stepwise_utils::error::ConfigError;

pub const DEFAULT_ENTRY_TASK: &str = "analysis";
pub const DEFAULT_MAX_STEPS: usize = 16;
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
pub const DEFAULT_CHUNK_THRESHOLD: usize = 200;
pub const DEFAULT_MODEL: &str = "deepseek-reasoner";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

const CONFIG_DIR_NAME: &str = ".stepwise";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration for stepwise runs.
///
/// Use [`Config::discover()`] for CLI-like behavior that:
/// - uses `--config` when given,
/// - otherwise searches for `.stepwise/config.toml` upward from the current
///   directory, stopping at repository roots,
/// - otherwise falls back to `$STEPWISE_HOME/config.toml` or the user config
///   directory.
///
/// Each value tracks its source for `stepwise config`.
#[derive(Debug, Clone)]
pub struct Config {
    pub run: RunConfig,
    pub chunking: ChunkingConfig,
    pub llm: LlmConfig,
    /// Source attribution for each setting.
    pub source_attribution: HashMap<String, ConfigSource>,
    /// The config file that was loaded, if any.
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub entry_task: String,
    pub max_steps: usize,
    /// Whole-run deadline, translated into `RunHandle::cancel_after`.
    pub timeout_secs: Option<u64>,
    pub event_capacity: usize,
}

/// Streaming chunk settings for tasks that surface partial model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub threshold: usize,
    pub break_on: Vec<String>,
    pub hard_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Any OpenAI-compatible chat completions endpoint
    OpenAi,
    /// Deterministic canned output; used for dry runs and tests
    Scripted,
}

impl Provider {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" => Some(Self::OpenAi),
            "scripted" => Some(Self::Scripted),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Scripted => "scripted",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Per-task model overrides keyed by task name.
    pub models: BTreeMap<String, String>,
}

impl LlmConfig {
    /// Model to use for `task`, honouring `[llm.models]` overrides.
    #[must_use]
    pub fn model_for_task(&self, task: &str) -> &str {
        self.models.get(task).map_or(self.model.as_str(), String::as_str)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            entry_task: DEFAULT_ENTRY_TASK.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            timeout_secs: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CHUNK_THRESHOLD,
            break_on: vec!["\n\n".to_string()],
            hard_limit: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            models: BTreeMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            chunking: ChunkingConfig::default(),
            llm: LlmConfig::default(),
            source_attribution: HashMap::new(),
            config_path: None,
        }
    }
}

/// Source of a configuration value for attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env(&'static str),
    ConfigFile(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env(var) => write!(f, "env ({var})"),
            Self::ConfigFile(path) => write!(f, "config file ({})", path.display()),
            Self::Defaults => write!(f, "defaults"),
        }
    }
}

/// CLI arguments for configuration override
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub entry_task: Option<String>,
    pub max_steps: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub llm_provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlConfig {
    run: Option<TomlRun>,
    chunking: Option<TomlChunking>,
    llm: Option<TomlLlm>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlRun {
    entry_task: Option<String>,
    max_steps: Option<usize>,
    timeout_secs: Option<u64>,
    event_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlChunking {
    threshold: Option<usize>,
    break_on: Option<Vec<String>>,
    hard_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlLlm {
    provider: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key_env: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    models: BTreeMap<String, String>,
}

impl Config {
    /// Discover and load configuration with precedence: CLI > env > file > defaults
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let start_dir = env::current_dir().map_err(|e| ConfigError::DiscoveryFailed {
            reason: format!("failed to get current directory: {e}"),
        })?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover starting from a specific directory, falling back to the user
    /// config directory.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self, ConfigError> {
        Self::discover_from_with_home(start_dir, user_config_dir().as_deref(), cli_args)
    }

    /// Path-driven discovery that never consults process-global state for the
    /// user-level fallback. `home` is the directory holding a user-level
    /// `config.toml`.
    pub fn discover_from_with_home(
        start_dir: &Path,
        home: Option<&Path>,
        cli_args: &CliArgs,
    ) -> Result<Self, ConfigError> {
        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    });
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir)?.or_else(|| {
                home.map(|h| h.join(CONFIG_FILE_NAME))
                    .filter(|p| p.is_file())
            }),
        };

        let file_config = match &config_path {
            Some(path) => Some(Self::load_config_file(path)?),
            None => None,
        };

        Self::from_layers(file_config, config_path, cli_args)
    }

    /// Walk up from `start_dir` looking for `.stepwise/config.toml`, stopping
    /// at repository root markers (.git, .hg, .svn) or the filesystem root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.is_file() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists()
                || current_dir.join(".hg").exists()
                || current_dir.join(".svn").exists()
            {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load configuration from a TOML file.
    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile(
            format!("failed to read {}: {e}", path.display()),
        ))?;
        toml::from_str(&content).map_err(|e| {
            ConfigError::InvalidFile(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Parse configuration from TOML text with no CLI overrides, e.g. for
    /// embedding.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: TomlConfig = toml::from_str(content)
            .map_err(|e| ConfigError::InvalidFile(e.to_string()))?;
        Self::from_layers(Some(file), None, &CliArgs::default())
    }

    fn from_layers(
        file_config: Option<TomlConfig>,
        config_path: Option<PathBuf>,
        cli_args: &CliArgs,
    ) -> Result<Self, ConfigError> {
        let mut source_attribution = HashMap::new();
        let mut run = RunConfig::default();
        let mut chunking = ChunkingConfig::default();
        let mut llm = LlmConfig::default();
        // Provider is parsed once all layers have been applied.
        let mut provider_raw: Option<String> = None;

        for key in [
            "run.entry_task",
            "run.max_steps",
            "run.event_capacity",
            "chunking.threshold",
            "chunking.break_on",
            "llm.provider",
            "llm.model",
            "llm.base_url",
            "llm.api_key_env",
            "llm.max_tokens",
            "llm.temperature",
            "llm.request_timeout_secs",
        ] {
            source_attribution.insert(key.to_string(), ConfigSource::Defaults);
        }

        if let Some(file) = file_config {
            let source = ConfigSource::ConfigFile(
                config_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("<inline>")),
            );
            let mut from_file = |key: &str| {
                source_attribution.insert(key.to_string(), source.clone());
            };

            if let Some(file_run) = file.run {
                if let Some(entry_task) = file_run.entry_task {
                    run.entry_task = entry_task;
                    from_file("run.entry_task");
                }
                if let Some(max_steps) = file_run.max_steps {
                    run.max_steps = max_steps;
                    from_file("run.max_steps");
                }
                if file_run.timeout_secs.is_some() {
                    run.timeout_secs = file_run.timeout_secs;
                    from_file("run.timeout_secs");
                }
                if let Some(capacity) = file_run.event_capacity {
                    run.event_capacity = capacity;
                    from_file("run.event_capacity");
                }
            }

            if let Some(file_chunking) = file.chunking {
                if let Some(threshold) = file_chunking.threshold {
                    chunking.threshold = threshold;
                    from_file("chunking.threshold");
                }
                if let Some(break_on) = file_chunking.break_on {
                    chunking.break_on = break_on;
                    from_file("chunking.break_on");
                }
                if file_chunking.hard_limit.is_some() {
                    chunking.hard_limit = file_chunking.hard_limit;
                    from_file("chunking.hard_limit");
                }
            }

            if let Some(file_llm) = file.llm {
                if file_llm.provider.is_some() {
                    provider_raw = file_llm.provider;
                    from_file("llm.provider");
                }
                if let Some(model) = file_llm.model {
                    llm.model = model;
                    from_file("llm.model");
                }
                if let Some(base_url) = file_llm.base_url {
                    llm.base_url = base_url;
                    from_file("llm.base_url");
                }
                if let Some(api_key_env) = file_llm.api_key_env {
                    llm.api_key_env = api_key_env;
                    from_file("llm.api_key_env");
                }
                if let Some(max_tokens) = file_llm.max_tokens {
                    llm.max_tokens = max_tokens;
                    from_file("llm.max_tokens");
                }
                if let Some(temperature) = file_llm.temperature {
                    llm.temperature = temperature;
                    from_file("llm.temperature");
                }
                if let Some(timeout) = file_llm.request_timeout_secs {
                    llm.request_timeout_secs = timeout;
                    from_file("llm.request_timeout_secs");
                }
                if !file_llm.models.is_empty() {
                    llm.models = file_llm.models;
                    from_file("llm.models");
                }
            }
        }

        if let Ok(env_provider) = env::var("STEPWISE_LLM_PROVIDER")
            && !env_provider.is_empty()
        {
            provider_raw = Some(env_provider);
            source_attribution.insert(
                "llm.provider".to_string(),
                ConfigSource::Env("STEPWISE_LLM_PROVIDER"),
            );
        }

        // CLI overrides (highest priority)
        if let Some(entry_task) = &cli_args.entry_task {
            run.entry_task = entry_task.clone();
            source_attribution.insert("run.entry_task".to_string(), ConfigSource::Cli);
        }
        if let Some(max_steps) = cli_args.max_steps {
            run.max_steps = max_steps;
            source_attribution.insert("run.max_steps".to_string(), ConfigSource::Cli);
        }
        if let Some(timeout) = cli_args.timeout_secs {
            run.timeout_secs = Some(timeout);
            source_attribution.insert("run.timeout_secs".to_string(), ConfigSource::Cli);
        }
        if let Some(provider) = &cli_args.llm_provider {
            provider_raw = Some(provider.clone());
            source_attribution.insert("llm.provider".to_string(), ConfigSource::Cli);
        }
        if let Some(model) = &cli_args.model {
            llm.model = model.clone();
            source_attribution.insert("llm.model".to_string(), ConfigSource::Cli);
        }

        if let Some(raw) = provider_raw {
            llm.provider = Provider::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "llm.provider".to_string(),
                value: format!("unknown provider '{raw}'"),
            })?;
        }

        let config = Self {
            run,
            chunking,
            llm,
            source_attribution,
            config_path,
        };

        config.validate()?;
        tracing::debug!(
            config_path = ?config.config_path,
            provider = %config.llm.provider,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.run.entry_task.trim().is_empty() {
            errors.push(("run.entry_task", "must not be empty".to_string()));
        }
        if self.run.max_steps == 0 {
            errors.push(("run.max_steps", "must be greater than 0".to_string()));
        }
        if self.run.timeout_secs == Some(0) {
            errors.push(("run.timeout_secs", "must be greater than 0".to_string()));
        }
        if self.run.event_capacity == 0 {
            errors.push(("run.event_capacity", "must be greater than 0".to_string()));
        }
        if self.chunking.threshold == 0 {
            errors.push(("chunking.threshold", "must be greater than 0".to_string()));
        }
        if self.chunking.break_on.iter().any(String::is_empty) {
            errors.push((
                "chunking.break_on",
                "break strings must not be empty".to_string(),
            ));
        }
        if let Some(hard_limit) = self.chunking.hard_limit
            && hard_limit < self.chunking.threshold
        {
            errors.push((
                "chunking.hard_limit",
                format!(
                    "{hard_limit} is smaller than the threshold {}",
                    self.chunking.threshold
                ),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            errors.push((
                "llm.temperature",
                format!("{} is outside 0.0..=2.0", self.llm.temperature),
            ));
        }
        if self.llm.max_tokens == 0 {
            errors.push(("llm.max_tokens", "must be greater than 0".to_string()));
        }
        if self.llm.model.trim().is_empty() {
            errors.push(("llm.model", "must not be empty".to_string()));
        }
        if self.llm.provider == Provider::OpenAi
            && !(self.llm.base_url.starts_with("https://")
                || self.llm.base_url.starts_with("http://"))
        {
            errors.push((
                "llm.base_url",
                format!("'{}' is not an http(s) URL", self.llm.base_url),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => {
                let (key, value) = errors.remove(0);
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })
            }
            _ => Err(ConfigError::ValidationFailed {
                errors: errors
                    .into_iter()
                    .map(|(key, value)| format!("{key}: {value}"))
                    .collect(),
            }),
        }
    }

    /// Effective configuration as `key -> (value, source)`.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut config = BTreeMap::new();

        let mut add = |key: &str, value: String| {
            let source = self
                .source_attribution
                .get(key)
                .map_or_else(|| "defaults".to_string(), ToString::to_string);
            config.insert(key.to_string(), (value, source));
        };

        add("run.entry_task", self.run.entry_task.clone());
        add("run.max_steps", self.run.max_steps.to_string());
        if let Some(timeout) = self.run.timeout_secs {
            add("run.timeout_secs", timeout.to_string());
        }
        add("run.event_capacity", self.run.event_capacity.to_string());
        add("chunking.threshold", self.chunking.threshold.to_string());
        add("chunking.break_on", format!("{:?}", self.chunking.break_on));
        if let Some(hard_limit) = self.chunking.hard_limit {
            add("chunking.hard_limit", hard_limit.to_string());
        }
        add("llm.provider", self.llm.provider.to_string());
        add("llm.model", self.llm.model.clone());
        add("llm.base_url", self.llm.base_url.clone());
        add("llm.api_key_env", self.llm.api_key_env.clone());
        add("llm.max_tokens", self.llm.max_tokens.to_string());
        add("llm.temperature", self.llm.temperature.to_string());
        add(
            "llm.request_timeout_secs",
            self.llm.request_timeout_secs.to_string(),
        );
        for (task, model) in &self.llm.models {
            add(&format!("llm.models.{task}"), model.clone());
        }

        config
    }
}

/// `$STEPWISE_HOME`, else `<user config dir>/stepwise`.
fn user_config_dir() -> Option<PathBuf> {
    if let Ok(home) = env::var("STEPWISE_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs::config_dir().map(|d| d.join("stepwise"))
}
