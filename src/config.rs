use crate::error::{Result, TransubError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MAX_RETRIES: u32 = 10;

/// Connection settings for the OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Request `response_format: json_object` for JSON prompts.
    pub llm_support_json: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            llm_support_json: false,
            max_retries: 5,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// Source language code, or `auto` to use the language reported by ASR.
    pub source: String,
    /// Target language (code or display name).
    pub target: String,
    pub detected: Option<String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            source: "en".to_string(),
            target: "zh".to_string(),
            detected: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Pause (seconds) that ends a fragment. Zero leaves splitting to the NLP pass.
    pub gap_threshold: f64,
    /// Pause threshold used for unspaced scripts when `gap_threshold` is zero.
    pub cjk_gap_threshold: f64,
    pub min_fragment_chars: usize,
    pub comma_min_words: usize,
    pub connector_context_words: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            gap_threshold: 0.0,
            cjk_gap_threshold: 0.3,
            min_fragment_chars: 5,
            comma_min_words: 3,
            connector_context_words: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeaningConfig {
    pub max_split_length: usize,
    pub relocation_floor: f64,
    pub passes: usize,
}

impl Default for MeaningConfig {
    fn default() -> Self {
        Self {
            max_split_length: 20,
            relocation_floor: 0.8,
            passes: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub chunk_size: usize,
    pub max_lines: usize,
    pub reflect: bool,
    pub chunk_match_floor: f64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            max_lines: 10,
            reflect: true,
            chunk_match_floor: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub max_length: usize,
    pub target_multiplier: f64,
    pub split_rounds: usize,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            max_length: 75,
            target_multiplier: 1.2,
            split_rounds: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub gap_close_max: f64,
    pub origin_match_floor: f64,
    pub correction_min_delta: f64,
    pub correction_max_delta: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            gap_close_max: 1.0,
            origin_match_floor: 0.8,
            correction_min_delta: 0.1,
            correction_max_delta: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurnConfig {
    pub enabled: bool,
    pub font_name: String,
    pub src_font_size: u32,
    pub trans_font_size: u32,
    pub src_font_color: String,
    pub trans_font_color: String,
    pub outline_width: u32,
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            font_name: "Arial".to_string(),
            src_font_size: 15,
            trans_font_size: 17,
            src_font_color: "#FFFFFF".to_string(),
            trans_font_color: "#FFFF00".to_string(),
            outline_width: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub language: LanguageConfig,
    pub max_workers: usize,
    pub summary_length: usize,
    pub min_trim_duration: f64,
    /// Seconds added to every ASR timestamp before splitting.
    pub time_offset: f64,
    pub output_dir: PathBuf,
    pub custom_terms: Option<PathBuf>,
    pub split: SplitConfig,
    pub meaning: MeaningConfig,
    pub translation: TranslationConfig,
    pub subtitle: SubtitleConfig,
    pub alignment: AlignmentConfig,
    pub burn: BurnConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            language: LanguageConfig::default(),
            max_workers: 4,
            summary_length: 8000,
            min_trim_duration: 3.0,
            time_offset: 0.0,
            output_dir: PathBuf::from("output"),
            custom_terms: None,
            split: SplitConfig::default(),
            meaning: MeaningConfig::default(),
            translation: TranslationConfig::default(),
            subtitle: SubtitleConfig::default(),
            alignment: AlignmentConfig::default(),
            burn: BurnConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Load an explicit config file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TransubError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<Config>(&contents)?)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("TRANSUB_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            self.api.key = Some(key);
        }
        if let Ok(url) = std::env::var("TRANSUB_BASE_URL") {
            self.api.base_url = url;
        }
        if let Ok(model) = std::env::var("TRANSUB_MODEL") {
            self.api.model = model;
        }
        if let Ok(target) = std::env::var("TRANSUB_TARGET_LANGUAGE") {
            self.language.target = target;
        }
        if let Ok(workers) = std::env::var("TRANSUB_MAX_WORKERS") {
            if let Ok(w) = workers.parse() {
                self.max_workers = w;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.key.as_deref().map_or(true, str::is_empty) {
            return Err(TransubError::Config(
                "API key not set. Export it with: export TRANSUB_API_KEY=sk-... or set api.key"
                    .to_string(),
            ));
        }

        if self.max_workers == 0 {
            return Err(TransubError::Config(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        if !(1..=MAX_RETRIES).contains(&self.api.max_retries) {
            return Err(TransubError::Config(format!(
                "api.max_retries must be between 1 and {MAX_RETRIES}, got {}",
                self.api.max_retries
            )));
        }

        if self.translation.chunk_size == 0 || self.translation.max_lines == 0 {
            return Err(TransubError::Config(
                "translation.chunk_size and translation.max_lines must be greater than 0"
                    .to_string(),
            ));
        }

        for (name, floor) in [
            ("translation.chunk_match_floor", self.translation.chunk_match_floor),
            ("meaning.relocation_floor", self.meaning.relocation_floor),
            ("alignment.origin_match_floor", self.alignment.origin_match_floor),
        ] {
            if !(floor > 0.0 && floor <= 1.0) {
                return Err(TransubError::Config(format!(
                    "{name} must be in (0, 1], got {floor}"
                )));
            }
        }

        if self.meaning.max_split_length == 0 {
            return Err(TransubError::Config(
                "meaning.max_split_length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Source language in effect: the configured one unless it is `auto`.
    pub fn source_language(&self) -> &str {
        if self.language.source.eq_ignore_ascii_case("auto") {
            self.language.detected.as_deref().unwrap_or("en")
        } else {
            &self.language.source
        }
    }

    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("transub").join("config.toml"))
    }
}

/// A toml document on disk addressed by dotted key paths.
pub struct ConfigStore {
    path: PathBuf,
    doc: Mutex<toml::Value>,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(TransubError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(&path)?;
        let doc: toml::Value = toml::from_str(&contents)?;
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Write `config` to `path` and open it as a store.
    pub fn create(path: impl Into<PathBuf>, config: &Config) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = toml::Value::try_from(config)?;
        std::fs::write(&path, toml::to_string_pretty(&doc)?)?;
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_key(&self, key: &str) -> Result<toml::Value> {
        let doc = self.lock()?;
        let mut node = &*doc;
        for segment in key.split('.') {
            node = node
                .get(segment)
                .ok_or_else(|| TransubError::KeyNotFound(key.to_string()))?;
        }
        Ok(node.clone())
    }

    /// Like `load_key`, but a missing path yields `default`.
    pub fn load_key_or(&self, key: &str, default: toml::Value) -> Result<toml::Value> {
        match self.load_key(key) {
            Err(TransubError::KeyNotFound(_)) => Ok(default),
            other => other,
        }
    }

    /// Replace an existing value and persist the document.
    pub fn update_key(&self, key: &str, value: toml::Value) -> Result<()> {
        let mut doc = self.lock()?;
        {
            let mut node = &mut *doc;
            for segment in key.split('.') {
                node = node
                    .get_mut(segment)
                    .ok_or_else(|| TransubError::KeyNotFound(key.to_string()))?;
            }
            *node = value;
        }
        std::fs::write(&self.path, toml::to_string_pretty(&*doc)?)?;
        Ok(())
    }

    /// Typed view of the current document.
    pub fn config(&self) -> Result<Config> {
        let doc = self.lock()?.clone();
        Ok(doc.try_into()?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, toml::Value>> {
        self.doc
            .lock()
            .map_err(|_| TransubError::Config("config store lock poisoned".to_string()))
    }
}
