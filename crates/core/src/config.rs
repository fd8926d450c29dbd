use crate::error::TaggerError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Flat environment names understood for compatibility with existing
/// container deployments, mapped onto config keys.
const FLAT_ENV: &[(&str, &str)] = &[
    ("MODEL", "inference.model"),
    ("PROMPT", "inference.prompt"),
    ("OLLAMA_HOST", "inference.endpoints"),
    ("SWITCH_DELAY_SEC", "inference.switch_delay_secs"),
    ("IMAGE_SIZE", "inference.image_size"),
    ("JPEG_QUALITY", "inference.jpeg_quality"),
    ("FIXED_KEYWORD", "tagging.fixed_keyword"),
    ("KEEP_EXISTING_TAGS", "tagging.keep_existing"),
    ("SKIP_MANUALLY_TAGGED", "tagging.skip_manually_tagged"),
    ("IMAGE_PATH", "scan.root"),
    ("SLEEP_DURATION_SEC", "scan.interval_secs"),
    ("MAX_RETRIES", "scan.max_retries"),
    ("WATERMARK_FILE", "state.watermark_path"),
];

const ENV_PREFIX: &str = "TAGGER_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub model: String,
    pub prompt: String,
    /// Endpoint addresses in priority order.
    #[serde(deserialize_with = "string_or_list")]
    pub endpoints: Vec<String>,
    pub switch_delay_secs: u64,
    pub request_timeout_secs: u64,
    /// Model download limit; 0 waits until the pull finishes.
    pub pull_timeout_secs: u64,
    pub image_size: u32,
    pub jpeg_quality: u8,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: "gemma3:4b".to_string(),
            prompt: "Generate 5 to 10 fitting keywords for this image.".to_string(),
            endpoints: vec!["http://ollama:11434".to_string()],
            switch_delay_secs: 60,
            request_timeout_secs: 300,
            pull_timeout_secs: 0,
            image_size: 896,
            jpeg_quality: 90,
        }
    }
}

impl InferenceConfig {
    pub fn switch_delay(&self) -> Duration {
        Duration::from_secs(self.switch_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Option<Duration> {
        (self.pull_timeout_secs > 0).then(|| Duration::from_secs(self.pull_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingConfig {
    /// Marker appended to every generated keyword set.
    pub fixed_keyword: String,
    pub keep_existing: bool,
    pub skip_manually_tagged: bool,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            fixed_keyword: "LLM-Generated".to_string(),
            keep_existing: true,
            skip_manually_tagged: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub root: String,
    #[serde(deserialize_with = "string_or_list")]
    pub exclude: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub reserved_dirs: Vec<String>,
    pub follow_links: bool,
    pub interval_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: "/mnt/images".to_string(),
            exclude: Vec::new(),
            reserved_dirs: vec!["@eaDir".to_string()],
            follow_links: true,
            interval_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub watermark_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            watermark_path: "state/watermark".to_string(),
        }
    }
}

/// Accepts either a list or a comma-separated string.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    let items = match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s.split(',').map(str::to_string).collect(),
        StringOrList::Many(v) => v,
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), TaggerError> {
        let invalid = |msg: String| Err(TaggerError::Configuration(msg));
        if self.inference.endpoints.is_empty() {
            return invalid("no inference endpoint configured".into());
        }
        if let Some(bad) = self
            .inference
            .endpoints
            .iter()
            .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
        {
            return invalid(format!("endpoint {bad:?} must be an http(s) URL"));
        }
        if self.inference.model.trim().is_empty() {
            return invalid("model must not be empty".into());
        }
        if self.tagging.fixed_keyword.trim().is_empty() {
            return invalid("fixed keyword must not be empty".into());
        }
        if self.inference.image_size == 0 {
            return invalid("image size must be positive".into());
        }
        if !(1..=100).contains(&self.inference.jpeg_quality) {
            return invalid(format!(
                "jpeg quality {} is outside 1..=100",
                self.inference.jpeg_quality
            ));
        }
        if self.scan.max_retries == 0 {
            return invalid("max retries must be at least 1".into());
        }
        for pattern in &self.scan.exclude {
            globset::Glob::new(pattern)
                .map_err(|e| TaggerError::Configuration(format!("exclude {pattern:?}: {e}")))?;
        }
        Ok(())
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    load_with_env(path, &std::env::vars().collect())
}

/// Builds the configuration from an optional file and the given environment.
pub fn load_with_env(
    path: Option<&str>,
    env: &HashMap<String, String>,
) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }

    let mut prefixed: Vec<(&String, &String)> = env
        .iter()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect();
    prefixed.sort();
    for (name, value) in prefixed {
        let key = name[ENV_PREFIX.len()..].to_lowercase().replace("__", ".");
        settings = settings.set_override(key, value.as_str())?;
    }
    for (name, key) in FLAT_ENV {
        if let Some(value) = env.get(*name) {
            settings = settings.set_override(*key, value.as_str())?;
        }
    }

    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_for_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.toml");
        std::fs::write(&empty, "").unwrap();
        let cfg = load_with_env(empty.to_str(), &env(&[])).unwrap();
        assert_eq!(cfg.inference.model, "gemma3:4b");
        assert_eq!(cfg.inference.image_size, 896);
        assert_eq!(cfg.inference.jpeg_quality, 90);
        assert_eq!(cfg.tagging.fixed_keyword, "LLM-Generated");
        assert_eq!(cfg.scan.reserved_dirs, vec!["@eaDir"]);
        assert_eq!(cfg.scan.max_retries, 3);
        assert_eq!(cfg.inference.request_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.inference.pull_timeout(), None);
    }

    #[test]
    fn pull_timeout_is_separate_from_request_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tagger.toml");
        std::fs::write(&file, "[inference]\nrequest_timeout_secs = 30\n").unwrap();
        let cfg = load_with_env(
            file.to_str(),
            &env(&[("TAGGER_INFERENCE__PULL_TIMEOUT_SECS", "7200")]),
        )
        .unwrap();
        assert_eq!(cfg.inference.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.inference.pull_timeout(), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn flat_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tagger.toml");
        std::fs::write(
            &file,
            "[inference]\nmodel = \"llava\"\nimage_size = 512\n[tagging]\nkeep_existing = true\n",
        )
        .unwrap();
        let cfg = load_with_env(
            file.to_str(),
            &env(&[
                ("MODEL", "gemma3:12b"),
                ("OLLAMA_HOST", "http://a:11434, http://b:11434"),
                ("KEEP_EXISTING_TAGS", "false"),
                ("SKIP_MANUALLY_TAGGED", "true"),
                ("SLEEP_DURATION_SEC", "5"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.inference.model, "gemma3:12b");
        assert_eq!(cfg.inference.image_size, 512);
        assert_eq!(
            cfg.inference.endpoints,
            vec!["http://a:11434".to_string(), "http://b:11434".to_string()]
        );
        assert!(!cfg.tagging.keep_existing);
        assert!(cfg.tagging.skip_manually_tagged);
        assert_eq!(cfg.scan.interval(), Duration::from_secs(5));
    }

    #[test]
    fn dimension_and_flags_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tagger.toml");
        std::fs::write(&file, "").unwrap();
        let cfg = load_with_env(
            file.to_str(),
            &env(&[("IMAGE_SIZE", "640"), ("KEEP_EXISTING_TAGS", "false")]),
        )
        .unwrap();
        assert_eq!(cfg.inference.image_size, 640);
        assert!(!cfg.tagging.keep_existing);
        assert!(!cfg.tagging.skip_manually_tagged);
    }

    #[test]
    fn prefixed_env_reaches_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tagger.toml");
        std::fs::write(&file, "").unwrap();
        let cfg = load_with_env(
            file.to_str(),
            &env(&[
                ("TAGGER_SCAN__RETRY_BACKOFF_MS", "10"),
                ("TAGGER_STATE__WATERMARK_PATH", "/data/wm"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.scan.backoff_unit(), Duration::from_millis(10));
        assert_eq!(cfg.state.watermark_path, "/data/wm");
    }

    #[test]
    fn empty_endpoint_list_is_a_configuration_error() {
        let mut cfg = AppConfig::default();
        cfg.inference.endpoints.clear();
        assert!(matches!(
            cfg.validate(),
            Err(TaggerError::Configuration(_))
        ));
    }

    #[test]
    fn quality_and_retries_are_range_checked() {
        let mut cfg = AppConfig::default();
        cfg.inference.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = AppConfig::default();
        cfg.scan.max_retries = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = AppConfig::default();
        cfg.inference.endpoints = vec!["ollama:11434".into()];
        assert!(cfg.validate().is_err());
        assert!(AppConfig::default().validate().is_ok());
    }
}
