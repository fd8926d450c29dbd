use crate::classifier::Classifier;
use crate::config::{AppConfig, InferenceConfig};
use crate::endpoint::EndpointPool;
use crate::error::TaggerError;
use crate::scanner::ScanOptions;
use crate::sweep::{Orchestrator, RetryPolicy};
use providers::ollama::{OllamaConfig, OllamaProvider};
use providers::KeywordProvider;
use std::sync::Arc;
use storage::{IptcKeywordStore, WatermarkStore};

pub fn build_pool(cfg: &InferenceConfig) -> Result<EndpointPool, TaggerError> {
    let providers = cfg
        .endpoints
        .iter()
        .map(|address| {
            OllamaProvider::new(OllamaConfig {
                base_url: address.clone(),
                model: cfg.model.clone(),
                timeout: cfg.request_timeout(),
                pull_timeout: cfg.pull_timeout(),
            })
            .map(|p| Arc::new(p) as Arc<dyn KeywordProvider>)
            .map_err(|e| TaggerError::Configuration(format!("endpoint {address}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    EndpointPool::new(providers, cfg.switch_delay())
}

pub fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.scan.max_retries,
        backoff_unit: config.scan.backoff_unit(),
    }
}

pub fn scan_options(config: &AppConfig) -> anyhow::Result<ScanOptions> {
    ScanOptions::new(
        &config.scan.reserved_dirs,
        &config.scan.exclude,
        config.scan.follow_links,
    )
}

/// Wires the production collaborators: Ollama endpoints, IPTC keyword
/// store and the watermark file.
pub fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let pool = Arc::new(build_pool(&config.inference)?);
    Orchestrator::new(
        pool,
        Classifier::from_config(&config.inference),
        Arc::new(IptcKeywordStore::new()),
        config.tagging.clone(),
        scan_options(config)?,
        retry_policy(config),
        WatermarkStore::new(&config.state.watermark_path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_one_endpoint_per_address() {
        let mut cfg = InferenceConfig::default();
        cfg.endpoints = vec!["http://a:11434".into(), "http://b:11434/".into()];
        let pool = build_pool(&cfg).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let status = rt.block_on(pool.status());
        let addresses: Vec<&str> = status.iter().map(|s| s.address.as_str()).collect();
        assert_eq!(addresses, vec!["http://a:11434", "http://b:11434"]);
        assert!(status.iter().all(|s| !s.active));
    }

    #[test]
    fn retry_policy_follows_scan_section() {
        let mut cfg = AppConfig::default();
        cfg.scan.max_retries = 4;
        cfg.scan.retry_backoff_ms = 250;
        let policy = retry_policy(&cfg);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay(2), std::time::Duration::from_millis(500));
    }
}
