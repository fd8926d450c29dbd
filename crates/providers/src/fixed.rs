use crate::{KeywordProvider, ProviderError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-process provider with scripted behaviour. Answers every request with
/// the same keyword list and can be switched between up and down at runtime.
#[derive(Debug)]
pub struct FixedProvider {
    address: String,
    keywords: Vec<String>,
    ready: AtomicBool,
    answering: AtomicBool,
    probes: AtomicUsize,
    requests: AtomicUsize,
}

impl FixedProvider {
    pub fn new(address: &str, keywords: &[&str]) -> Self {
        Self {
            address: address.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            ready: AtomicBool::new(true),
            answering: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        }
    }

    /// Provider that refuses readiness probes.
    pub fn down(address: &str) -> Self {
        let p = Self::new(address, &[]);
        p.set_ready(false);
        p
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// When false, readiness still passes but every keyword request fails.
    pub fn set_answering(&self, answering: bool) {
        self.answering.store(answering, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl KeywordProvider for FixedProvider {
    fn address(&self) -> &str {
        &self.address
    }

    async fn ensure_ready(&self) -> Result<(), ProviderError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::RequestFailed(format!(
                "{} is unreachable",
                self.address
            )))
        }
    }

    async fn keywords(&self, _prompt: &str, _jpeg: &[u8]) -> Result<Vec<String>, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.ready.load(Ordering::SeqCst) {
            return Err(ProviderError::RequestFailed(format!(
                "{} is unreachable",
                self.address
            )));
        }
        if !self.answering.load(Ordering::SeqCst) {
            return Err(ProviderError::MalformedResponse("missing field `keywords`".into()));
        }
        Ok(self.keywords.clone())
    }
}
