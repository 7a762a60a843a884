use super::Fetcher;
use crate::extractor::{ClassifiedRequest, Platform, VariantKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Backends keyed by `(Platform, VariantKind)`.
///
/// Built once at startup and shared read-only between requests.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<(Platform, VariantKind), Arc<dyn Fetcher>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard wiring of the three backends.
    pub fn standard(
        generic: Arc<dyn Fetcher>,
        stories: Arc<dyn Fetcher>,
        pinterest: Arc<dyn Fetcher>,
    ) -> Self {
        let mut registry = Self::new();
        registry
            .register(Platform::Instagram, VariantKind::Post, generic.clone())
            .register(Platform::YouTube, VariantKind::Standard, generic.clone())
            .register(Platform::TikTok, VariantKind::Standard, generic.clone())
            .register(Platform::Facebook, VariantKind::Standard, generic)
            .register(Platform::Instagram, VariantKind::Story, stories.clone())
            .register(Platform::Instagram, VariantKind::Highlight, stories)
            .register(Platform::Pinterest, VariantKind::Unresolved, pinterest);
        registry
    }

    pub fn register(
        &mut self,
        platform: Platform,
        variant: VariantKind,
        fetcher: Arc<dyn Fetcher>,
    ) -> &mut Self {
        self.backends.insert((platform, variant), fetcher);
        self
    }

    /// Backend for a classified request. `Unsupported` never has one.
    pub fn get(&self, request: &ClassifiedRequest) -> Option<Arc<dyn Fetcher>> {
        if !request.is_supported() {
            return None;
        }
        self.backends
            .get(&(request.platform(), request.variant().kind()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
