use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::adapter::{DetectorAdapter, TrackingMode};
use crate::detect::backend::{DetectorBackend, SubjectTracker};
use crate::detect::backends::BlobBackend;

type BackendFactory = Box<dyn Fn(&str) -> Box<dyn DetectorBackend> + Send + Sync>;
type TrackerFactory = Box<dyn Fn(&str) -> Box<dyn SubjectTracker> + Send + Sync>;

struct Entry {
    backend: BackendFactory,
    tracker: Option<TrackerFactory>,
}

/// Named detector backends.
///
/// Backends are registered as factories because each session's detection worker owns its
/// backend outright. Factories receive the configured subject label.
pub struct DetectorRegistry {
    entries: HashMap<String, Entry>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the backends that ship with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_with_tracker(
            "blob",
            |label| Box::new(BlobBackend::new(label)),
            |label| Box::new(BlobBackend::new(label)),
        );
        registry
    }

    /// Register a stateless backend. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, backend: F)
    where
        F: Fn(&str) -> Box<dyn DetectorBackend> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Entry {
                backend: Box::new(backend),
                tracker: None,
            },
        );
    }

    /// Register a backend together with a stateful tracker for hybrid mode.
    pub fn register_with_tracker<F, T>(&mut self, name: &str, backend: F, tracker: T)
    where
        F: Fn(&str) -> Box<dyn DetectorBackend> + Send + Sync + 'static,
        T: Fn(&str) -> Box<dyn SubjectTracker> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Entry {
                backend: Box::new(backend),
                tracker: Some(Box::new(tracker)),
            },
        );
    }

    fn insert(&mut self, name: &str, entry: Entry) {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.entries.insert(name.to_string(), entry);
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.entries.contains_key(name) {
            return Err(anyhow!("detector backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build an adapter for the configured backend (or the default).
    ///
    /// Hybrid mode silently degrades to detection-only when the backend has no tracker.
    pub fn build(&self, settings: &DetectorSettings) -> Result<DetectorAdapter> {
        let name = settings
            .backend
            .as_deref()
            .or(self.default_name.as_deref())
            .ok_or_else(|| anyhow!("no detector backends registered"))?;
        let entry = self.entries.get(name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;

        let label = settings.subject_label.as_deref().unwrap_or("object");
        let mut adapter = DetectorAdapter::new((entry.backend)(label))
            .with_subject_label(settings.subject_label.clone());

        match (settings.mode, &entry.tracker) {
            (TrackingMode::Hybrid, Some(tracker)) => {
                adapter = adapter.with_tracker((tracker)(label));
            }
            (TrackingMode::Hybrid, None) => {
                log::warn!(
                    "detector backend '{}' has no tracker; using detection-only mode",
                    name
                );
            }
            (TrackingMode::DetectionOnly, _) => {}
        }
        Ok(adapter)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;

    fn settings(backend: Option<&str>, mode: TrackingMode) -> DetectorSettings {
        DetectorSettings {
            backend: backend.map(str::to_string),
            mode,
            subject_label: Some("person".to_string()),
        }
    }

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = DetectorRegistry::new();
        registry.register("stub", |_| Box::new(StubBackend::new()));
        registry.register("other", |_| Box::new(StubBackend::new()));

        let adapter = registry
            .build(&settings(None, TrackingMode::DetectionOnly))
            .unwrap();
        assert_eq!(adapter.model_name(), "stub");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let registry = DetectorRegistry::with_builtin();
        let err = registry
            .build(&settings(Some("yolo"), TrackingMode::DetectionOnly))
            .err()
            .expect("unknown backend");
        assert!(err.to_string().contains("blob"));

        let mut registry = DetectorRegistry::with_builtin();
        assert!(registry.set_default("yolo").is_err());
    }

    #[test]
    fn empty_registry_cannot_build() {
        let registry = DetectorRegistry::new();
        assert!(registry
            .build(&settings(None, TrackingMode::DetectionOnly))
            .is_err());
    }

    #[test]
    fn builtin_blob_supports_hybrid() {
        let registry = DetectorRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["blob".to_string()]);
        let adapter = registry
            .build(&settings(Some("blob"), TrackingMode::Hybrid))
            .unwrap();
        assert_eq!(adapter.model_name(), "blob");
    }
}
