// src/core/registry.rs

use crate::core::probes::{default_probes, Probe};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A registered probe together with its scheduling metadata.
#[derive(Clone)]
pub struct ProbeDescriptor {
    id: String,
    timeout: Option<Duration>,
    probe: Arc<dyn Probe>,
}

impl ProbeDescriptor {
    /// Describes `probe` under its own id, using the scan-wide default timeout.
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { id: probe.id().to_string(), timeout: None, probe }
    }

    /// Overrides the scan-wide probe timeout for this probe only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Per-probe override, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The override, or `default` when none is set.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }

    pub fn probe(&self) -> &Arc<dyn Probe> {
        &self.probe
    }
}

impl fmt::Debug for ProbeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeDescriptor").field("id", &self.id).field("timeout", &self.timeout).finish()
    }
}

/// The set of probes a scan runs, keyed by id and kept in registration order.
///
/// Registering an id that already exists replaces the earlier descriptor in
/// place. The registry is only read while a scan is running.
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    descriptors: Vec<ProbeDescriptor>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in probe.
    pub fn with_default_probes() -> Self {
        let mut registry = Self::new();
        for probe in default_probes() {
            registry.register(ProbeDescriptor::new(probe));
        }
        registry
    }

    pub fn register(&mut self, descriptor: ProbeDescriptor) {
        match self.descriptors.iter_mut().find(|d| d.id == descriptor.id) {
            Some(existing) => {
                warn!(probe_id = %descriptor.id, "Probe registered twice, replacing the earlier entry.");
                *existing = descriptor;
            }
            None => {
                debug!(probe_id = %descriptor.id, "Probe registered.");
                self.descriptors.push(descriptor);
            }
        }
    }

    /// Snapshot of every descriptor in registration order.
    pub fn all(&self) -> Vec<ProbeDescriptor> {
        self.descriptors.clone()
    }

    pub fn get(&self, id: &str) -> Option<&ProbeDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProbeError;
    use crate::core::models::{Finding, Target};
    use crate::core::probes::ProbeContext;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Named(&'static str);

    #[async_trait]
    impl Probe for Named {
        fn id(&self) -> &str {
            self.0
        }

        async fn run(&self, _target: &Target, _ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn default_registry_holds_all_builtins() {
        let registry = ProbeRegistry::with_default_probes();
        assert_eq!(
            registry.ids(),
            vec!["headers", "tls", "dns", "fingerprint", "directory_listing", "sensitive_files"]
        );
    }

    #[test]
    fn last_registration_wins_and_keeps_position() {
        let mut registry = ProbeRegistry::new();
        registry.register(ProbeDescriptor::new(Arc::new(Named("a"))));
        registry.register(ProbeDescriptor::new(Arc::new(Named("b"))));
        registry.register(ProbeDescriptor::new(Arc::new(Named("a"))).with_timeout(Duration::from_secs(3)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn effective_timeout_falls_back_to_default() {
        let descriptor = ProbeDescriptor::new(Arc::new(Named("x")));
        assert_eq!(descriptor.effective_timeout(Duration::from_secs(10)), Duration::from_secs(10));
        let descriptor = descriptor.with_timeout(Duration::from_secs(2));
        assert_eq!(descriptor.effective_timeout(Duration::from_secs(10)), Duration::from_secs(2));
    }
}
