//! The external services the runtime talks to, bundled for wiring and health checks.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ports::{ArtifactStore, ExecutionSink, ObjectStore, PluginCatalog};

#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn PluginCatalog>,
    pub objects: Arc<dyn ObjectStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub sink: Arc<dyn ExecutionSink>,
}

impl Collaborators {
    /// Probe every collaborator concurrently.
    pub async fn health(&self) -> BTreeMap<&'static str, bool> {
        let (catalog, objects, artifacts, sink) = tokio::join!(
            self.catalog.health(),
            self.objects.health(),
            self.artifacts.health(),
            self.sink.health(),
        );
        BTreeMap::from([
            ("katalogus", catalog),
            ("octopoes", objects),
            ("bytes", artifacts),
            ("sink", sink),
        ])
    }
}
