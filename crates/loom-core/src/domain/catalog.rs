//! Records returned by the collaborators (plugin registry, object store, artifact store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant whose work is scheduled in isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Organisation {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Organisation {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    Boefje,
    Normalizer,
}

/// A plugin known to the registry.
///
/// `consumes` holds object types for a boefje and mime types for a normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub scan_level: u8,
    #[serde(default)]
    pub consumes: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Plugin {
    /// A boefje may run against a target when it consumes the target's type
    /// and its scan level does not exceed the target's clearance.
    pub fn can_scan(&self, target: &Target) -> bool {
        self.plugin_type == PluginType::Boefje
            && self.enabled
            && self.scan_level <= target.scan_level
            && self.consumes.iter().any(|t| t == &target.object_type)
    }

    pub fn can_normalize(&self, raw: &RawArtifact) -> bool {
        self.plugin_type == PluginType::Normalizer
            && self.enabled
            && self.consumes.iter().any(|m| raw.mime_types.contains(m))
    }
}

/// An object in the graph store that is a candidate for scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub primary_key: String,
    pub object_type: String,
    pub scan_level: u8,
}

/// Raw output of a finished scan, waiting to be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArtifact {
    pub id: String,
    pub boefje_id: String,
    #[serde(default)]
    pub input_ooi: Option<String>,
    #[serde(default)]
    pub mime_types: Vec<String>,
    pub produced_at: DateTime<Utc>,
}

impl RawArtifact {
    /// Scans that failed store their traceback under an `error/...` mime type.
    pub fn is_error(&self) -> bool {
        self.mime_types.iter().any(|m| m.starts_with("error/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boefje(scan_level: u8, consumes: &[&str]) -> Plugin {
        Plugin {
            id: "dns-records".into(),
            version: None,
            plugin_type: PluginType::Boefje,
            enabled: true,
            scan_level,
            consumes: consumes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn scan_level_gates_boefjes() {
        let target = Target {
            primary_key: "Hostname|internet|example.com".into(),
            object_type: "Hostname".into(),
            scan_level: 2,
        };

        assert!(boefje(1, &["Hostname"]).can_scan(&target));
        assert!(boefje(2, &["Hostname"]).can_scan(&target));
        assert!(!boefje(3, &["Hostname"]).can_scan(&target));
        assert!(!boefje(1, &["IPAddressV4"]).can_scan(&target));
    }

    #[test]
    fn error_mime_types_are_detected() {
        let raw = RawArtifact {
            id: "raw-1".into(),
            boefje_id: "dns-records".into(),
            input_ooi: None,
            mime_types: vec!["boefje/dns-records".into(), "error/boefje".into()],
            produced_at: Utc::now(),
        };
        assert!(raw.is_error());
    }
}
