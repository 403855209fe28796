//! Task payloads: a tagged union over the known task kinds.
//!
//! Payloads are validated where they enter the system (population, operator
//! push, dispatch). Everything downstream can rely on the shape.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::catalog::RawArtifact;
use super::errors::ValidationError;
use super::kind::TaskKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTask {
    pub organisation: String,
    pub plugin_id: String,
    #[serde(default)]
    pub plugin_version: Option<String>,
    #[serde(default)]
    pub input_ooi: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationTask {
    pub organisation: String,
    pub plugin_id: String,
    pub raw_data: RawArtifact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTask {
    pub organisation: String,
    pub report_recipe_id: String,
}

/// The unit of work handed to the execution sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    Scan(ScanTask),
    Normalization(NormalizationTask),
    Report(ReportTask),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Scan(_) => TaskKind::Scan,
            TaskPayload::Normalization(_) => TaskKind::Normalization,
            TaskPayload::Report(_) => TaskKind::Report,
        }
    }

    pub fn organisation(&self) -> &str {
        match self {
            TaskPayload::Scan(t) => &t.organisation,
            TaskPayload::Normalization(t) => &t.organisation,
            TaskPayload::Report(t) => &t.organisation,
        }
    }

    pub fn scheduler_id(&self) -> String {
        self.kind().scheduler_id(self.organisation())
    }

    /// Content fingerprint of the logical unit of work.
    ///
    /// Two payloads that describe the same work (same plugin, same input,
    /// same tenant) share a hash regardless of other fields.
    pub fn hash(&self) -> String {
        let key = match self {
            TaskPayload::Scan(t) => format!(
                "scan|{}|{}|{}",
                t.organisation,
                t.plugin_id,
                t.input_ooi.as_deref().unwrap_or_default()
            ),
            TaskPayload::Normalization(t) => format!(
                "normalization|{}|{}|{}",
                t.organisation, t.plugin_id, t.raw_data.id
            ),
            TaskPayload::Report(t) => {
                format!("report|{}|{}", t.organisation, t.report_recipe_id)
            }
        };
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Check required fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        fn required(field: &str, value: &str) -> Result<(), ValidationError> {
            if value.trim().is_empty() {
                Err(ValidationError::new(format!("`{field}` must not be empty")))
            } else {
                Ok(())
            }
        }

        required("organisation", self.organisation())?;
        match self {
            TaskPayload::Scan(t) => required("plugin_id", &t.plugin_id),
            TaskPayload::Normalization(t) => {
                required("plugin_id", &t.plugin_id)?;
                required("raw_data.id", &t.raw_data.id)
            }
            TaskPayload::Report(t) => required("report_recipe_id", &t.report_recipe_id),
        }
    }

    /// Validate and check the payload belongs to `kind`.
    pub fn validate_for(&self, kind: TaskKind) -> Result<(), ValidationError> {
        if self.kind() != kind {
            return Err(ValidationError::new(format!(
                "expected a {kind} payload, got {}",
                self.kind()
            )));
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scan(plugin: &str, ooi: &str) -> TaskPayload {
        TaskPayload::Scan(ScanTask {
            organisation: "acme".into(),
            plugin_id: plugin.into(),
            plugin_version: None,
            input_ooi: Some(ooi.into()),
        })
    }

    #[test]
    fn payloads_are_tagged_by_kind() {
        let json = serde_json::to_value(scan("dns-records", "Hostname|internet|a.example")).unwrap();
        assert_eq!(json["type"], "scan");
        assert_eq!(json["plugin_id"], "dns-records");

        let report: TaskPayload = serde_json::from_value(serde_json::json!({
            "type": "report",
            "organisation": "acme",
            "report_recipe_id": "weekly",
        }))
        .unwrap();
        assert_eq!(report.kind(), TaskKind::Report);
        assert_eq!(report.scheduler_id(), "report-acme");
    }

    #[test]
    fn unknown_tags_do_not_deserialize() {
        let result: Result<TaskPayload, _> = serde_json::from_value(serde_json::json!({
            "type": "boefje",
            "organisation": "acme",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn hash_identifies_the_unit_of_work() {
        let a = scan("dns-records", "Hostname|internet|a.example");
        let mut same = a.clone();
        if let TaskPayload::Scan(t) = &mut same {
            t.plugin_version = Some("1.2.0".into());
        }
        let other = scan("dns-records", "Hostname|internet|b.example");

        assert_eq!(a.hash(), same.hash());
        assert_ne!(a.hash(), other.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn validation_rejects_missing_fields_and_wrong_kind() {
        assert!(scan("", "x").validate().is_err());

        let normalization = TaskPayload::Normalization(NormalizationTask {
            organisation: "acme".into(),
            plugin_id: "kat_dns_normalize".into(),
            raw_data: RawArtifact {
                id: "raw-1".into(),
                boefje_id: "dns-records".into(),
                input_ooi: None,
                mime_types: vec!["boefje/dns-records".into()],
                produced_at: Utc::now(),
            },
        });
        assert!(normalization.validate_for(TaskKind::Normalization).is_ok());
        assert!(normalization.validate_for(TaskKind::Scan).is_err());
    }
}
