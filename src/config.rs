use serde::Deserialize;

use crate::error::StepUpError;

/// Configuration block of the SFO filter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SfoConfig {
    /// Attribute holding the `urn:collab:person:` subject identifier.
    #[serde(rename = "subjectattribute")]
    pub subject_attribute: String,
    #[serde(rename = "idpEntityid")]
    pub idp_entity_id: String,
    /// Authentication context class requested from the SFO IdP.
    pub loa: String,
    /// SP entity ids and requester ids for which step-up is bypassed.
    #[serde(rename = "skipentities", default)]
    pub skip_entities: Vec<String>,
    /// Issuer of the outgoing requests; defaults to the module's metadata URL.
    #[serde(rename = "entityid", default)]
    pub entity_id: Option<String>,
}

impl SfoConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self, StepUpError> {
        let config: SfoConfig =
            serde_json::from_value(value).map_err(|e| StepUpError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StepUpError> {
        for (key, value) in [
            ("subjectattribute", &self.subject_attribute),
            ("idpEntityid", &self.idp_entity_id),
            ("loa", &self.loa),
        ] {
            if value.trim().is_empty() {
                return Err(StepUpError::Config(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }
}

/// Where the module is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleUrls {
    base_url: String,
}

impl ModuleUrls {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').into(),
        }
    }

    /// The fixed assertion consumer endpoint.
    pub fn acs_url(&self) -> String {
        format!("{}/stepupsfo/acs", self.base_url)
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/stepupsfo/metadata", self.base_url)
    }
}
