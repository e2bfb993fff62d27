//! Versioned prompt-template registry (component C7). Templates are
//! assets, not code: loaded once at startup and addressed by
//! `template_id@version`, with the active version's id recorded on every
//! answer and audit event.
//!
//! Generalized from a register/activate/resolve/rollback pattern this
//! lineage already uses for swappable model versions — the same shape
//! fits "which prompt template is live" just as well as "which model is
//! live".

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("version not found for template {template_id}: {version}")]
    VersionNotFound { template_id: String, version: String },
    #[error("template version already exists for {template_id}: {version}")]
    VersionAlreadyExists { template_id: String, version: String },
    #[error("rollback target is not available for template: {0}")]
    NoRollbackTarget(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub template_id: String,
    pub version: String,
    pub body: String,
}

impl PromptTemplate {
    /// The id recorded on `AnswerResponse` and audit events.
    pub fn versioned_id(&self) -> String {
        format!("{}@{}", self.template_id, self.version)
    }
}

#[derive(Default)]
struct TemplateFamily {
    versions: BTreeMap<String, String>,
    active_version: Option<String>,
    activation_history: Vec<String>,
}

#[derive(Default)]
pub struct PromptTemplateRegistry {
    families: BTreeMap<String, TemplateFamily>,
}

impl PromptTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        template_id: impl Into<String>,
        version: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let template_id = template_id.into();
        let version = version.into();
        let family = self.families.entry(template_id.clone()).or_default();

        if family.versions.contains_key(&version) {
            return Err(RegistryError::VersionAlreadyExists { template_id, version });
        }

        family.versions.insert(version.clone(), body.into());
        if family.active_version.is_none() {
            family.active_version = Some(version.clone());
            family.activation_history.push(version);
        }
        Ok(())
    }

    pub fn activate(&mut self, template_id: &str, version: &str) -> Result<PromptTemplate, RegistryError> {
        let family = self
            .families
            .get_mut(template_id)
            .ok_or_else(|| RegistryError::TemplateNotFound(template_id.to_string()))?;

        let body = family.versions.get(version).cloned().ok_or_else(|| {
            RegistryError::VersionNotFound {
                template_id: template_id.to_string(),
                version: version.to_string(),
            }
        })?;

        if family.active_version.as_deref() != Some(version) {
            family.active_version = Some(version.to_string());
            family.activation_history.push(version.to_string());
        }

        Ok(PromptTemplate {
            template_id: template_id.to_string(),
            version: version.to_string(),
            body,
        })
    }

    /// Resolves `"template_id"` (active version) or `"template_id@version"`
    /// (pinned) to a concrete template.
    pub fn resolve(&self, template_ref: &str) -> Result<PromptTemplate, RegistryError> {
        let (template_id, pinned) = parse_template_ref(template_ref);
        let family = self
            .families
            .get(template_id)
            .ok_or_else(|| RegistryError::TemplateNotFound(template_id.to_string()))?;

        let version = match pinned {
            Some(v) => v.to_string(),
            None => family
                .active_version
                .clone()
                .ok_or_else(|| RegistryError::TemplateNotFound(template_id.to_string()))?,
        };

        let body = family.versions.get(&version).cloned().ok_or_else(|| {
            RegistryError::VersionNotFound {
                template_id: template_id.to_string(),
                version: version.clone(),
            }
        })?;

        Ok(PromptTemplate {
            template_id: template_id.to_string(),
            version,
            body,
        })
    }

    pub fn rollback(&mut self, template_id: &str) -> Result<PromptTemplate, RegistryError> {
        let family = self
            .families
            .get_mut(template_id)
            .ok_or_else(|| RegistryError::TemplateNotFound(template_id.to_string()))?;

        if family.activation_history.len() < 2 {
            return Err(RegistryError::NoRollbackTarget(template_id.to_string()));
        }
        family.activation_history.pop();
        let previous = family.activation_history.last().cloned().ok_or_else(|| {
            RegistryError::NoRollbackTarget(template_id.to_string())
        })?;
        family.active_version = Some(previous.clone());

        let body = family.versions.get(&previous).cloned().ok_or_else(|| {
            RegistryError::VersionNotFound {
                template_id: template_id.to_string(),
                version: previous.clone(),
            }
        })?;

        Ok(PromptTemplate {
            template_id: template_id.to_string(),
            version: previous,
            body,
        })
    }
}

fn parse_template_ref(template_ref: &str) -> (&str, Option<&str>) {
    match template_ref.split_once('@') {
        Some((id, version)) if !id.is_empty() && !version.is_empty() => (id, Some(version)),
        _ => (template_ref, None),
    }
}

/// The default answer-generation template this tree ships, loaded once at
/// startup into a fresh registry and activated as `"answer"@"1.0.0"`.
pub const DEFAULT_ANSWER_TEMPLATE_V1: &str = include_str!("../assets/prompts/answer.v1.txt");

pub fn default_registry() -> PromptTemplateRegistry {
    let mut registry = PromptTemplateRegistry::new();
    registry
        .register("answer", "1.0.0", DEFAULT_ANSWER_TEMPLATE_V1)
        .expect("default template registration must succeed");
    registry
        .activate("answer", "1.0.0")
        .expect("default template activation must succeed");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_without_pin_returns_active_version() {
        let mut registry = PromptTemplateRegistry::new();
        registry.register("answer", "1.0.0", "v1 body").unwrap();
        registry.register("answer", "2.0.0", "v2 body").unwrap();
        registry.activate("answer", "2.0.0").unwrap();

        let resolved = registry.resolve("answer").unwrap();
        assert_eq!(resolved.version, "2.0.0");
        assert_eq!(resolved.versioned_id(), "answer@2.0.0");
    }

    #[test]
    fn resolve_with_pin_ignores_active_version() {
        let mut registry = PromptTemplateRegistry::new();
        registry.register("answer", "1.0.0", "v1 body").unwrap();
        registry.register("answer", "2.0.0", "v2 body").unwrap();
        registry.activate("answer", "2.0.0").unwrap();

        let resolved = registry.resolve("answer@1.0.0").unwrap();
        assert_eq!(resolved.version, "1.0.0");
    }

    #[test]
    fn rollback_restores_previous_active_version() {
        let mut registry = PromptTemplateRegistry::new();
        registry.register("answer", "1.0.0", "v1 body").unwrap();
        registry.register("answer", "2.0.0", "v2 body").unwrap();
        registry.activate("answer", "2.0.0").unwrap();

        let rolled_back = registry.rollback("answer").unwrap();
        assert_eq!(rolled_back.version, "1.0.0");
    }

    #[test]
    fn default_registry_resolves_answer_template() {
        let registry = default_registry();
        let resolved = registry.resolve("answer").unwrap();
        assert_eq!(resolved.versioned_id(), "answer@1.0.0");
        assert!(resolved.body.contains("{{context}}"));
    }
}
