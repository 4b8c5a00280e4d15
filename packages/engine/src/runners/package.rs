// packages/engine/src/runners/package.rs
//! Test packages and their well-known settings

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DOMAIN_USAGE: &str = "DomainUsage";
pub const PROCESS_MODEL: &str = "ProcessModel";

/// Assemblies to run plus their settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPackage {
    pub assemblies: Vec<String>,

    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl TestPackage {
    pub fn new<I, S>(assemblies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            assemblies: assemblies.into_iter().map(Into::into).collect(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(Value::as_bool)
    }

    pub fn domain_usage(&self) -> DomainUsage {
        self.setting_str(DOMAIN_USAGE).map(DomainUsage::parse).unwrap_or_default()
    }

    pub fn process_model(&self) -> ProcessModel {
        self.setting_str(PROCESS_MODEL).map(ProcessModel::parse).unwrap_or_default()
    }

    /// Same settings, a single assembly
    pub fn for_assembly(&self, assembly: &str) -> Self {
        Self {
            assemblies: vec![assembly.to_string()],
            settings: self.settings.clone(),
        }
    }
}

/// How assemblies share execution contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainUsage {
    /// Absent or unrecognised
    #[default]
    Default,
    /// No separate execution context
    None,
    Single,
    Multiple,
}

impl DomainUsage {
    /// Total: unknown values mean `Default`
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "none" => DomainUsage::None,
            "single" => DomainUsage::Single,
            "multiple" => DomainUsage::Multiple,
            _ => DomainUsage::Default,
        }
    }
}

/// How assemblies are spread over agent processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessModel {
    #[default]
    Default,
    InProcess,
    Separate,
    Multiple,
}

impl ProcessModel {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "inprocess" | "single" => ProcessModel::InProcess,
            "separate" => ProcessModel::Separate,
            "multiple" => ProcessModel::Multiple,
            _ => ProcessModel::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_usage_parsing() {
        assert_eq!(DomainUsage::parse("Single"), DomainUsage::Single);
        assert_eq!(DomainUsage::parse("multiple"), DomainUsage::Multiple);
        assert_eq!(DomainUsage::parse("None"), DomainUsage::None);
        assert_eq!(DomainUsage::parse("Default"), DomainUsage::Default);
        assert_eq!(DomainUsage::parse("sideways"), DomainUsage::Default);
    }

    #[test]
    fn test_settings_accessors() {
        let package = TestPackage::new(["a.test"])
            .with_setting(DOMAIN_USAGE, "Single")
            .with_setting("ShadowCopy", true);
        assert_eq!(package.domain_usage(), DomainUsage::Single);
        assert_eq!(package.setting_bool("ShadowCopy"), Some(true));
        assert_eq!(package.process_model(), ProcessModel::Default);
    }

    #[test]
    fn test_non_string_setting_is_default() {
        let package = TestPackage::new(["a.test"]).with_setting(DOMAIN_USAGE, 3);
        assert_eq!(package.domain_usage(), DomainUsage::Default);
    }
}
