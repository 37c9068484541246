//! Configuration repository.
//!
//! Brokers and clients look settings up by section and key. The
//! [`ConfigRepository`] trait is the seam; [`JsonRepository`] backs it with
//! a JSON document of the form:
//!
//! ```json
//! {
//!   "broker": { "USER_LOGIN": "*NO", "SERVICE_MODE": "*ENUM", "SERVICES": ["ECHO", "TIME"] },
//!   "client": { "SERVICE": "ECHO", "HOST": "localhost", "PORT": 8080 }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One repository value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Number(i64),
    Flag(bool),
    List(Vec<String>),
}

impl ParamValue {
    /// Scalar rendered as text. Lists have no text form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ParamValue::Text(s) => Some(s.clone()),
            ParamValue::Number(n) => Some(n.to_string()),
            ParamValue::Flag(b) => Some(if *b { "*YES" } else { "*NO" }.to_string()),
            ParamValue::List(_) => None,
        }
    }

    /// Value as a list. A scalar text is split on commas.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            ParamValue::List(items) => items.clone(),
            ParamValue::Text(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            other => other.as_text().into_iter().collect(),
        }
    }
}

/// Keyed lookup of configuration parameters.
pub trait ConfigRepository: Send + Sync {
    /// Look up `key` in `section`.
    fn lookup_param(&self, section: &str, key: &str) -> Option<ParamValue>;

    /// Required scalar.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the key is missing or holds a list.
    fn lookup_str(&self, section: &str, key: &str) -> Result<String> {
        self.lookup_param(section, key)
            .and_then(|v| v.as_text())
            .ok_or_else(|| Error::Config(format!("{section}/{key} not found")))
    }

    /// Optional scalar.
    fn lookup_optional(&self, section: &str, key: &str) -> Option<String> {
        self.lookup_param(section, key).and_then(|v| v.as_text())
    }

    /// Optional list; empty when missing.
    fn lookup_list(&self, section: &str, key: &str) -> Vec<String> {
        self.lookup_param(section, key)
            .map(|v| v.as_list())
            .unwrap_or_default()
    }
}

/// Repository held in memory, loaded from JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonRepository {
    sections: HashMap<String, HashMap<String, ParamValue>>,
}

impl JsonRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the text is not an object of objects.
    pub fn parse(text: &str) -> Result<Self> {
        let sections = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("repository: {e}")))?;
        Ok(Self { sections })
    }

    /// Load a JSON file.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Set one parameter.
    #[must_use]
    pub fn with_param(mut self, section: &str, key: &str, value: ParamValue) -> Self {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self
    }
}

impl ConfigRepository for JsonRepository {
    fn lookup_param(&self, section: &str, key: &str) -> Option<ParamValue> {
        self.sections.get(section)?.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "broker": { "USER_LOGIN": "*NO", "SERVICES": ["A", "B"], "PORT": 8080 },
        "other": { "SERVICES": "X, Y ,," }
    }"#;

    #[test]
    fn test_parse_and_lookup() {
        let repo = JsonRepository::parse(DOC).unwrap();
        assert_eq!(repo.lookup_str("broker", "USER_LOGIN").unwrap(), "*NO");
        assert_eq!(repo.lookup_str("broker", "PORT").unwrap(), "8080");
        assert_eq!(repo.lookup_list("broker", "SERVICES"), vec!["A", "B"]);
        assert_eq!(repo.lookup_list("other", "SERVICES"), vec!["X", "Y"]);
        assert!(repo.lookup_list("other", "MISSING").is_empty());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let repo = JsonRepository::parse(DOC).unwrap();
        assert!(matches!(
            repo.lookup_str("broker", "HOST"),
            Err(Error::Config(msg)) if msg == "broker/HOST not found"
        ));
        assert!(repo.lookup_str("nowhere", "HOST").is_err());
        assert!(repo.lookup_str("broker", "SERVICES").is_err());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(JsonRepository::parse("[1]"), Err(Error::Config(_))));
    }

    #[test]
    fn test_builder() {
        let repo = JsonRepository::new()
            .with_param("c", "FLAG", ParamValue::Flag(false))
            .with_param("c", "N", ParamValue::Number(3));
        assert_eq!(repo.lookup_optional("c", "FLAG").as_deref(), Some("*NO"));
        assert_eq!(repo.lookup_optional("c", "N").as_deref(), Some("3"));
        assert_eq!(repo.lookup_optional("c", "X"), None);
    }

    #[test]
    fn test_from_path_missing_file() {
        assert!(matches!(
            JsonRepository::from_path("/nonexistent/csap.json"),
            Err(Error::Config(_))
        ));
    }
}
