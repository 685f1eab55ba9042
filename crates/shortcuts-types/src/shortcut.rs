use serde::{Deserialize, Serialize};

use crate::ids::{ChildId, ShortcutId};

/// HTTP method of the request a shortcut describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

/// What the execution engine should do when the network is unavailable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Never,
    WaitForInternet,
}

/// Request header child record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub id: ChildId,
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: ChildId::new(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Request parameter child record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ChildId,
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: ChildId::new(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A named, parameterized HTTP request.
///
/// Headers and parameters are owned by the shortcut: they are deleted with it
/// and receive fresh identifiers whenever the shortcut is copied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortcut {
    pub id: ShortcutId,
    pub name: String,
    pub description: String,
    pub method: HttpMethod,
    pub url: String,
    pub body_content: String,
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
    pub headers: Vec<Header>,
    pub parameters: Vec<Parameter>,
}

impl Shortcut {
    pub const DEFAULT_URL: &'static str = "http://";
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    /// A blank shortcut as presented by an editor for creation.
    pub fn create_new(id: ShortcutId) -> Self {
        Self {
            id,
            name: String::new(),
            description: String::new(),
            method: HttpMethod::default(),
            url: Self::DEFAULT_URL.to_string(),
            body_content: String::new(),
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            retry_policy: RetryPolicy::default(),
            headers: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Copy this shortcut under `id`, giving every child record a fresh id.
    pub fn detach(&self, id: ShortcutId) -> Self {
        let mut copy = self.clone();
        copy.id = id;
        for header in &mut copy.headers {
            header.id = ChildId::new();
        }
        for parameter in &mut copy.parameters {
            parameter.id = ChildId::new();
        }
        copy
    }

    /// Field-level comparison that ignores the shortcut's and its children's ids.
    pub fn is_same_as(&self, other: &Shortcut) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.method == other.method
            && self.url == other.url
            && self.body_content == other.body_content
            && self.timeout_ms == other.timeout_ms
            && self.retry_policy == other.retry_policy
            && self.headers.len() == other.headers.len()
            && self.parameters.len() == other.parameters.len()
            && self
                .headers
                .iter()
                .zip(&other.headers)
                .all(|(a, b)| a.key == b.key && a.value == b.value)
            && self
                .parameters
                .iter()
                .zip(&other.parameters)
                .all(|(a, b)| a.key == b.key && a.value == b.value)
    }

    /// Case-insensitive name match used by "by name" lookups.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Shortcut {
        let mut s = Shortcut::create_new(ShortcutId(4));
        s.name = "Open garage".into();
        s.url = "https://example.org/garage".into();
        s.method = HttpMethod::Post;
        s.headers.push(Header::new("Authorization", "Bearer x"));
        s.parameters.push(Parameter::new("door", "1"));
        s
    }

    #[test]
    fn detach_assigns_fresh_child_ids() {
        let original = sample();
        let copy = original.detach(ShortcutId::TEMPORARY);

        assert_eq!(copy.id, ShortcutId::TEMPORARY);
        assert_ne!(copy.headers[0].id, original.headers[0].id);
        assert_ne!(copy.parameters[0].id, original.parameters[0].id);
        assert!(copy.is_same_as(&original));
        assert_ne!(copy, original);
    }

    #[test]
    fn same_as_detects_field_changes() {
        let original = sample();
        let mut edited = original.detach(ShortcutId(9));
        assert!(edited.is_same_as(&original));

        edited.headers[0].value = "Bearer y".into();
        assert!(!edited.is_same_as(&original));

        let mut renamed = original.clone();
        renamed.name.push('!');
        assert!(!renamed.is_same_as(&original));
    }

    #[test]
    fn blank_shortcut_defaults() {
        let s = Shortcut::create_new(ShortcutId::TEMPORARY);
        assert!(s.name.is_empty());
        assert_eq!(s.url, Shortcut::DEFAULT_URL);
        assert_eq!(s.method, HttpMethod::Get);
        assert!(s.is_same_as(&Shortcut::create_new(ShortcutId(3))));
    }

    #[test]
    fn name_match_is_case_insensitive() {
        let s = sample();
        assert!(s.name_matches("OPEN GARAGE"));
        assert!(!s.name_matches("open"));
    }
}
