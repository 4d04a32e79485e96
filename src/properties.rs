use crate::error::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// `key = value`, optionally followed by a `#` comment. Blank and comment-only lines match with
/// no key.
static PROPERTY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(([\w+.]+)\s*=\s*(.*?))?\s*(#.*)?$").expect("property regex is valid")
});

/// Iterate over the `(key, value)` pairs of a java-style properties file
pub fn parse_properties(content: &str) -> impl Iterator<Item = (&str, &str)> {
    content.lines().filter_map(|line| {
        let caps = PROPERTY_LINE.captures(line)?;
        let key = caps.get(2)?.as_str();
        let value = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        Some((key, value))
    })
}

/// The subset of `sonar-project.properties` the runner cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectProperties {
    pub host_url: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
}

impl ProjectProperties {
    pub fn from_content(content: &str) -> Self {
        let mut props = Self::default();
        for (key, value) in parse_properties(content) {
            let value = Some(value.to_string()).filter(|v| !v.is_empty());
            match key {
                "sonar.host.url" => props.host_url = value,
                "sonar.login" => props.login = value,
                "sonar.password" => props.password = value,
                _ => {}
            }
        }
        props
    }

    /// Read the project file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_content(&content))
    }
}
