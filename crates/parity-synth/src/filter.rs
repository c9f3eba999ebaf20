//! Route and scenario filters
//!
//! `--route` matches a full `METHOD /path` key exactly or any path containing
//! the given substring. `--scenario` matches an exact name, or every name
//! under a prefix when written as `prefix.*`.

use parity_model::{RouteDescriptor, ScenarioDescriptor};

/// Route selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFilter {
    pattern: String,
}

impl RouteFilter {
    /// Filter from a user pattern
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into().trim().to_string(),
        }
    }

    /// True when `route` is selected
    #[must_use]
    pub fn matches(&self, route: &RouteDescriptor) -> bool {
        if self.pattern.contains(' ') {
            return route.key().eq_ignore_ascii_case(&self.pattern);
        }
        route.path_template.contains(&self.pattern)
    }
}

/// Scenario selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioFilter {
    /// Exact name
    Exact(String),
    /// Every name starting with `prefix.`
    Prefix(String),
}

impl ScenarioFilter {
    /// Parse `name` or `prefix.*`
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.trim();
        match pattern.strip_suffix(".*") {
            Some(prefix) => Self::Prefix(format!("{prefix}.")),
            None => Self::Exact(pattern.to_string()),
        }
    }

    /// True when `scenario` is selected
    #[must_use]
    pub fn matches(&self, scenario: &ScenarioDescriptor) -> bool {
        match self {
            Self::Exact(name) => scenario.name == *name,
            Self::Prefix(prefix) => scenario.name.starts_with(prefix.as_str()),
        }
    }
}
