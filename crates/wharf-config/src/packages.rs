//! Per-package access rules.
//!
//! Rules are matched against package names first-match-wins, in declaration
//! order. The matched rule decides who may read or publish (evaluated by the
//! auth layer, opaque here) and which uplinks may be consulted for the
//! package. A rule with an empty `proxy` list makes its packages private: no
//! uplink is ever asked about them.

use fast_glob::glob_match;
use serde::{Deserialize, Serialize};

/// One entry of the ordered `[[packages]]` rule list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageRule {
    /// Glob over package names, e.g. `@internal/*` or `**`.
    pub pattern: String,

    /// Access groups, passed through to the auth layer.
    #[serde(default)]
    pub access: Vec<String>,

    /// Publish groups, passed through to the auth layer.
    #[serde(default)]
    pub publish: Vec<String>,

    /// Uplink names this rule allows read-through from.
    #[serde(default)]
    pub proxy: Vec<String>,
}

impl PackageRule {
    /// The fallback rule appended when no configured rule matches everything:
    /// open access, proxy through every configured uplink.
    pub fn catch_all(uplinks: Vec<String>) -> Self {
        PackageRule {
            pattern: "**".to_string(),
            access: vec!["$all".to_string()],
            publish: vec!["$authenticated".to_string()],
            proxy: uplinks,
        }
    }

    pub fn matches(&self, package: &str) -> bool {
        glob_match(&self.pattern, package)
    }

    /// Whether the rule disables uplink consultation for its packages.
    pub fn is_private(&self) -> bool {
        self.proxy.is_empty()
    }
}

/// Finds the first rule matching `package`.
pub fn match_package<'a>(rules: &'a [PackageRule], package: &str) -> Option<&'a PackageRule> {
    rules.iter().find(|rule| rule.matches(package))
}
