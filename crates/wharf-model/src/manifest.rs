//! The package manifest document.
//!
//! A manifest is the JSON document describing one package and every version
//! of it the registry knows about. It is parsed from untrusted client input
//! and from upstream registries, so decoding always goes through
//! [`Manifest::from_json_slice`] / [`Manifest::from_json_value`], which strip
//! `__proto__` keys at every nesting level before the typed model is built.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::revision::INITIAL_REVISION;
use crate::version::Version;

/// Tarball attachment bookkeeping: `_attachments[filename]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Cached upstream location of a tarball: `_distfiles[filename]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistFile {
    pub url: String,

    #[serde(default)]
    pub sha: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

/// Per-uplink cache validation state: `_uplinks[name]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UplinkRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Epoch milliseconds of the last successful fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,

    #[serde(default)]
    pub versions: BTreeMap<String, Version>,

    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,

    #[serde(default)]
    pub time: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,

    #[serde(default)]
    pub users: BTreeMap<String, bool>,

    #[serde(rename = "_attachments", default)]
    pub attachments: BTreeMap<String, Attachment>,

    #[serde(rename = "_distfiles", default)]
    pub distfiles: BTreeMap<String, DistFile>,

    #[serde(rename = "_uplinks", default)]
    pub uplinks: BTreeMap<String, UplinkRecord>,

    #[serde(rename = "_rev", default)]
    pub rev: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// An empty manifest template for a package that does not exist yet. All
    /// required containers are present so callers never branch on absence.
    pub fn template(name: &str) -> Self {
        Manifest {
            name: name.to_string(),
            rev: INITIAL_REVISION.to_string(),
            ..Manifest::default()
        }
    }

    /// Decodes a manifest from raw JSON bytes, stripping `__proto__` first.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json_value(value)
    }

    /// Decodes a manifest from a JSON value, stripping `__proto__` first.
    pub fn from_json_value(mut value: Value) -> Result<Self> {
        strip_proto(&mut value);
        Ok(serde_json::from_value(value)?)
    }

    /// True when the manifest has no versions and no cached upstream state,
    /// i.e. nothing worth serving.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.distfiles.is_empty()
    }

    /// Resolves a literal version string or a dist-tag to a version record.
    pub fn resolve_version(&self, target: &str) -> Option<&Version> {
        if let Some(version) = self.versions.get(target) {
            return Some(version);
        }
        self.dist_tags
            .get(target)
            .and_then(|pointed| self.versions.get(pointed))
    }

    /// Verifies the structural invariants that must hold after any write.
    /// Returns the first violation found, for use in tests and consistency
    /// checks.
    pub fn check_integrity(&self) -> std::result::Result<(), String> {
        for (tag, target) in &self.dist_tags {
            if !self.versions.contains_key(target) {
                return Err(format!("dist-tag {tag} points at missing version {target}"));
            }
        }
        for (filename, attachment) in &self.attachments {
            if let Some(version) = &attachment.version {
                if !self.versions.contains_key(version) {
                    return Err(format!(
                        "attachment {filename} names missing version {version}"
                    ));
                }
            }
        }
        if let Some(modified) = self.time.get("modified") {
            for (key, stamp) in &self.time {
                if key != "modified" && stamp > modified {
                    return Err(format!("time.{key} is newer than time.modified"));
                }
            }
        }
        Ok(())
    }
}

/// Removes every `__proto__` key, at any depth, from a JSON value. Manifests
/// come from untrusted input; the key is dropped even on platforms without
/// prototype semantics so it cannot be tunneled to clients that have them.
pub fn strip_proto(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("__proto__");
            for (_, child) in map.iter_mut() {
                strip_proto(child);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_proto(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_has_initial_revision() {
        let manifest = Manifest::template("foo");
        assert_eq!(manifest.rev, "0-0000000000000000");
        assert!(manifest.versions.is_empty());
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_unknown_fields() {
        let input = json!({
            "name": "foo",
            "dist-tags": {"latest": "1.0.0"},
            "versions": {"1.0.0": {"name": "foo", "version": "1.0.0"}},
            "_rev": "3-abcdef0123456789",
            "homepage": "https://example.com"
        });
        let manifest = Manifest::from_json_value(input).unwrap();
        assert_eq!(manifest.dist_tags.get("latest").unwrap(), "1.0.0");

        let output = serde_json::to_value(&manifest).unwrap();
        assert_eq!(output["homepage"], "https://example.com");
        assert_eq!(output["_rev"], "3-abcdef0123456789");
    }

    #[test]
    fn test_proto_stripped_at_every_level() {
        let input = json!({
            "name": "foo",
            "__proto__": {"polluted": true},
            "versions": {
                "1.0.0": {
                    "name": "foo",
                    "version": "1.0.0",
                    "__proto__": {"polluted": true},
                    "dist": {"tarball": "http://x", "__proto__": "x"}
                }
            },
            "_attachments": {"f.tgz": {"__proto__": "x"}}
        });
        let manifest = Manifest::from_json_value(input).unwrap();
        let output = serde_json::to_value(&manifest).unwrap();
        let text = output.to_string();
        assert!(!text.contains("__proto__"));
    }

    #[test]
    fn test_resolve_version_literal_then_tag() {
        let manifest = Manifest::from_json_value(json!({
            "name": "foo",
            "dist-tags": {"beta": "1.1.0"},
            "versions": {
                "1.0.0": {"name": "foo", "version": "1.0.0"},
                "1.1.0": {"name": "foo", "version": "1.1.0"}
            }
        }))
        .unwrap();

        assert_eq!(manifest.resolve_version("1.0.0").unwrap().version, "1.0.0");
        assert_eq!(manifest.resolve_version("beta").unwrap().version, "1.1.0");
        assert!(manifest.resolve_version("nope").is_none());
    }

    #[test]
    fn test_check_integrity_reports_dangling_tag() {
        let mut manifest = Manifest::template("foo");
        manifest
            .dist_tags
            .insert("latest".to_string(), "9.9.9".to_string());
        assert!(manifest.check_integrity().is_err());
    }
}
