//! Version records and the people-field normalization rules.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Distribution pointer of a published version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A person reference as npm serializes it: `{name, email?, url?}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Person {
    /// Parses the short form `"Ada Lovelace <ada@example.com>"`.
    fn from_short(text: &str) -> Self {
        let text = text.trim();
        match (text.find('<'), text.rfind('>')) {
            (Some(open), Some(close)) if open < close => Person {
                name: non_empty(text[..open].trim()),
                email: non_empty(text[open + 1..close].trim()),
                url: None,
            },
            _ => Person {
                name: non_empty(text),
                email: None,
                url: None,
            },
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// A people-valued field before normalization. npm clients send a single
/// string, a single object, or a list mixing both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeopleField {
    One(PersonEntry),
    Many(Vec<PersonEntry>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonEntry {
    Short(String),
    Full(Person),
}

impl PersonEntry {
    fn into_person(self) -> Person {
        match self {
            PersonEntry::Short(text) => Person::from_short(&text),
            PersonEntry::Full(person) => person,
        }
    }
}

impl PeopleField {
    /// Collapses any accepted input shape into a list of person objects.
    pub fn into_people(self) -> Vec<Person> {
        match self {
            PeopleField::One(entry) => vec![entry.into_person()],
            PeopleField::Many(entries) => {
                entries.into_iter().map(PersonEntry::into_person).collect()
            }
        }
    }
}

/// A frozen snapshot of one published release.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<PersonEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainers: Option<PeopleField>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributors: Option<PeopleField>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugs: Option<Value>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_deprecated"
    )]
    pub deprecated: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,

    #[serde(default)]
    pub dist: Dist,

    /// Name of the uplink this version was merged from. Never serialized;
    /// only consulted when deciding dist-URL protocol rewrites.
    #[serde(skip)]
    pub origin: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Upstream documents occasionally carry `deprecated: false` or other
/// non-string shapes; only a string marks a version deprecated.
fn de_deprecated<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(message)) => Some(message),
        _ => None,
    })
}

impl Version {
    /// Rewrites `contributors` into the canonical list-of-objects form.
    pub fn normalize_contributors(&mut self) {
        if let Some(field) = self.contributors.take() {
            let people = field
                .into_people()
                .into_iter()
                .map(PersonEntry::Full)
                .collect();
            self.contributors = Some(PeopleField::Many(people));
        }
    }
}

/// Orders two version strings for dist-tag promotion. Strict semver when both
/// sides parse, lexicographic otherwise so arbitrary tags still get a total
/// order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_from_short_form() {
        let person = Person::from_short("Ada Lovelace <ada@example.com>");
        assert_eq!(person.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(person.email.as_deref(), Some("ada@example.com"));

        let person = Person::from_short("Just A Name");
        assert_eq!(person.name.as_deref(), Some("Just A Name"));
        assert_eq!(person.email, None);
    }

    #[test]
    fn test_contributors_single_string() {
        let mut version: Version = serde_json::from_value(serde_json::json!({
            "name": "foo",
            "version": "1.0.0",
            "contributors": "Ada <ada@example.com>"
        }))
        .unwrap();
        version.normalize_contributors();

        let Some(PeopleField::Many(entries)) = version.contributors else {
            panic!("expected normalized list");
        };
        assert_eq!(entries.len(), 1);
        let PersonEntry::Full(person) = &entries[0] else {
            panic!("expected full entry");
        };
        assert_eq!(person.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_contributors_mixed_list() {
        let mut version: Version = serde_json::from_value(serde_json::json!({
            "name": "foo",
            "version": "1.0.0",
            "contributors": ["Ada <ada@example.com>", {"name": "Grace"}]
        }))
        .unwrap();
        version.normalize_contributors();

        let Some(PeopleField::Many(entries)) = version.contributors else {
            panic!("expected normalized list");
        };
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_compare_versions_semver() {
        assert_eq!(compare_versions("1.9.0", "1.10.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "2.0.0-beta.1"), Ordering::Greater);
    }

    #[test]
    fn test_compare_versions_fallback() {
        // non-semver strings fall back to lexicographic order
        assert_eq!(compare_versions("not-a-version", "also-not"), Ordering::Greater);
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let input = serde_json::json!({
            "name": "foo",
            "version": "1.0.0",
            "dist": {"tarball": "http://x/foo-1.0.0.tgz", "fileCount": 12},
            "engines": {"node": ">=18"}
        });
        let version: Version = serde_json::from_value(input).unwrap();
        let output = serde_json::to_value(&version).unwrap();
        assert_eq!(output["engines"]["node"], ">=18");
        assert_eq!(output["dist"]["fileCount"], 12);
    }
}
