//! Search result projections.

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;
use crate::version::{Person, PersonEntry};

/// A raw hit from a storage backend's search capability.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npm: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugs: Option<String>,
}

/// The package body served in search responses, projected from the manifest's
/// current `latest` version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPackageBody {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Person>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Person>,

    #[serde(default)]
    pub links: SearchLinks,
}

impl SearchPackageBody {
    /// Projects a manifest into a search body. Returns `None` for packages
    /// with no versions, which search skips entirely.
    pub fn project(manifest: &Manifest) -> Option<Self> {
        let latest = manifest
            .dist_tags
            .get("latest")
            .or_else(|| manifest.dist_tags.values().next())?;
        let version = manifest.versions.get(latest)?;

        let scope = manifest
            .name
            .strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .map(|(scope, _)| scope.to_string());

        let author = version.author.clone().map(|entry| match entry {
            PersonEntry::Short(text) => crate::version::PeopleField::One(PersonEntry::Short(text))
                .into_people()
                .remove(0),
            PersonEntry::Full(person) => person,
        });

        let maintainers = version
            .maintainers
            .clone()
            .map(|field| field.into_people())
            .unwrap_or_default();

        let repository = version.repository.as_ref().and_then(|repo| {
            repo.as_str().map(str::to_string).or_else(|| {
                repo.get("url")
                    .and_then(|url| url.as_str())
                    .map(str::to_string)
            })
        });
        let bugs = version.bugs.as_ref().and_then(|bugs| {
            bugs.as_str().map(str::to_string).or_else(|| {
                bugs.get("url")
                    .and_then(|url| url.as_str())
                    .map(str::to_string)
            })
        });

        Some(SearchPackageBody {
            name: manifest.name.clone(),
            scope,
            description: version.description.clone(),
            version: latest.clone(),
            keywords: version.keywords.clone(),
            date: manifest.time.get("modified").cloned(),
            author,
            maintainers,
            links: SearchLinks {
                npm: None,
                homepage: version.homepage.clone(),
                repository,
                bugs,
            },
        })
    }
}
