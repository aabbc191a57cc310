use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Deserializer};
use walkdir::WalkDir;

use crate::domain::sanitize_name;
use crate::error::MirrorError;

pub const DEFAULT_MANIFEST_NAME: &str = "data-library.yaml";

#[derive(Debug)]
pub struct ManifestWalker {
    inner: walkdir::IntoIter,
    file_name: String,
}

pub fn find_manifests(root: &Utf8Path, file_name: &str) -> ManifestWalker {
    ManifestWalker {
        inner: WalkDir::new(root.as_std_path())
            .follow_links(false)
            .into_iter(),
        file_name: file_name.to_string(),
    }
}

impl Iterator for ManifestWalker {
    type Item = Result<Utf8PathBuf, MirrorError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(MirrorError::Filesystem(err.to_string()))),
            };
            if !entry.file_type().is_file() || entry.file_name() != self.file_name.as_str() {
                continue;
            }
            return Some(Utf8PathBuf::from_path_buf(entry.into_path()).map_err(|path| {
                MirrorError::Filesystem(format!("non-utf8 manifest path {}", path.display()))
            }));
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub destination: Destination,
    pub items: Vec<Topic>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Destination {
    #[serde(deserialize_with = "scalar_string")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Topic {
    #[serde(default, deserialize_with = "optional_scalar_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<Tutorial>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tutorial {
    #[serde(default, deserialize_with = "optional_scalar_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    items: Vec<TutorialEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TutorialEntry {
    #[serde(default, deserialize_with = "optional_scalar_string")]
    name: Option<String>,
    // Outer `Some` records that the key is present, even as `url: ~`.
    #[serde(default, deserialize_with = "present_scalar_string")]
    url: Option<Option<String>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    items: Vec<Item>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TutorialContent<'a> {
    Items(Vec<&'a str>),
    Groups(Vec<DoiGroup<'a>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoiGroup<'a> {
    pub name: &'a str,
    pub urls: Vec<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub folders: Vec<String>,
    pub url: String,
}

impl Manifest {
    pub fn load(path: &Utf8Path) -> Result<Self, MirrorError> {
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| MirrorError::ManifestRead {
                path: path.as_std_path().to_path_buf(),
                message: err.to_string(),
            })?;
        Self::parse(&content).map_err(|message| MirrorError::ManifestParse {
            path: path.as_std_path().to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        serde_yaml::from_str(content).map_err(|err| err.to_string())
    }

    pub fn destination_name(&self) -> &str {
        &self.destination.name
    }

    pub fn entries(&self) -> Vec<ManifestEntry> {
        let destination = sanitize_name(self.destination_name());
        let mut entries = Vec::new();
        for topic in &self.items {
            let topic_name = sanitize_name(topic.name());
            for tutorial in &topic.items {
                let tutorial_name = sanitize_name(tutorial.name());
                let base = vec![destination.clone(), topic_name.clone(), tutorial_name];
                match tutorial.content() {
                    TutorialContent::Items(urls) => {
                        entries.extend(urls.into_iter().map(|url| ManifestEntry {
                            folders: base.clone(),
                            url: url.to_string(),
                        }));
                    }
                    TutorialContent::Groups(groups) => {
                        for group in groups {
                            let mut folders = base.clone();
                            folders.push(sanitize_name(group.name));
                            entries.extend(group.urls.into_iter().map(|url| ManifestEntry {
                                folders: folders.clone(),
                                url: url.to_string(),
                            }));
                        }
                    }
                }
            }
        }
        entries
    }
}

impl Topic {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed-Topic")
    }
}

impl Tutorial {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("Tutorial")
    }

    // Direct items as soon as one entry has a `url` key, DOI groups otherwise.
    pub fn content(&self) -> TutorialContent<'_> {
        if self.items.iter().any(|entry| entry.url.is_some()) {
            return TutorialContent::Items(
                self.items
                    .iter()
                    .filter_map(|entry| non_empty(entry.url.as_ref().and_then(|url| url.as_deref())))
                    .collect(),
            );
        }
        TutorialContent::Groups(
            self.items
                .iter()
                .map(|entry| DoiGroup {
                    name: entry.name.as_deref().unwrap_or_default(),
                    urls: entry
                        .items
                        .iter()
                        .filter_map(|item| non_empty(item.url.as_deref()))
                        .collect(),
                })
                .collect(),
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    optional_scalar_string(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("expected a string, found null"))
}

// Manifests occasionally carry numeric names (years, versions).
fn optional_scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::String(value) => Ok(Some(value)),
        serde_yaml::Value::Number(value) => Ok(Some(value.to_string())),
        serde_yaml::Value::Bool(value) => Ok(Some(value.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar, found {other:?}"
        ))),
    }
}

fn present_scalar_string<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    optional_scalar_string(deserializer).map(Some)
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
