use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ImpExpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ImpExpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ImpExpError::InvalidId(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HistoryId(u64);

impl HistoryId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HistoryId {
    type Err = ImpExpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ImpExpError::InvalidId(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    Url,
    File,
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveType::Url => write!(f, "url"),
            ArchiveType::File => write!(f, "file"),
        }
    }
}

impl FromStr for ArchiveType {
    type Err = ImpExpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "url" => Ok(ArchiveType::Url),
            "file" => Ok(ArchiveType::File),
            _ => Err(ImpExpError::InvalidArchiveType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    New,
    Queued,
    Running,
    Ok,
    Error,
    Deleted,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::New => write!(f, "new"),
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Ok => write!(f, "ok"),
            JobState::Error => write!(f, "error"),
            JobState::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetState {
    #[default]
    Ok,
    Queued,
    Error,
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn system_username(&self, real_system_username: &str) -> String {
        match real_system_username {
            "user_email" => self
                .email
                .split('@')
                .next()
                .unwrap_or(self.email.as_str())
                .to_string(),
            "username" => self
                .username
                .clone()
                .unwrap_or_else(|| self.email.clone()),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    #[serde(default)]
    pub history_id: Option<HistoryId>,
    pub tool_id: String,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub tool_stderr: String,
    #[serde(default)]
    pub output_hids: Vec<u32>,
    #[serde(default)]
    pub imported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub id: HistoryId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub name: String,
    #[serde(default)]
    pub importing: bool,
    pub create_time: String,
    #[serde(default)]
    pub contents: Vec<HistoryItem>,
}

impl History {
    pub fn next_hid(&self) -> u32 {
        self.contents.iter().map(HistoryItem::hid).max().unwrap_or(0) + 1
    }

    pub fn datasets(&self) -> impl Iterator<Item = &HistoryDataset> {
        self.contents.iter().filter_map(|item| match item {
            HistoryItem::Dataset(dataset) => Some(dataset),
            HistoryItem::Collection(_) => None,
        })
    }

    pub fn collections(&self) -> impl Iterator<Item = &HistoryCollection> {
        self.contents.iter().filter_map(|item| match item {
            HistoryItem::Collection(collection) => Some(collection),
            HistoryItem::Dataset(_) => None,
        })
    }

    pub fn dataset_by_hid(&self, hid: u32) -> Option<&HistoryDataset> {
        self.datasets().find(|dataset| dataset.hid == hid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryItem {
    Dataset(HistoryDataset),
    Collection(HistoryCollection),
}

impl HistoryItem {
    pub fn hid(&self) -> u32 {
        match self {
            HistoryItem::Dataset(dataset) => dataset.hid,
            HistoryItem::Collection(collection) => collection.hid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDataset {
    pub hid: u32,
    pub name: String,
    pub extension: String,
    #[serde(default)]
    pub info: Option<String>,
    pub file_path: PathBuf,
    #[serde(default)]
    pub source_url: Option<String>,
    pub visible: bool,
    pub deleted: bool,
    #[serde(default)]
    pub state: DatasetState,
    pub create_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCollection {
    pub hid: u32,
    pub name: String,
    pub collection_type: String,
    pub elements: Vec<CollectionElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionElement {
    pub element_identifier: String,
    pub hid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub job_id: JobId,
    #[serde(default)]
    pub history_id: Option<HistoryId>,
    pub archive_dir: PathBuf,
}

/// Final path segment of a URL or path, query string included.
pub fn url_basename(url: &str) -> &str {
    match url.rfind('/') {
        Some(index) => &url[index + 1..],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_of_url() {
        assert_eq!(url_basename("http://example/data.csv"), "data.csv");
        assert_eq!(url_basename("data.csv"), "data.csv");
        assert_eq!(url_basename("http://example/dir/"), "");
    }

    #[test]
    fn system_username_mapping() {
        let user = User {
            id: UserId::new(1),
            email: "alice@example.org".to_string(),
            username: Some("alice-w".to_string()),
        };
        assert_eq!(user.system_username("user_email"), "alice");
        assert_eq!(user.system_username("username"), "alice-w");
        assert_eq!(user.system_username("galaxy"), "galaxy");
    }
}
