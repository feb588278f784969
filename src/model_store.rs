use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{
    CollectionElement, DatasetState, History, HistoryDataset, Job, JobState, User,
};
use crate::error::ImpExpError;
use crate::session::{NewCollection, NewDataset, NewJob, Session};

pub const HISTORY_ATTRS: &str = "history_attrs.txt";
pub const DATASETS_ATTRS: &str = "datasets_attrs.txt";
pub const COLLECTIONS_ATTRS: &str = "collections_attrs.txt";
pub const JOBS_ATTRS: &str = "jobs_attrs.txt";
pub const DATASETS_DIR: &str = "datasets";

const UNNAMED_HISTORY: &str = "unnamed imported history";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryAttrs {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetAttrs {
    pub file_name: String,
    pub name: String,
    #[serde(default)]
    pub hid: Option<u32>,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub state: DatasetState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionAttrs {
    pub name: String,
    #[serde(default)]
    pub hid: Option<u32>,
    #[serde(default = "default_collection_type")]
    pub collection_type: String,
    #[serde(default)]
    pub elements: Vec<ElementAttrs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementAttrs {
    pub element_identifier: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttrs {
    pub tool_id: String,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub output_datasets: Vec<String>,
}

fn default_extension() -> String {
    "data".to_string()
}

fn default_visible() -> bool {
    true
}

fn default_collection_type() -> String {
    "list".to_string()
}

pub fn read_attrs<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Option<T>, ImpExpError> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .map_err(|err| ImpExpError::Filesystem(format!("{}: {err}", path.display())))?;
    let value = serde_json::from_str(&content).map_err(|err| ImpExpError::ArchiveAttributes {
        file: file.to_string(),
        message: err.to_string(),
    })?;
    Ok(Some(value))
}

pub fn write_attrs<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<(), ImpExpError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| ImpExpError::ArchiveAttributes {
            file: file.to_string(),
            message: err.to_string(),
        })?;
    fs::write(dir.join(file), content).map_err(|err| ImpExpError::Filesystem(err.to_string()))
}

/// Resolves an archive-relative path, refusing anything that escapes `root`.
pub fn enclosed_path(root: &Path, relative: &str) -> Result<PathBuf, ImpExpError> {
    let candidate = Path::new(relative);
    let escapes = candidate.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || relative.is_empty() {
        return Err(ImpExpError::ArchiveAttributes {
            file: relative.to_string(),
            message: "archive path traversal detected".to_string(),
        });
    }
    Ok(root.join(candidate))
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn store_file(&self, source: &Path) -> Result<PathBuf, ImpExpError> {
        fs::create_dir_all(&self.root).map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("dataset_")
            .suffix(".dat")
            .tempfile_in(&self.root)
            .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        fs::copy(source, temp.path()).map_err(|err| {
            ImpExpError::Filesystem(format!("copy {}: {err}", source.display()))
        })?;
        let (_, path) = temp
            .keep()
            .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub datasets: usize,
    pub collections: usize,
    pub jobs: usize,
}

pub struct DirectoryModelStore<'s, S: Session> {
    archive_dir: PathBuf,
    user: User,
    session: &'s S,
    object_store: ObjectStore,
}

impl<'s, S: Session> DirectoryModelStore<'s, S> {
    pub fn for_directory(
        archive_dir: &Path,
        user: User,
        session: &'s S,
        object_store: ObjectStore,
    ) -> Self {
        Self {
            archive_dir: archive_dir.to_path_buf(),
            user,
            session,
            object_store,
        }
    }

    pub fn defines_new_history_import(&self) -> bool {
        self.archive_dir.join(HISTORY_ATTRS).exists()
    }

    /// A history created here stays flagged as importing unless `body` succeeds.
    pub fn target_history<T, F>(
        &self,
        default_history: Option<&History>,
        body: F,
    ) -> Result<T, ImpExpError>
    where
        F: FnOnce(&History) -> Result<T, ImpExpError>,
    {
        let (history, created) = if self.defines_new_history_import() {
            let attrs: HistoryAttrs = read_attrs(&self.archive_dir, HISTORY_ATTRS)?
                .unwrap_or_default();
            let name = match attrs.name.filter(|name| !name.trim().is_empty()) {
                Some(name) => format!("imported from archive: {name}"),
                None => UNNAMED_HISTORY.to_string(),
            };
            (self.create_history(&name)?, true)
        } else {
            match default_history {
                Some(history) => (history.clone(), false),
                None => (self.create_history(UNNAMED_HISTORY)?, true),
            }
        };
        debug!(history = %history.id, created, "target history resolved");

        let value = body(&history)?;

        if created {
            self.session.finish_history_import(history.id)?;
            self.session.flush()?;
        }
        Ok(value)
    }

    pub fn perform_import(
        &self,
        history: &History,
        job: &Job,
        new_history: bool,
    ) -> Result<ArchiveSummary, ImpExpError> {
        let mut summary = ArchiveSummary::default();
        let mut hids_by_file = HashMap::new();

        let datasets: Vec<DatasetAttrs> =
            read_attrs(&self.archive_dir, DATASETS_ATTRS)?.unwrap_or_default();
        for attrs in datasets {
            let source = enclosed_path(&self.archive_dir, &attrs.file_name)?;
            if !source.is_file() {
                return Err(ImpExpError::MissingArchiveFile(source));
            }
            let stored = self.object_store.store_file(&source)?;
            let created = self.session.add_dataset(
                history.id,
                NewDataset {
                    hid: if new_history { attrs.hid } else { None },
                    name: attrs.name,
                    extension: attrs.extension,
                    info: attrs.info,
                    file_path: stored,
                    source_url: None,
                    visible: attrs.visible,
                    deleted: attrs.deleted,
                    state: attrs.state,
                },
            )?;
            hids_by_file.insert(attrs.file_name, created.hid);
            summary.datasets += 1;
        }

        let collections: Vec<CollectionAttrs> =
            read_attrs(&self.archive_dir, COLLECTIONS_ATTRS)?.unwrap_or_default();
        for attrs in collections {
            let elements = attrs
                .elements
                .into_iter()
                .map(|element| {
                    let hid = lookup_hid(&hids_by_file, &element.file_name, COLLECTIONS_ATTRS)?;
                    Ok(CollectionElement {
                        element_identifier: element.element_identifier,
                        hid,
                    })
                })
                .collect::<Result<Vec<_>, ImpExpError>>()?;
            self.session.add_collection(
                history.id,
                NewCollection {
                    hid: if new_history { attrs.hid } else { None },
                    name: attrs.name,
                    collection_type: attrs.collection_type,
                    elements,
                },
            )?;
            summary.collections += 1;
        }

        let jobs: Vec<JobAttrs> = read_attrs(&self.archive_dir, JOBS_ATTRS)?.unwrap_or_default();
        for attrs in jobs {
            let output_hids = attrs
                .output_datasets
                .iter()
                .map(|file_name| lookup_hid(&hids_by_file, file_name, JOBS_ATTRS))
                .collect::<Result<Vec<_>, ImpExpError>>()?;
            self.session.add_job(NewJob {
                user_id: self.user.id,
                history_id: Some(history.id),
                tool_id: attrs.tool_id,
                state: attrs.state,
                output_hids,
                imported: true,
            })?;
            summary.jobs += 1;
        }

        info!(
            job = %job.id,
            history = %history.id,
            datasets = summary.datasets,
            collections = summary.collections,
            jobs = summary.jobs,
            "archive imported"
        );
        Ok(summary)
    }

    pub fn perform_import_light(
        &self,
        history: &History,
        job: &Job,
        file_name: &str,
        name: &str,
        url: &str,
        new_history: bool,
    ) -> Result<HistoryDataset, ImpExpError> {
        let source = enclosed_path(&self.archive_dir.join(DATASETS_DIR), file_name)?;
        if !source.is_file() {
            return Err(ImpExpError::MissingArchiveFile(source));
        }
        let stored = self.object_store.store_file(&source)?;
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(default_extension);
        let created = self.session.add_dataset(
            history.id,
            NewDataset {
                hid: None,
                name: name.to_string(),
                extension,
                info: Some(format!("uploaded from {url}")),
                file_path: stored,
                source_url: Some(url.to_string()),
                visible: true,
                deleted: false,
                state: DatasetState::Ok,
            },
        )?;
        info!(
            job = %job.id,
            history = %history.id,
            hid = created.hid,
            new_history,
            "file imported"
        );
        Ok(created)
    }

    fn create_history(&self, name: &str) -> Result<History, ImpExpError> {
        let history = self.session.create_history(Some(self.user.id), name)?;
        self.session.flush()?;
        Ok(history)
    }
}

fn lookup_hid(
    hids_by_file: &HashMap<String, u32>,
    file_name: &str,
    attrs_file: &str,
) -> Result<u32, ImpExpError> {
    hids_by_file
        .get(file_name)
        .copied()
        .ok_or_else(|| ImpExpError::ArchiveAttributes {
            file: attrs_file.to_string(),
            message: format!("unknown dataset reference {file_name}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosed_path_rejects_traversal() {
        let root = Path::new("/tmp/archive");
        assert!(enclosed_path(root, "../etc/passwd").is_err());
        assert!(enclosed_path(root, "/etc/passwd").is_err());
        assert_eq!(
            enclosed_path(root, "datasets/a.txt").unwrap(),
            PathBuf::from("/tmp/archive/datasets/a.txt")
        );
    }
}
