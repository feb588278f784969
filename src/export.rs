use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::domain::{History, HistoryId, JobId, JobState};
use crate::error::ImpExpError;
use crate::model_store::{
    ArchiveSummary, COLLECTIONS_ATTRS, CollectionAttrs, DATASETS_ATTRS, DATASETS_DIR,
    DatasetAttrs, ElementAttrs, HISTORY_ATTRS, HistoryAttrs, JOBS_ATTRS, JobAttrs, write_attrs,
};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportHistoryRequest {
    pub store_directory: PathBuf,
    pub history_id: HistoryId,
    pub job_id: JobId,
    pub include_hidden: bool,
    pub include_deleted: bool,
}

pub trait ExportTasks: Send + Sync {
    fn export_history(&self, request: &ExportHistoryRequest) -> Result<(), ImpExpError>;
    fn delay_export_history(&self, request: ExportHistoryRequest) -> Result<(), ImpExpError>;
}

pub struct HistoryExportJob<'t, T: ExportTasks> {
    tasks: &'t T,
    enable_celery_tasks: bool,
    job_id: JobId,
}

impl<'t, T: ExportTasks> HistoryExportJob<'t, T> {
    pub fn new(tasks: &'t T, config: &AppConfig, job_id: JobId) -> Self {
        Self {
            tasks,
            enable_celery_tasks: config.enable_celery_tasks,
            job_id,
        }
    }

    /// `compressed` is accepted for callers but not passed on; packaging decides compression.
    pub fn setup_job(
        &self,
        history: &History,
        store_directory: &Path,
        include_hidden: bool,
        include_deleted: bool,
        _compressed: bool,
    ) -> Result<(), ImpExpError> {
        let request = ExportHistoryRequest {
            store_directory: store_directory.to_path_buf(),
            history_id: history.id,
            job_id: self.job_id,
            include_hidden,
            include_deleted,
        };
        if self.enable_celery_tasks {
            info!(job = %self.job_id, history = %history.id, "queueing history export");
            self.tasks.delay_export_history(request)
        } else {
            info!(job = %self.job_id, history = %history.id, "exporting history inline");
            self.tasks.export_history(&request)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Copy,
    Symlink,
}

pub struct LocalExportTasks<S: Session + 'static> {
    session: Arc<S>,
}

impl<S: Session + 'static> LocalExportTasks<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session }
    }
}

impl<S: Session + 'static> ExportTasks for LocalExportTasks<S> {
    fn export_history(&self, request: &ExportHistoryRequest) -> Result<(), ImpExpError> {
        run_export(self.session.as_ref(), request, FileMode::Copy).map(|_| ())
    }

    fn delay_export_history(&self, request: ExportHistoryRequest) -> Result<(), ImpExpError> {
        let session = Arc::clone(&self.session);
        thread::Builder::new()
            .name(format!("export-history-{}", request.job_id))
            .spawn(move || {
                if let Err(err) = run_export(session.as_ref(), &request, FileMode::Symlink) {
                    error!(job = %request.job_id, error = %err, "queued history export failed");
                }
            })
            .map_err(|err| ImpExpError::TaskQueue(err.to_string()))?;
        Ok(())
    }
}

pub fn run_export<S: Session>(
    session: &S,
    request: &ExportHistoryRequest,
    mode: FileMode,
) -> Result<ArchiveSummary, ImpExpError> {
    session.set_job_state(request.job_id, JobState::Running)?;
    session.flush()?;
    match write_export_store(session, request, mode) {
        Ok(summary) => {
            session.set_job_state(request.job_id, JobState::Ok)?;
            session.flush()?;
            Ok(summary)
        }
        Err(err) => {
            if let Err(record_err) = record_export_failure(session, request.job_id, &err) {
                error!(job = %request.job_id, error = %record_err, "failed to record history export error");
            }
            Err(err)
        }
    }
}

fn record_export_failure<S: Session>(
    session: &S,
    job_id: JobId,
    err: &ImpExpError,
) -> Result<(), ImpExpError> {
    session.set_job_state(job_id, JobState::Error)?;
    session.append_tool_stderr(job_id, &format!("Error exporting history: {err}"))?;
    session.flush()
}

pub fn write_export_store<S: Session>(
    session: &S,
    request: &ExportHistoryRequest,
    mode: FileMode,
) -> Result<ArchiveSummary, ImpExpError> {
    let history = session.history(request.history_id)?;
    let store_dir = request.store_directory.as_path();
    fs::create_dir_all(store_dir.join(DATASETS_DIR))
        .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;

    let mut summary = ArchiveSummary::default();
    let mut files_by_hid = HashMap::new();
    let mut datasets = Vec::new();
    for dataset in history.datasets() {
        if !dataset.visible && !request.include_hidden {
            continue;
        }
        if dataset.deleted && !request.include_deleted {
            continue;
        }
        let file_name = format!(
            "{DATASETS_DIR}/dataset_{}.{}",
            dataset.hid,
            file_extension(&dataset.extension)
        );
        let target = store_dir.join(&file_name);
        let placed = match mode {
            FileMode::Copy => fs::copy(&dataset.file_path, &target).map(|_| ()),
            FileMode::Symlink => fs::canonicalize(&dataset.file_path)
                .and_then(|source| link_file(&source, &target)),
        };
        placed.map_err(|err| {
            ImpExpError::Filesystem(format!("export {}: {err}", dataset.file_path.display()))
        })?;
        files_by_hid.insert(dataset.hid, file_name.clone());
        datasets.push(DatasetAttrs {
            file_name,
            name: dataset.name.clone(),
            hid: Some(dataset.hid),
            extension: dataset.extension.clone(),
            info: dataset.info.clone(),
            visible: dataset.visible,
            deleted: dataset.deleted,
            state: dataset.state,
        });
        summary.datasets += 1;
    }

    let collections = history
        .collections()
        .map(|collection| CollectionAttrs {
            name: collection.name.clone(),
            hid: Some(collection.hid),
            collection_type: collection.collection_type.clone(),
            elements: collection
                .elements
                .iter()
                .filter_map(|element| {
                    files_by_hid.get(&element.hid).map(|file_name| ElementAttrs {
                        element_identifier: element.element_identifier.clone(),
                        file_name: file_name.clone(),
                    })
                })
                .collect(),
        })
        .collect::<Vec<_>>();
    summary.collections = collections.len();

    let jobs = session
        .history_jobs(history.id)?
        .into_iter()
        .filter(|job| job.id != request.job_id)
        .map(|job| JobAttrs {
            tool_id: job.tool_id,
            state: job.state,
            output_datasets: job
                .output_hids
                .iter()
                .filter_map(|hid| files_by_hid.get(hid).cloned())
                .collect(),
        })
        .collect::<Vec<_>>();
    summary.jobs = jobs.len();

    write_attrs(
        store_dir,
        HISTORY_ATTRS,
        &HistoryAttrs {
            name: Some(history.name.clone()),
        },
    )?;
    write_attrs(store_dir, DATASETS_ATTRS, &datasets)?;
    write_attrs(store_dir, COLLECTIONS_ATTRS, &collections)?;
    write_attrs(store_dir, JOBS_ATTRS, &jobs)?;

    debug!(
        history = %history.id,
        path = %store_dir.display(),
        datasets = summary.datasets,
        "export store written"
    );
    Ok(summary)
}

// Extensions come from imported archives and must not add path components.
fn file_extension(extension: &str) -> String {
    let cleaned: String = extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "data".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(unix)]
fn link_file(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn link_file(source: &Path, target: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(source, target)
}
