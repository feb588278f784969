use std::fs;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::chown::{ExternalChown, OwnershipTransfer, process_user};
use crate::config::AppConfig;
use crate::domain::{ArchiveType, History, ImportRecord, Job, JobId, User, url_basename};
use crate::error::ImpExpError;
use crate::model_store::{DirectoryModelStore, ObjectStore};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    FullArchive,
    SingleFile { url: String },
}

impl ImportKind {
    fn cleanup_reason(&self) -> &'static str {
        match self {
            ImportKind::FullArchive => "history import archive directory",
            ImportKind::SingleFile { .. } => "upload file to history",
        }
    }
}

pub struct HistoryImportJob<'s, S: Session> {
    session: &'s S,
    object_store: ObjectStore,
    chown: Option<Box<dyn OwnershipTransfer>>,
    real_system_username: String,
    job_id: JobId,
    kind: ImportKind,
}

impl<'s, S: Session> HistoryImportJob<'s, S> {
    pub fn new(session: &'s S, config: &AppConfig, job_id: JobId, kind: ImportKind) -> Self {
        let chown = config
            .external_chown_script
            .clone()
            .map(|script| Box::new(ExternalChown::new(script)) as Box<dyn OwnershipTransfer>);
        Self {
            session,
            object_store: ObjectStore::new(config.file_path.clone()),
            chown,
            real_system_username: config.real_system_username.clone(),
            job_id,
            kind,
        }
    }

    pub fn with_ownership_transfer(mut self, chown: Box<dyn OwnershipTransfer>) -> Self {
        self.chown = Some(chown);
        self
    }

    pub fn setup_job(
        &self,
        record: &ImportRecord,
        archive_source: &Path,
        archive_type: ArchiveType,
    ) -> Result<(), ImpExpError> {
        let Some(chown) = &self.chown else {
            return Ok(());
        };
        let job = self.session.job(record.job_id)?;
        let user = self.session.user(job.user_id)?;
        let system_user = user.system_username(&self.real_system_username);
        if archive_type != ArchiveType::Url {
            chown.chown(archive_source, &system_user, "history import archive")?;
        }
        chown.chown(
            &record.archive_dir,
            &system_user,
            "history import archive directory",
        )
    }

    /// Returns `None` when no import record exists for the job. On failure the error is
    /// appended to the job's stderr and the staging directory is left in place.
    pub fn cleanup_after_job(&self) -> Result<Option<History>, ImpExpError> {
        let Some(record) = self.session.find_import_record(self.job_id)? else {
            debug!(job = %self.job_id, "no history import record");
            return Ok(None);
        };
        let job = self.session.job(record.job_id)?;
        let user = self.session.user(job.user_id)?;

        if let Some(history_id) = record.history_id
            && !record.archive_dir.exists()
        {
            info!(job = %job.id, history = %history_id, "history import already completed");
            return self.session.history(history_id).map(Some);
        }

        match self.import(&record, &job, user) {
            Ok(history) => Ok(Some(history)),
            Err(err) => {
                warn!(job = %job.id, error = %err, "history import failed");
                if let Err(record_err) = self.record_failure(job.id, &err) {
                    error!(job = %job.id, error = %record_err, "failed to record history import error");
                }
                Err(err)
            }
        }
    }

    fn record_failure(&self, job_id: JobId, err: &ImpExpError) -> Result<(), ImpExpError> {
        self.session
            .append_tool_stderr(job_id, &format!("Error cleaning up history import job: {err}"))?;
        self.session.flush()
    }

    fn import(&self, record: &ImportRecord, job: &Job, user: User) -> Result<History, ImpExpError> {
        let archive_dir = record.archive_dir.as_path();
        if let Some(chown) = &self.chown {
            chown.chown(archive_dir, &process_user(), self.kind.cleanup_reason())?;
        }

        let store = DirectoryModelStore::for_directory(
            archive_dir,
            user,
            self.session,
            self.object_store.clone(),
        );
        let default_history = job
            .history_id
            .map(|id| self.session.history(id))
            .transpose()?;

        let history_id = store.target_history(default_history.as_ref(), |history| {
            self.session.set_import_history(record.job_id, history.id)?;
            self.session.flush()?;

            match &self.kind {
                ImportKind::FullArchive => {
                    store.perform_import(history, job, true)?;
                }
                ImportKind::SingleFile { url } => {
                    let file_name = url_basename(url);
                    store.perform_import_light(history, job, file_name, file_name, url, true)?;
                }
            }

            if archive_dir.exists() {
                fs::remove_dir_all(archive_dir).map_err(|err| {
                    ImpExpError::Filesystem(format!("remove {}: {err}", archive_dir.display()))
                })?;
                debug!(path = %archive_dir.display(), "archive directory removed");
            }
            Ok(history.id)
        })?;

        self.session.history(history_id)
    }
}
