use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    CollectionElement, DatasetState, History, HistoryCollection, HistoryDataset, HistoryId,
    HistoryItem, ImportRecord, Job, JobId, JobState, User, UserId,
};
use crate::error::ImpExpError;

#[derive(Debug, Clone)]
pub struct NewDataset {
    /// Requested hid; ignored when already taken in the target history.
    pub hid: Option<u32>,
    pub name: String,
    pub extension: String,
    pub info: Option<String>,
    pub file_path: PathBuf,
    pub source_url: Option<String>,
    pub visible: bool,
    pub deleted: bool,
    pub state: DatasetState,
}

#[derive(Debug, Clone)]
pub struct NewCollection {
    pub hid: Option<u32>,
    pub name: String,
    pub collection_type: String,
    pub elements: Vec<CollectionElement>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: UserId,
    pub history_id: Option<HistoryId>,
    pub tool_id: String,
    pub state: JobState,
    pub output_hids: Vec<u32>,
    pub imported: bool,
}

pub trait Session: Send + Sync {
    fn find_import_record(&self, job_id: JobId) -> Result<Option<ImportRecord>, ImpExpError>;
    fn set_import_history(&self, job_id: JobId, history_id: HistoryId)
    -> Result<(), ImpExpError>;
    fn job(&self, id: JobId) -> Result<Job, ImpExpError>;
    fn user(&self, id: UserId) -> Result<User, ImpExpError>;
    fn history(&self, id: HistoryId) -> Result<History, ImpExpError>;
    fn history_jobs(&self, id: HistoryId) -> Result<Vec<Job>, ImpExpError>;
    fn create_history(&self, user_id: Option<UserId>, name: &str)
    -> Result<History, ImpExpError>;
    fn finish_history_import(&self, id: HistoryId) -> Result<(), ImpExpError>;
    fn add_dataset(
        &self,
        history_id: HistoryId,
        dataset: NewDataset,
    ) -> Result<HistoryDataset, ImpExpError>;
    fn add_collection(
        &self,
        history_id: HistoryId,
        collection: NewCollection,
    ) -> Result<HistoryCollection, ImpExpError>;
    fn add_job(&self, job: NewJob) -> Result<Job, ImpExpError>;
    fn set_job_state(&self, job_id: JobId, state: JobState) -> Result<(), ImpExpError>;
    fn append_tool_stderr(&self, job_id: JobId, text: &str) -> Result<(), ImpExpError>;
    fn flush(&self) -> Result<(), ImpExpError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub histories: Vec<History>,
    #[serde(default)]
    pub import_records: Vec<ImportRecord>,
}

impl SessionState {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, ImpExpError> {
        self.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(ImpExpError::JobNotFound(id))
    }

    fn history_mut(&mut self, id: HistoryId) -> Result<&mut History, ImpExpError> {
        self.histories
            .iter_mut()
            .find(|history| history.id == id)
            .ok_or(ImpExpError::HistoryNotFound(id))
    }

    fn next_job_id(&self) -> JobId {
        JobId::new(self.jobs.iter().map(|job| job.id.get()).max().unwrap_or(0) + 1)
    }

    fn next_history_id(&self) -> HistoryId {
        HistoryId::new(
            self.histories
                .iter()
                .map(|history| history.id.get())
                .max()
                .unwrap_or(0)
                + 1,
        )
    }
}

#[derive(Debug)]
pub struct JsonSession {
    path: Option<PathBuf>,
    state: Mutex<SessionState>,
}

impl JsonSession {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn open(path: &Path) -> Result<Self, ImpExpError> {
        let state = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|err| ImpExpError::Filesystem(format!("{}: {err}", path.display())))?;
            serde_json::from_str(&content)
                .map_err(|err| ImpExpError::Session(format!("{}: {err}", path.display())))?
        } else {
            SessionState::default()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    pub fn snapshot(&self) -> Result<SessionState, ImpExpError> {
        Ok(self.lock()?.clone())
    }

    pub fn insert_user(&self, user: User) -> Result<(), ImpExpError> {
        self.lock()?.users.push(user);
        Ok(())
    }

    pub fn insert_job(&self, job: Job) -> Result<(), ImpExpError> {
        self.lock()?.jobs.push(job);
        Ok(())
    }

    pub fn insert_history(&self, history: History) -> Result<(), ImpExpError> {
        self.lock()?.histories.push(history);
        Ok(())
    }

    pub fn insert_import_record(&self, record: ImportRecord) -> Result<(), ImpExpError> {
        self.lock()?.import_records.push(record);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, ImpExpError> {
        self.state
            .lock()
            .map_err(|_| ImpExpError::Session("session lock poisoned".to_string()))
    }
}

impl Session for JsonSession {
    fn find_import_record(&self, job_id: JobId) -> Result<Option<ImportRecord>, ImpExpError> {
        let state = self.lock()?;
        let mut matches = state
            .import_records
            .iter()
            .filter(|record| record.job_id == job_id);
        let first = matches.next().cloned();
        if matches.next().is_some() {
            return Err(ImpExpError::DuplicateImportRecord(job_id));
        }
        Ok(first)
    }

    fn set_import_history(
        &self,
        job_id: JobId,
        history_id: HistoryId,
    ) -> Result<(), ImpExpError> {
        let mut state = self.lock()?;
        let record = state
            .import_records
            .iter_mut()
            .find(|record| record.job_id == job_id)
            .ok_or(ImpExpError::JobNotFound(job_id))?;
        record.history_id = Some(history_id);
        Ok(())
    }

    fn job(&self, id: JobId) -> Result<Job, ImpExpError> {
        let state = self.lock()?;
        state
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned()
            .ok_or(ImpExpError::JobNotFound(id))
    }

    fn user(&self, id: UserId) -> Result<User, ImpExpError> {
        let state = self.lock()?;
        state
            .users
            .iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or(ImpExpError::UserNotFound(id))
    }

    fn history(&self, id: HistoryId) -> Result<History, ImpExpError> {
        let state = self.lock()?;
        state
            .histories
            .iter()
            .find(|history| history.id == id)
            .cloned()
            .ok_or(ImpExpError::HistoryNotFound(id))
    }

    fn history_jobs(&self, id: HistoryId) -> Result<Vec<Job>, ImpExpError> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .iter()
            .filter(|job| job.history_id == Some(id))
            .cloned()
            .collect())
    }

    fn create_history(
        &self,
        user_id: Option<UserId>,
        name: &str,
    ) -> Result<History, ImpExpError> {
        let mut state = self.lock()?;
        let history = History {
            id: state.next_history_id(),
            user_id,
            name: name.to_string(),
            importing: true,
            create_time: chrono::Utc::now().to_rfc3339(),
            contents: Vec::new(),
        };
        state.histories.push(history.clone());
        Ok(history)
    }

    fn finish_history_import(&self, id: HistoryId) -> Result<(), ImpExpError> {
        let mut state = self.lock()?;
        state.history_mut(id)?.importing = false;
        Ok(())
    }

    fn add_dataset(
        &self,
        history_id: HistoryId,
        dataset: NewDataset,
    ) -> Result<HistoryDataset, ImpExpError> {
        let mut state = self.lock()?;
        let history = state.history_mut(history_id)?;
        let created = HistoryDataset {
            hid: assign_hid(history, dataset.hid),
            name: dataset.name,
            extension: dataset.extension,
            info: dataset.info,
            file_path: dataset.file_path,
            source_url: dataset.source_url,
            visible: dataset.visible,
            deleted: dataset.deleted,
            state: dataset.state,
            create_time: chrono::Utc::now().to_rfc3339(),
        };
        history
            .contents
            .push(HistoryItem::Dataset(created.clone()));
        Ok(created)
    }

    fn add_collection(
        &self,
        history_id: HistoryId,
        collection: NewCollection,
    ) -> Result<HistoryCollection, ImpExpError> {
        let mut state = self.lock()?;
        let history = state.history_mut(history_id)?;
        let created = HistoryCollection {
            hid: assign_hid(history, collection.hid),
            name: collection.name,
            collection_type: collection.collection_type,
            elements: collection.elements,
        };
        history
            .contents
            .push(HistoryItem::Collection(created.clone()));
        Ok(created)
    }

    fn add_job(&self, job: NewJob) -> Result<Job, ImpExpError> {
        let mut state = self.lock()?;
        let created = Job {
            id: state.next_job_id(),
            user_id: job.user_id,
            history_id: job.history_id,
            tool_id: job.tool_id,
            state: job.state,
            tool_stderr: String::new(),
            output_hids: job.output_hids,
            imported: job.imported,
        };
        state.jobs.push(created.clone());
        Ok(created)
    }

    fn set_job_state(&self, job_id: JobId, state: JobState) -> Result<(), ImpExpError> {
        let mut guard = self.lock()?;
        guard.job_mut(job_id)?.state = state;
        Ok(())
    }

    fn append_tool_stderr(&self, job_id: JobId, text: &str) -> Result<(), ImpExpError> {
        let mut state = self.lock()?;
        state.job_mut(job_id)?.tool_stderr.push_str(text);
        Ok(())
    }

    fn flush(&self) -> Result<(), ImpExpError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = {
            let state = self.lock()?;
            serde_json::to_vec_pretty(&*state)
                .map_err(|err| ImpExpError::Session(err.to_string()))?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &content).map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        debug!(path = %path.display(), "session flushed");
        Ok(())
    }
}

fn assign_hid(history: &History, requested: Option<u32>) -> u32 {
    match requested {
        Some(hid) if hid > 0 && history.contents.iter().all(|item| item.hid() != hid) => hid,
        _ => history.next_hid(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_import_records_are_rejected() {
        let session = JsonSession::in_memory();
        for _ in 0..2 {
            session
                .insert_import_record(ImportRecord {
                    job_id: JobId::new(7),
                    history_id: None,
                    archive_dir: PathBuf::from("/tmp/archive"),
                })
                .unwrap();
        }
        let err = session.find_import_record(JobId::new(7)).unwrap_err();
        assert!(matches!(err, ImpExpError::DuplicateImportRecord(_)));
    }

    #[test]
    fn hids_are_sequential_per_history() {
        let session = JsonSession::in_memory();
        let history = session.create_history(None, "h").unwrap();
        let dataset = NewDataset {
            hid: None,
            name: "a".to_string(),
            extension: "txt".to_string(),
            info: None,
            file_path: PathBuf::from("/tmp/a"),
            source_url: None,
            visible: true,
            deleted: false,
            state: DatasetState::Ok,
        };
        let first = session.add_dataset(history.id, dataset.clone()).unwrap();
        let second = session.add_dataset(history.id, dataset).unwrap();
        assert_eq!(first.hid, 1);
        assert_eq!(second.hid, 2);
        assert!(session.history(history.id).unwrap().importing);
    }

    #[test]
    fn requested_hid_is_kept_unless_taken() {
        let session = JsonSession::in_memory();
        let history = session.create_history(None, "h").unwrap();
        let collection = |hid| NewCollection {
            hid,
            name: "c".to_string(),
            collection_type: "list".to_string(),
            elements: Vec::new(),
        };
        let kept = session.add_collection(history.id, collection(Some(5))).unwrap();
        let bumped = session.add_collection(history.id, collection(Some(5))).unwrap();
        assert_eq!(kept.hid, 5);
        assert_eq!(bumped.hid, 6);
    }
}
