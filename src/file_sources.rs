use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ImpExpError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSourceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileSourcesDocument {
    List(Vec<FileSourceConfig>),
    Wrapped {
        #[serde(default)]
        file_sources: Vec<FileSourceConfig>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSources {
    sources: Vec<FileSourceConfig>,
}

impl FileSources {
    pub fn load(path: &Path) -> Result<Self, ImpExpError> {
        if !path.exists() {
            return Err(ImpExpError::MissingFileSources(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)
            .map_err(|err| ImpExpError::Filesystem(format!("{}: {err}", path.display())))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ImpExpError> {
        let document: FileSourcesDocument = serde_json::from_str(content)
            .map_err(|err| ImpExpError::FileSources(err.to_string()))?;
        let sources = match document {
            FileSourcesDocument::List(sources) => sources,
            FileSourcesDocument::Wrapped { file_sources } => file_sources,
        };
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[FileSourceConfig] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_list_and_wrapped_documents() {
        let list = FileSources::from_json(r#"[{"id": "ftp", "type": "gxftp", "root": "/ftp"}]"#)
            .unwrap();
        assert_eq!(list.sources().len(), 1);
        assert_eq!(
            list.sources()[0].properties.get("root"),
            Some(&Value::String("/ftp".to_string()))
        );

        let wrapped =
            FileSources::from_json(r#"{"file_sources": [{"id": "s3", "type": "s3fs"}]}"#).unwrap();
        assert_eq!(wrapped.sources()[0].id, "s3");
        assert_eq!(wrapped.sources()[0].source_type, "s3fs");
    }
}
