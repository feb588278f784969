use std::fs;
use std::io::{self, Read};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::archive::{is_gzip_file, is_tar_file};
use crate::domain::url_basename;
use crate::error::ImpExpError;
use crate::model_store::DATASETS_DIR;

/// Largest payload the fetcher accepts (100 GiB).
pub const MAX_SIZE: u64 = 100 * (1 << 30);

// TODO: take the user agent from the system initiating the transfer instead of fixing it here.
pub const UPLOAD_USER_AGENT: &str = "data.bioplatforms.com - galaxy/api/histories - bioblend/0.13.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArgs {
    pub url_or_path: String,
    pub dest_dir: String,
    pub token_name: String,
    pub token_key: String,
}

impl DownloadArgs {
    pub fn decode_base64(self) -> Result<Self, ImpExpError> {
        Ok(Self {
            url_or_path: decode_b64(&self.url_or_path)?,
            dest_dir: decode_b64(&self.dest_dir)?,
            token_name: decode_b64(&self.token_name)?,
            token_key: decode_b64(&self.token_key)?,
        })
    }

    fn is_complete(&self) -> bool {
        !self.url_or_path.is_empty()
            && !self.dest_dir.is_empty()
            && !self.token_name.is_empty()
            && !self.token_key.is_empty()
    }
}

fn decode_b64(value: &str) -> Result<String, ImpExpError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|err| ImpExpError::InvalidEncoding(format!("{value}: {err}")))?;
    String::from_utf8(bytes).map_err(|err| ImpExpError::InvalidEncoding(err.to_string()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceFlags {
    pub is_url: bool,
    pub is_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Placed(Utf8PathBuf),
    Deferred { gzip: bool, tar: bool },
    NotRequested,
}

pub trait UrlFetcher {
    fn stream_url_to_file_with_token(
        &self,
        url: &str,
        token_name: &str,
        token_key: &str,
        user_agent: &str,
    ) -> Result<NamedTempFile, ImpExpError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ImpExpError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ImpExpError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl UrlFetcher for HttpFetcher {
    fn stream_url_to_file_with_token(
        &self,
        url: &str,
        token_name: &str,
        token_key: &str,
        user_agent: &str,
    ) -> Result<NamedTempFile, ImpExpError> {
        let header_name = HeaderName::from_bytes(token_name.as_bytes())
            .map_err(|err| ImpExpError::Http(format!("token name: {err}")))?;
        let header_value = HeaderValue::from_str(token_key)
            .map_err(|err| ImpExpError::Http(format!("token key: {err}")))?;
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|err| ImpExpError::Http(format!("user agent: {err}")))?;

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(header_name, header_value)
            .send()
            .map_err(|err| ImpExpError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download request failed".to_string());
            return Err(ImpExpError::HttpStatus { status, message });
        }
        if let Some(length) = response.content_length()
            && length > MAX_SIZE
        {
            return Err(ImpExpError::TooLarge { max: MAX_SIZE });
        }

        let mut temp = tempfile::Builder::new()
            .prefix("upload-file-to-history")
            .tempfile()
            .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        let copied = io::copy(&mut response.take(MAX_SIZE + 1), temp.as_file_mut())
            .map_err(|err| ImpExpError::Http(err.to_string()))?;
        if copied > MAX_SIZE {
            return Err(ImpExpError::TooLarge { max: MAX_SIZE });
        }
        debug!(url, bytes = copied, "download streamed");
        Ok(temp)
    }
}

pub struct Downloader<F: UrlFetcher> {
    fetcher: F,
}

impl<F: UrlFetcher> Downloader<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn run(
        &self,
        args: &DownloadArgs,
        flags: SourceFlags,
    ) -> Result<DownloadOutcome, ImpExpError> {
        if !flags.is_url || !args.is_complete() {
            debug!(
                is_url = flags.is_url,
                is_file = flags.is_file,
                "nothing to download"
            );
            return Ok(DownloadOutcome::NotRequested);
        }

        let downloaded = self.fetcher.stream_url_to_file_with_token(
            &args.url_or_path,
            &args.token_name,
            &args.token_key,
            UPLOAD_USER_AGENT,
        )?;
        let gzip = is_gzip_file(downloaded.path())?;
        let tar = is_tar_file(downloaded.path())?;
        if gzip || tar {
            info!(url = %args.url_or_path, gzip, tar, "archive payload left for import stage");
            return Ok(DownloadOutcome::Deferred { gzip, tar });
        }

        let datasets_dir = Utf8Path::new(&args.dest_dir).join(DATASETS_DIR);
        if !datasets_dir.as_std_path().exists() {
            fs::create_dir_all(datasets_dir.as_std_path())
                .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
        }
        let target = datasets_dir.join(url_basename(&args.url_or_path));
        fs::copy(downloaded.path(), target.as_std_path())
            .map_err(|err| ImpExpError::Filesystem(format!("copy to {target}: {err}")))?;
        info!(url = %args.url_or_path, path = %target, "file placed");
        Ok(DownloadOutcome::Placed(target))
    }
}
