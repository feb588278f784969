use std::cell::RefCell;
use std::io::Write;
use std::path::Path;

use assert_matches::assert_matches;
use bzip2::write::BzEncoder;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use xz2::write::XzEncoder;

use history_imp_exp::download::{
    DownloadArgs, DownloadOutcome, Downloader, SourceFlags, UPLOAD_USER_AGENT, UrlFetcher,
};
use history_imp_exp::error::ImpExpError;

struct StaticFetcher {
    payload: Vec<u8>,
    calls: RefCell<Vec<(String, String, String, String)>>,
}

impl StaticFetcher {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl UrlFetcher for StaticFetcher {
    fn stream_url_to_file_with_token(
        &self,
        url: &str,
        token_name: &str,
        token_key: &str,
        user_agent: &str,
    ) -> Result<NamedTempFile, ImpExpError> {
        self.calls.borrow_mut().push((
            url.to_string(),
            token_name.to_string(),
            token_key.to_string(),
            user_agent.to_string(),
        ));
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&self.payload).unwrap();
        temp.flush().unwrap();
        Ok(temp)
    }
}

fn args(dest: &Utf8PathBuf) -> DownloadArgs {
    DownloadArgs {
        url_or_path: "http://example/data.csv".to_string(),
        dest_dir: dest.to_string(),
        token_name: "X-Api-Key".to_string(),
        token_key: "secret".to_string(),
    }
}

fn url_flags() -> SourceFlags {
    SourceFlags {
        is_url: true,
        is_file: false,
    }
}

fn dest_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dest = Utf8PathBuf::from_path_buf(temp.path().join("job_working")).unwrap();
    (temp, dest)
}

#[test]
fn plain_payload_is_copied_into_datasets() {
    let (_temp, dest) = dest_dir();
    let fetcher = StaticFetcher::new(b"sample,value\nS1,0.5\n".to_vec());
    let downloader = Downloader::new(fetcher);

    let outcome = downloader.run(&args(&dest), url_flags()).unwrap();

    let expected = dest.join("datasets").join("data.csv");
    assert_eq!(outcome, DownloadOutcome::Placed(expected.clone()));
    assert_eq!(
        std::fs::read_to_string(expected.as_std_path()).unwrap(),
        "sample,value\nS1,0.5\n"
    );
}

#[test]
fn fetch_uses_token_pair_and_fixed_user_agent() {
    let (_temp, dest) = dest_dir();
    let fetcher = StaticFetcher::new(b"x".to_vec());
    let downloader = Downloader::new(fetcher);
    downloader.run(&args(&dest), url_flags()).unwrap();

    let downloader_calls = downloader_calls(&downloader);
    assert_eq!(
        downloader_calls,
        vec![(
            "http://example/data.csv".to_string(),
            "X-Api-Key".to_string(),
            "secret".to_string(),
            UPLOAD_USER_AGENT.to_string(),
        )]
    );
}

fn downloader_calls(downloader: &Downloader<StaticFetcher>) -> Vec<(String, String, String, String)> {
    downloader.fetcher().calls.borrow().clone()
}

#[test]
fn gzip_payload_is_deferred() {
    let (_temp, dest) = dest_dir();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"compressed").unwrap();
    let downloader = Downloader::new(StaticFetcher::new(encoder.finish().unwrap()));

    let outcome = downloader.run(&args(&dest), url_flags()).unwrap();

    assert_matches!(outcome, DownloadOutcome::Deferred { gzip: true, .. });
    assert!(!dest.join("datasets").as_std_path().exists());
}

fn tar_bytes(dir: &Path) -> Vec<u8> {
    let member = dir.join("member.txt");
    std::fs::write(&member, "inside").unwrap();
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_path_with_name(&member, "member.txt").unwrap();
    builder.into_inner().unwrap()
}

#[test]
fn tar_payload_is_deferred() {
    let (temp, dest) = dest_dir();
    let downloader = Downloader::new(StaticFetcher::new(tar_bytes(temp.path())));

    let outcome = downloader.run(&args(&dest), url_flags()).unwrap();

    assert_eq!(
        outcome,
        DownloadOutcome::Deferred {
            gzip: false,
            tar: true
        }
    );
    assert!(!dest.join("datasets").as_std_path().exists());
}

#[test]
fn gzipped_tar_payload_is_deferred_as_both() {
    let (temp, dest) = dest_dir();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes(temp.path())).unwrap();
    let downloader = Downloader::new(StaticFetcher::new(encoder.finish().unwrap()));

    let outcome = downloader.run(&args(&dest), url_flags()).unwrap();

    assert_eq!(
        outcome,
        DownloadOutcome::Deferred {
            gzip: true,
            tar: true
        }
    );
}

#[test]
fn bzip2_tar_payload_is_deferred() {
    let (temp, dest) = dest_dir();
    let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(&tar_bytes(temp.path())).unwrap();
    let downloader = Downloader::new(StaticFetcher::new(encoder.finish().unwrap()));

    let outcome = downloader.run(&args(&dest), url_flags()).unwrap();

    assert_eq!(
        outcome,
        DownloadOutcome::Deferred {
            gzip: false,
            tar: true
        }
    );
    assert!(!dest.join("datasets").as_std_path().exists());
}

#[test]
fn xz_tar_payload_is_deferred() {
    let (temp, dest) = dest_dir();
    let mut encoder = XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&tar_bytes(temp.path())).unwrap();
    let downloader = Downloader::new(StaticFetcher::new(encoder.finish().unwrap()));

    let outcome = downloader.run(&args(&dest), url_flags()).unwrap();

    assert_eq!(
        outcome,
        DownloadOutcome::Deferred {
            gzip: false,
            tar: true
        }
    );
    assert!(!dest.join("datasets").as_std_path().exists());
}

#[test]
fn file_sources_and_incomplete_args_do_nothing() {
    let (_temp, dest) = dest_dir();
    let downloader = Downloader::new(StaticFetcher::new(b"x".to_vec()));

    let file_flags = SourceFlags {
        is_url: false,
        is_file: true,
    };
    assert_eq!(
        downloader.run(&args(&dest), file_flags).unwrap(),
        DownloadOutcome::NotRequested
    );

    let mut missing_token = args(&dest);
    missing_token.token_key.clear();
    assert_eq!(
        downloader.run(&missing_token, url_flags()).unwrap(),
        DownloadOutcome::NotRequested
    );

    assert!(downloader_calls(&downloader).is_empty());
    assert!(!dest.as_std_path().exists());
}
