use assert_matches::assert_matches;

use history_imp_exp::domain::{ArchiveType, HistoryId, JobId, url_basename};
use history_imp_exp::error::ImpExpError;

#[test]
fn parse_archive_type() {
    assert_eq!("url".parse::<ArchiveType>().unwrap(), ArchiveType::Url);
    assert_eq!("File".parse::<ArchiveType>().unwrap(), ArchiveType::File);
    let err = "ftp".parse::<ArchiveType>().unwrap_err();
    assert_matches!(err, ImpExpError::InvalidArchiveType(_));
}

#[test]
fn parse_ids() {
    let job: JobId = " 42 ".parse().unwrap();
    assert_eq!(job.get(), 42);
    let history: HistoryId = "7".parse().unwrap();
    assert_eq!(history.to_string(), "7");
    let err = "abc".parse::<JobId>().unwrap_err();
    assert_matches!(err, ImpExpError::InvalidId(_));
}

#[test]
fn basename_keeps_query_string() {
    assert_eq!(url_basename("https://host/a/b/reads.fq.gz"), "reads.fq.gz");
    assert_eq!(url_basename("https://host/file?id=3"), "file?id=3");
}
