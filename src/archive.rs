use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::info;
use xz2::read::XzDecoder;

use crate::error::ImpExpError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";
const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

fn open_file(path: &Path) -> Result<File, ImpExpError> {
    File::open(path)
        .map_err(|err| ImpExpError::Filesystem(format!("open {}: {err}", path.display())))
}

fn read_magic(path: &Path) -> Result<Vec<u8>, ImpExpError> {
    let mut magic = Vec::with_capacity(XZ_MAGIC.len());
    open_file(path)?
        .take(XZ_MAGIC.len() as u64)
        .read_to_end(&mut magic)
        .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
    Ok(magic)
}

pub fn is_gzip_file(path: &Path) -> Result<bool, ImpExpError> {
    Ok(read_magic(path)?.starts_with(&GZIP_MAGIC))
}

/// Plain, gzip, bzip2 and xz tarballs all count as tar archives.
pub fn is_tar_file(path: &Path) -> Result<bool, ImpExpError> {
    let magic = read_magic(path)?;
    let file = open_file(path)?;
    let reader: Box<dyn Read> = if magic.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(file))
    } else if magic.starts_with(&BZIP2_MAGIC) {
        Box::new(BzDecoder::new(file))
    } else if magic.starts_with(&XZ_MAGIC) {
        Box::new(XzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);
    let mut entries = match archive.entries() {
        Ok(entries) => entries,
        Err(_) => return Ok(false),
    };
    Ok(matches!(entries.next(), Some(Ok(_))))
}

pub fn package_export_store(
    store_dir: &Path,
    dest: &Path,
    compressed: bool,
) -> Result<(), ImpExpError> {
    if !store_dir.is_dir() {
        return Err(ImpExpError::Filesystem(format!(
            "export store {} is not a directory",
            store_dir.display()
        )));
    }
    let parent = dest
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("history-export")
        .tempfile_in(parent)
        .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;

    let packed = if compressed {
        append_store(GzEncoder::new(temp.as_file(), Compression::default()), store_dir)
            .and_then(|encoder| encoder.finish().map(|_| ()))
    } else {
        append_store(temp.as_file(), store_dir).map(|_| ())
    };
    packed.map_err(|err| {
        ImpExpError::Filesystem(format!("package {}: {err}", store_dir.display()))
    })?;

    temp.persist(dest)
        .map_err(|err| ImpExpError::Filesystem(err.to_string()))?;
    info!(
        store = %store_dir.display(),
        archive = %dest.display(),
        compressed,
        "history export packaged"
    );
    Ok(())
}

fn append_store<W: Write>(writer: W, store_dir: &Path) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(true);
    builder.append_dir_all(".", store_dir)?;
    builder.into_inner()
}
