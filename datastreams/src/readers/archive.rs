use async_stream::stream;
use bytes::Bytes;
use flate2::read::GzDecoder;
use regex::Regex;
use serde::Deserialize;
use std::io::{Cursor, Read};
use zip::ZipArchive;

use crate::error::{ErrorKind, EtlResult};
use crate::readers::base::{Reader, ReaderCapabilities, ReaderStream, load_blob};
use crate::types::{Blob, Payload};
use crate::{bail, etl_error};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Returns `true` when `data` starts with the gzip magic bytes.
pub(crate) fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

pub(crate) fn gunzip(name: &str, data: &[u8]) -> EtlResult<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|err| {
            etl_error!(
                ErrorKind::ArchiveError,
                "Could not decompress gzip data",
                format!("{name}: {err}")
            )
        })?;

    Ok(decoded)
}

fn compile_regex(reader: &'static str, regex: Option<&str>) -> EtlResult<Option<Regex>> {
    regex
        .map(|pattern| {
            Regex::new(pattern).map_err(|err| {
                etl_error!(
                    ErrorKind::InvalidComponentArgs,
                    "Invalid member name regex",
                    format!("{reader}: {err}")
                )
            })
        })
        .transpose()
}

fn member_matches(regex: Option<&Regex>, name: &str) -> bool {
    regex.is_none_or(|regex| regex.is_match(name))
}

/// Arguments shared by the archive readers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveReaderArgs {
    #[serde(default)]
    pub origin: Option<String>,
    /// Only members whose name matches this expression are yielded.
    #[serde(default)]
    pub regex: Option<String>,
}

/// Yields one blob per file member of a ZIP archive.
#[derive(Debug, Clone)]
pub struct ZipReader {
    origin: Option<String>,
    regex: Option<Regex>,
}

impl ZipReader {
    pub const NAME: &'static str = "ZipReader";

    pub fn new(args: ArchiveReaderArgs) -> EtlResult<Self> {
        Ok(Self {
            regex: compile_regex(Self::NAME, args.regex.as_deref())?,
            origin: args.origin,
        })
    }
}

fn read_zip_member(
    archive: &mut ZipArchive<Cursor<Bytes>>,
    index: usize,
    regex: Option<&Regex>,
) -> EtlResult<Option<Blob>> {
    let mut file = archive.by_index(index)?;
    if file.is_dir() || !member_matches(regex, file.name()) {
        return Ok(None);
    }

    let name = file.name().to_string();
    // The declared size comes from the archive and is not trusted for allocation.
    let mut data = Vec::new();
    file.read_to_end(&mut data).map_err(|err| {
        etl_error!(
            ErrorKind::ArchiveError,
            "Could not extract archive member",
            format!("{name}: {err}")
        )
    })?;

    Ok(Some(Blob::named(name, data)))
}

impl Reader for ZipReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::ROOT_AND_CHAIN
    }

    fn read(&self, item: Option<Payload>) -> ReaderStream {
        let origin = self.origin.clone();
        let regex = self.regex.clone();

        Box::pin(stream! {
            let blob = match load_blob(Self::NAME, origin, item).await {
                Ok(blob) => blob,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let source = blob.display_name().to_string();
            let mut archive = match ZipArchive::new(Cursor::new(blob.data)) {
                Ok(archive) => archive,
                Err(err) => {
                    yield Err(etl_error!(
                        ErrorKind::ArchiveError,
                        "Could not open ZIP archive",
                        format!("{source}: {err}")
                    ));
                    return;
                }
            };

            // A member that cannot be extracted is reported and the next ones are still read.
            for index in 0..archive.len() {
                match read_zip_member(&mut archive, index, regex.as_ref()) {
                    Ok(Some(member)) => yield Ok(Payload::Bytes(member)),
                    Ok(None) => {}
                    Err(err) => yield Err(err),
                }
            }
        })
    }
}

/// How a tar archive is compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TarMode {
    #[default]
    #[serde(rename = "r|gz", alias = "r:gz")]
    Gzip,
    #[serde(rename = "r", alias = "r|")]
    Plain,
    /// Detects gzip from the magic bytes.
    #[serde(rename = "auto", alias = "r:*", alias = "r|*")]
    Auto,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TarReaderArgs {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub mode: TarMode,
}

/// Yields one blob per regular file of a (possibly gzipped) tar archive.
#[derive(Debug, Clone)]
pub struct TarReader {
    origin: Option<String>,
    regex: Option<Regex>,
    mode: TarMode,
}

impl TarReader {
    pub const NAME: &'static str = "TarReader";

    pub fn new(args: TarReaderArgs) -> EtlResult<Self> {
        Ok(Self {
            regex: compile_regex(Self::NAME, args.regex.as_deref())?,
            origin: args.origin,
            mode: args.mode,
        })
    }
}

/// Extracts the matching members in archive order.
///
/// A member whose data cannot be read is reported in place. A broken header ends the extraction,
/// since later members cannot be located.
fn extract_tar(blob: Blob, mode: TarMode, regex: Option<Regex>) -> EtlResult<Vec<EtlResult<Blob>>> {
    let source = blob.display_name().to_string();
    let archive_err = |err: std::io::Error| {
        etl_error!(
            ErrorKind::ArchiveError,
            "Could not read tar archive",
            format!("{source}: {err}")
        )
    };

    let gzipped = match mode {
        TarMode::Gzip => true,
        TarMode::Plain => false,
        TarMode::Auto => is_gzip(&blob.data),
    };
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(Cursor::new(blob.data)))
    } else {
        Box::new(Cursor::new(blob.data))
    };

    let mut archive = tar::Archive::new(reader);
    let mut members = Vec::new();
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                members.push(Err(archive_err(err)));
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = match entry.path() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(err) => {
                members.push(Err(archive_err(err)));
                continue;
            }
        };
        if !member_matches(regex.as_ref(), &name) {
            continue;
        }

        // The header size is not trusted for allocation.
        let mut data = Vec::new();
        match entry.read_to_end(&mut data) {
            Ok(_) => members.push(Ok(Blob::named(name, data))),
            Err(err) => members.push(Err(etl_error!(
                ErrorKind::ArchiveError,
                "Could not extract archive member",
                format!("{name}: {err}")
            ))),
        }
    }

    Ok(members)
}

impl Reader for TarReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::ROOT_AND_CHAIN
    }

    fn read(&self, item: Option<Payload>) -> ReaderStream {
        let origin = self.origin.clone();
        let regex = self.regex.clone();
        let mode = self.mode;

        Box::pin(stream! {
            let blob = match load_blob(Self::NAME, origin, item).await {
                Ok(blob) => blob,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            // The tar decoder is blocking and its entry iterator is not `Send`.
            let members = tokio::task::spawn_blocking(move || extract_tar(blob, mode, regex))
                .await
                .map_err(|err| etl_error!(ErrorKind::InvalidState, "Tar extraction task failed", err))
                .and_then(|members| members);

            match members {
                Ok(members) => {
                    for member in members {
                        yield member.map(Payload::Bytes);
                    }
                }
                Err(err) => yield Err(err),
            }
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GzReaderArgs {
    #[serde(default)]
    pub origin: Option<String>,
}

/// Decompresses one gzip blob.
#[derive(Debug, Clone)]
pub struct GzReader {
    origin: Option<String>,
}

impl GzReader {
    pub const NAME: &'static str = "GzReader";

    pub fn new(args: GzReaderArgs) -> Self {
        Self {
            origin: args.origin,
        }
    }
}

fn decompress_blob(blob: Blob) -> EtlResult<Blob> {
    let source = blob.display_name().to_string();
    if !is_gzip(&blob.data) {
        bail!(ErrorKind::ArchiveError, "Data is not gzip compressed", source);
    }

    let data = gunzip(&source, &blob.data)?;
    let name = blob
        .name
        .map(|name| name.strip_suffix(".gz").map(str::to_string).unwrap_or(name));

    Ok(Blob {
        name,
        data: data.into(),
    })
}

impl Reader for GzReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::ROOT_AND_CHAIN
    }

    fn read(&self, item: Option<Payload>) -> ReaderStream {
        let origin = self.origin.clone();

        Box::pin(stream! {
            let decoded = load_blob(Self::NAME, origin, item)
                .await
                .and_then(decompress_blob);

            yield decoded.map(Payload::Bytes);
        })
    }
}
