//! Payload location inside update archives
//!
//! An A/B update archive is a zip file carrying two entries the applying
//! service needs:
//!
//! - the payload binary, which must be *stored* (no compression) so the
//!   service can read it straight out of the archive at a byte offset
//! - the payload properties, one `key=value` header per line
//!
//! [`PayloadLocator::locate`] turns an archive into a [`PayloadDescriptor`]
//! or fails as a whole with `Error::LocateFailed`.

use anyhow::{Context, bail};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use zip::{CompressionMethod, ZipArchive};

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};

/// Where the payload lives in an archive and how to validate it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDescriptor {
    /// Byte position of the first payload byte within the archive file
    pub offset: u64,
    /// Length of the payload entry in bytes
    pub size: u64,
    /// Header lines, in file order
    pub headers: Vec<String>,
}

/// Extracts payload layout information from update archives
#[derive(Debug, Clone)]
pub struct PayloadLocator {
    payload_path: String,
    properties_path: String,
}

impl PayloadLocator {
    /// Create a locator for the given archive layout
    pub fn new(layout: &ArchiveConfig) -> Self {
        Self {
            payload_path: layout.payload_path.clone(),
            properties_path: layout.properties_path.clone(),
        }
    }

    /// Locate the payload and read the header properties of `archive`
    ///
    /// This does blocking file I/O; call it from a blocking context.
    pub fn locate(&self, archive: &Path) -> Result<PayloadDescriptor> {
        self.read_descriptor(archive)
            .map_err(|e| Error::locate_failed(archive, format!("{:#}", e)))
    }

    fn read_descriptor(&self, archive: &Path) -> anyhow::Result<PayloadDescriptor> {
        let file = File::open(archive).context("cannot open archive")?;
        let mut zip = ZipArchive::new(BufReader::new(file)).context("not a valid zip archive")?;

        let (offset, size) = {
            let entry = zip
                .by_name(&self.payload_path)
                .with_context(|| format!("missing entry {}", self.payload_path))?;
            if entry.compression() != CompressionMethod::Stored {
                bail!(
                    "entry {} is compressed ({:?}), it must be stored",
                    self.payload_path,
                    entry.compression()
                );
            }
            (entry.data_start(), entry.size())
        };

        let entry = zip
            .by_name(&self.properties_path)
            .with_context(|| format!("missing entry {}", self.properties_path))?;
        let headers = BufReader::new(entry)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("cannot read entry {}", self.properties_path))?;

        Ok(PayloadDescriptor {
            offset,
            size,
            headers,
        })
    }
}

impl Default for PayloadLocator {
    fn default() -> Self {
        Self::new(&ArchiveConfig::default())
    }
}
