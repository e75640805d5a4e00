use anyhow::Context;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const PACKAGE_NAME: &str = "StudentReportCards.zip";

/// Named artifacts waiting to be zipped. A repeated name replaces the earlier bytes
/// in place.
#[derive(Debug, Default)]
pub struct ArchiveAssembler {
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, blob: Vec<u8>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = blob,
            None => self.entries.push((name, blob)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn finalize(self) -> anyhow::Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, blob) in &self.entries {
            zip.start_file(name.as_str(), opts)
                .with_context(|| format!("failed to start entry {}", name))?;
            zip.write_all(blob)
                .with_context(|| format!("failed to write entry {}", name))?;
        }
        let cursor = zip.finish().context("failed to finalize zip package")?;
        Ok(cursor.into_inner())
    }
}

/// Path separators cannot survive as part of a file name.
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// Writes through a temp file so a half-written blob never carries the final name.
pub async fn save_blob(dir: &Path, name: &str, blob: &[u8]) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;
    let file_name = safe_file_name(name);
    let dst = dir.join(&file_name);
    let tmp = dir.join(format!("{}.saving", file_name));
    tokio::fs::write(&tmp, blob)
        .await
        .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))?;
    tokio::fs::rename(&tmp, &dst)
        .await
        .with_context(|| format!("failed to move saved file to {}", dst.to_string_lossy()))?;
    Ok(dst)
}
