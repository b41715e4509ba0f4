//! Result collection for finished conversions
//!
//! Finished buffers go either straight to disk one file at a time, or into an
//! in-memory zip that is written out once the batch is over.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Name of the combined archive
pub const ARCHIVE_NAME: &str = "converted.zip";

/// Receives finished output buffers
pub trait ResultSink {
    /// Take one finished file
    fn accept(&mut self, name: &str, data: Vec<u8>) -> Result<(), String>;

    /// Called once after the last job; returns the archive path if one was made
    fn finish(&mut self) -> Result<Option<PathBuf>, String>;
}

/// Saves every output as its own file in a directory
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    /// Create the sink, creating `dir` if needed
    pub fn new(dir: &Path) -> Result<Self, String> {
        fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create output directory: {}", e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            written: Vec::new(),
        })
    }

    #[cfg(test)]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ResultSink for DirectorySink {
    fn accept(&mut self, name: &str, data: Vec<u8>) -> Result<(), String> {
        let path = self.dir.join(name);
        fs::write(&path, data).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        log::info!("Saved {}", path.display());
        self.written.push(path);
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, String> {
        log::info!("Saved {} files to {}", self.written.len(), self.dir.display());
        Ok(None)
    }
}

/// Collects outputs into a zip archive in memory
pub struct ArchiveSink {
    path: PathBuf,
    writer: Option<ZipWriter<Cursor<Vec<u8>>>>,
    entries: usize,
}

impl ArchiveSink {
    /// The archive will be written to `path` by `finish`
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Some(ZipWriter::new(Cursor::new(Vec::new()))),
            entries: 0,
        }
    }

    /// Archive at `dir/converted.zip`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(ARCHIVE_NAME))
    }

    #[cfg(test)]
    pub fn entries(&self) -> usize {
        self.entries
    }
}

impl ResultSink for ArchiveSink {
    fn accept(&mut self, name: &str, data: Vec<u8>) -> Result<(), String> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| "Archive already finished".to_string())?;

        // MP3 data does not compress; store it as-is
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer
            .start_file(name, options)
            .map_err(|e| format!("Failed to add {} to archive: {}", name, e))?;
        writer
            .write_all(&data)
            .map_err(|e| format!("Failed to add {} to archive: {}", name, e))?;

        self.entries += 1;
        log::debug!("Added {} to archive ({} entries)", name, self.entries);
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, String> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| "Archive already finished".to_string())?;

        let bytes = writer
            .finish()
            .map_err(|e| format!("Failed to generate archive: {}", e))?
            .into_inner();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create archive directory: {}", e))?;
        }

        fs::write(&self.path, bytes)
            .map_err(|e| format!("Failed to write {}: {}", self.path.display(), e))?;

        log::info!("Archive ready: {} ({} files)", self.path.display(), self.entries);
        Ok(Some(self.path.clone()))
    }
}
