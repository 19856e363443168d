//! Per-file state handed to a [`FileConverter`](super::FileConverter).

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{ConverterError, Result};
use crate::markers::ConversionMarkers;

/// Directories already known to exist during a run.
#[derive(Debug, Default)]
pub(crate) struct DirectoryCache {
    known: HashSet<PathBuf>,
}

impl DirectoryCache {
    /// Creates `directory` (and its parents) unless it was seen before.
    pub(crate) fn ensure(&mut self, directory: &Path) -> Result<()> {
        if self.known.contains(directory) {
            return Ok(());
        }
        trace!(directory = %directory.display(), "Checking if directory exists");
        if !directory.is_dir() {
            debug!(directory = %directory.display(), "Creating directory");
            fs::create_dir_all(directory)
                .map_err(|e| ConverterError::io("create directory", directory, e))?;
        }
        self.known.insert(directory.to_path_buf());
        Ok(())
    }
}

/// Everything a file converter needs for one source file: the source, the
/// destination directory, a lazily opened destination file, and the markers.
pub struct FileConversionContext<'a> {
    source_file: &'a Path,
    destination_directory: PathBuf,
    destination_file_name: Option<String>,
    destination: Option<BufWriter<File>>,
    markers: ConversionMarkers,
    directories: &'a mut DirectoryCache,
}

impl<'a> FileConversionContext<'a> {
    pub(crate) fn new(
        source_file: &'a Path,
        destination_directory: PathBuf,
        directories: &'a mut DirectoryCache,
    ) -> Self {
        Self {
            source_file,
            destination_directory,
            destination_file_name: None,
            destination: None,
            markers: ConversionMarkers::new(),
            directories,
        }
    }

    pub fn source_file(&self) -> &Path {
        self.source_file
    }

    /// Name of the source file without its directory.
    pub fn source_file_name(&self) -> String {
        self.source_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Reads the whole source file.
    pub fn read_source(&self) -> Result<Vec<u8>> {
        fs::read(self.source_file).map_err(|e| ConverterError::io("read", self.source_file, e))
    }

    pub fn destination_directory(&self) -> &Path {
        &self.destination_directory
    }

    pub fn destination_file_name(&self) -> Option<&str> {
        self.destination_file_name.as_deref()
    }

    /// Sets the destination file name. Can be called only once, and the name
    /// can't contain a directory.
    pub fn set_destination_file_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Some(existing) = &self.destination_file_name {
            return Err(ConverterError::IllegalState(format!(
                "The destination file name was already set to {existing:?}"
            )));
        }
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(ConverterError::InvalidArgument(format!(
                "The destination file name must be a plain file name, got {name:?}"
            )));
        }
        self.destination_file_name = Some(name);
        Ok(())
    }

    /// Full path of the destination file, once its name is known.
    pub fn destination_file(&self) -> Option<PathBuf> {
        self.destination_file_name
            .as_ref()
            .map(|name| self.destination_directory.join(name))
    }

    /// The destination file, created on first use along with its directory.
    pub fn destination_writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.destination.is_none() {
            let path = self.destination_file().ok_or_else(|| {
                ConverterError::IllegalState(
                    "The destination file name must be set before the destination is opened"
                        .into(),
                )
            })?;
            self.directories.ensure(&self.destination_directory)?;
            let file = File::create(&path).map_err(|e| ConverterError::io("create", &path, e))?;
            self.destination = Some(BufWriter::new(file));
        }
        self.destination.as_mut().ok_or_else(|| {
            ConverterError::IllegalState("The destination writer is missing".into())
        })
    }

    pub fn write_destination(&mut self, content: &[u8]) -> Result<()> {
        let path = self.destination_file().unwrap_or_default();
        self.destination_writer()?
            .write_all(content)
            .map_err(|e| ConverterError::io("write", &path, e))
    }

    pub fn markers(&mut self) -> &mut ConversionMarkers {
        &mut self.markers
    }

    /// Flushes and closes the destination; returns the markers and the
    /// destination path if anything was written.
    pub(crate) fn finish(mut self) -> Result<(ConversionMarkers, Option<PathBuf>)> {
        let written = match self.destination.take() {
            Some(mut writer) => {
                let path = self.destination_file();
                if let Some(path) = &path {
                    writer
                        .flush()
                        .map_err(|e| ConverterError::io("write", path, e))?;
                }
                path
            }
            None => None,
        };
        Ok((self.markers, written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_destination_name_is_set_once() {
        let mut cache = DirectoryCache::default();
        let source = PathBuf::from("a.ftl");
        let mut ctx = FileConversionContext::new(&source, PathBuf::from("out"), &mut cache);
        assert!(ctx.destination_file().is_none());
        ctx.set_destination_file_name("a.f3ac").unwrap();
        assert!(matches!(
            ctx.set_destination_file_name("b.f3ac"),
            Err(ConverterError::IllegalState(_))
        ));
        assert_eq!(ctx.destination_file(), Some(PathBuf::from("out/a.f3ac")));
    }

    #[test]
    fn test_destination_name_without_directory() {
        let mut cache = DirectoryCache::default();
        let source = PathBuf::from("a.ftl");
        let mut ctx = FileConversionContext::new(&source, PathBuf::from("out"), &mut cache);
        assert!(matches!(
            ctx.set_destination_file_name("sub/a.f3ac"),
            Err(ConverterError::InvalidArgument(_))
        ));
        assert!(ctx.destination_file_name().is_none());
    }

    #[test]
    fn test_writer_needs_name_and_creates_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let destination = dir.path().join("x").join("y");
        let mut cache = DirectoryCache::default();
        let source = dir.path().join("a.ftl");
        let mut ctx = FileConversionContext::new(&source, destination.clone(), &mut cache);
        assert!(ctx.destination_writer().is_err());

        ctx.set_destination_file_name("a.txt")?;
        ctx.write_destination(b"hello")?;
        let (markers, written) = ctx.finish()?;
        assert!(markers.is_empty());
        assert_eq!(written, Some(destination.join("a.txt")));
        assert_eq!(fs::read_to_string(destination.join("a.txt"))?, "hello");
        Ok(())
    }
}
