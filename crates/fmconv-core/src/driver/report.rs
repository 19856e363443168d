//! The aggregate marker report of a conversion run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ConverterError, Result};
use crate::markers::{ConversionMarkers, Marker};

/// Reserved name of the report file, placed in the destination root.
pub const MARKERS_FILE_NAME: &str = "__conversion-markers.txt";

/// Writer of the report file. The file is only created when the first marker
/// arrives, so runs without markers leave no report behind.
#[derive(Debug)]
pub(crate) struct MarkerReport {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: usize,
}

impl MarkerReport {
    pub(crate) fn new(destination_directory: &Path) -> Self {
        Self {
            path: destination_directory.join(MARKERS_FILE_NAME),
            writer: None,
            written: 0,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the markers of one file. Source markers refer to `source_file`,
    /// destination markers to `destination_file` (or the source if nothing
    /// was written).
    pub(crate) fn write_markers(
        &mut self,
        source_file: &Path,
        destination_file: Option<&Path>,
        markers: &ConversionMarkers,
    ) -> Result<()> {
        let destination_file = destination_file.unwrap_or(source_file);
        let lines = markers
            .source_markers()
            .iter()
            .map(|marker| (source_file, marker))
            .chain(
                markers
                    .destination_markers()
                    .iter()
                    .map(|marker| (destination_file, marker)),
            );
        for (file, marker) in lines {
            let line = format_marker(file, marker);
            self.writer()?
                .write_all(line.as_bytes())
                .map_err(|e| ConverterError::io("write", &self.path, e))?;
            self.written += 1;
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            let file =
                File::create(&self.path).map_err(|e| ConverterError::io("create", &self.path, e))?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| ConverterError::IllegalState("Marker report writer is missing".into()))
    }

    /// Flushes the report; returns the number of markers written.
    pub(crate) fn finish(mut self) -> Result<usize> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| ConverterError::io("write", &self.path, e))?;
        }
        Ok(self.written)
    }
}

/// One report line: `[KIND] <path>:<row>:<column> <message>`. Continuation
/// lines of multi-line messages are indented with a tab.
pub fn format_marker(file: &Path, marker: &Marker) -> String {
    let mut line = format!(
        "[{}] {}:{}:{} ",
        marker.kind(),
        file.display(),
        marker.row(),
        marker.column()
    );
    let mut chars = marker.message().chars().peekable();
    while let Some(c) = chars.next() {
        line.push(c);
        match c {
            '\n' => line.push('\t'),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    line.push('\n');
                    chars.next();
                }
                line.push('\t');
            }
            _ => {}
        }
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::MarkerKind;

    fn marker(message: &str) -> Marker {
        let mut markers = ConversionMarkers::new();
        markers
            .mark_in_source(12, 5, MarkerKind::Warn, message)
            .unwrap();
        markers.source_markers()[0].clone()
    }

    #[test]
    fn test_format_marker() {
        assert_eq!(
            format_marker(Path::new("/t/a.ftl"), &marker("message text")),
            "[WARN] /t/a.ftl:12:5 message text\n"
        );
    }

    #[test]
    fn test_format_multiline_marker() {
        assert_eq!(
            format_marker(Path::new("a.ftl"), &marker("one\ntwo\r\nthree\rfour")),
            "[WARN] a.ftl:12:5 one\n\ttwo\r\n\tthree\r\tfour\n"
        );
    }
}
