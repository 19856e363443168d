/*!
# Conversion Driver

Walks a source file or directory tree and hands every selected file to a
[`FileConverter`], mirroring the directory structure under the destination
directory. Markers of all files are collected into a single report file,
[`MARKERS_FILE_NAME`], in the destination root.

```no_run
use fmconv_core::{Driver, Fm2ToFm3Converter};

let summary = Driver::new(Fm2ToFm3Converter::new())
    .source("templates")
    .destination_directory("converted")
    .create_destination_directory(true)
    .execute()?;
println!("Converted {} file(s)", summary.converted);
# Ok::<(), fmconv_core::ConverterError>(())
```
*/

mod context;
mod report;

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{ConverterError, Result};

pub use context::FileConversionContext;
pub use report::{format_marker, MARKERS_FILE_NAME};

use context::DirectoryCache;
use report::MarkerReport;

pub const SOURCE_PROPERTY: &str = "source";
pub const DESTINATION_DIRECTORY_PROPERTY: &str = "destinationDirectory";
pub const INCLUDE_PROPERTY: &str = "include";
pub const EXCLUDE_PROPERTY: &str = "exclude";

/// What happened to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Converted,
    /// The file was left out, with a marker telling why
    Skipped,
}

/// Converts the content of one file. Implementations must set the
/// destination file name on the context before writing to it.
pub trait FileConverter {
    /// Files to convert when the driver has no explicit include pattern.
    fn default_include(&self) -> Option<Regex> {
        None
    }

    fn convert_file(&mut self, ctx: &mut FileConversionContext<'_>) -> Result<FileOutcome>;
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub converted: usize,
    pub skipped: usize,
    /// Entries written to the marker report
    pub markers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    NotStarted,
    Running,
    Done,
    Failed,
}

/// Runs a [`FileConverter`] over a file tree. A driver can be executed once.
pub struct Driver<C: FileConverter> {
    converter: C,
    source: Option<PathBuf>,
    destination_directory: Option<PathBuf>,
    create_destination_directory: bool,
    include: Option<Regex>,
    include_set: bool,
    exclude: Option<Regex>,
    state: DriverState,
}

/// State of a run, created by the preparation step.
struct Run {
    source: PathBuf,
    destination: PathBuf,
    include: Option<Regex>,
    exclude: Option<Regex>,
    directories: DirectoryCache,
    report: MarkerReport,
    summary: ConversionSummary,
}

impl<C: FileConverter> Driver<C> {
    pub fn new(converter: C) -> Self {
        Self {
            converter,
            source: None,
            destination_directory: None,
            create_destination_directory: false,
            include: None,
            include_set: false,
            exclude: None,
            state: DriverState::NotStarted,
        }
    }

    /// Source file or directory
    pub fn source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn destination_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.destination_directory = Some(directory.into());
        self
    }

    /// Create the destination directory if it doesn't exist yet
    pub fn create_destination_directory(mut self, create: bool) -> Self {
        self.create_destination_directory = create;
        self
    }

    /// Only convert files whose slash separated path, relative to the source
    /// directory, matches this pattern entirely. `None` converts everything;
    /// if never set, the converter's default applies.
    pub fn include(mut self, include: Option<Regex>) -> Self {
        self.include = include;
        self.include_set = true;
        self
    }

    /// Skip files whose relative path matches this pattern entirely.
    pub fn exclude(mut self, exclude: Option<Regex>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn include_pattern(self, pattern: &str) -> Result<Self> {
        let include = compile_pattern(INCLUDE_PROPERTY, pattern)?;
        Ok(self.include(Some(include)))
    }

    pub fn exclude_pattern(self, pattern: &str) -> Result<Self> {
        let exclude = compile_pattern(EXCLUDE_PROPERTY, pattern)?;
        Ok(self.exclude(Some(exclude)))
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    /// Runs the conversion.
    ///
    /// Files converted before a failure stay on disk.
    pub fn execute(&mut self) -> Result<ConversionSummary> {
        if self.state != DriverState::NotStarted {
            return Err(ConverterError::IllegalState(
                "This converter was already invoked once.".into(),
            ));
        }
        self.state = DriverState::Running;
        let result = self.prepare().and_then(|run| self.run(run));
        self.state = if result.is_ok() {
            DriverState::Done
        } else {
            DriverState::Failed
        };
        result
    }

    fn prepare(&self) -> Result<Run> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| ConverterError::missing_property(SOURCE_PROPERTY))?;
        let destination = self
            .destination_directory
            .clone()
            .ok_or_else(|| ConverterError::missing_property(DESTINATION_DIRECTORY_PROPERTY))?;
        // Markers are reported with absolute paths
        let source = absolute(source)?;
        let destination = absolute(destination)?;

        if !source.exists() {
            return Err(ConverterError::property_validation(
                SOURCE_PROPERTY,
                format!("File or directory doesn't exist: {}", source.display()),
            ));
        }
        if destination.is_file() {
            return Err(ConverterError::property_validation(
                DESTINATION_DIRECTORY_PROPERTY,
                format!(
                    "Destination must be a directory, not a file: {}",
                    destination.display()
                ),
            ));
        }
        if !self.create_destination_directory && !destination.is_dir() {
            return Err(ConverterError::property_validation(
                DESTINATION_DIRECTORY_PROPERTY,
                format!("Directory doesn't exist: {}", destination.display()),
            ));
        }

        let include = if self.include_set {
            self.include.clone()
        } else {
            self.converter.default_include()
        };
        let include = include
            .map(|re| anchor(INCLUDE_PROPERTY, &re))
            .transpose()?;
        let exclude = self
            .exclude
            .as_ref()
            .map(|re| anchor(EXCLUDE_PROPERTY, re))
            .transpose()?;

        let report = MarkerReport::new(&destination);
        if report.path().exists() {
            fs::remove_file(report.path())
                .map_err(|e| ConverterError::io("delete", report.path(), e))?;
        }

        Ok(Run {
            source,
            destination,
            include,
            exclude,
            directories: DirectoryCache::default(),
            report,
            summary: ConversionSummary::default(),
        })
    }

    fn run(&mut self, mut run: Run) -> Result<ConversionSummary> {
        info!(
            source = %run.source.display(),
            destination = %run.destination.display(),
            "Starting conversion"
        );
        let source = run.source.clone();
        let destination = run.destination.clone();
        if source.is_dir() {
            self.process_directory(&mut run, &source, &destination, "")?;
        } else {
            let name = file_name(&source);
            if run.is_included(&name) {
                self.process_file(&mut run, &source, &destination)?;
            }
        }

        let mut summary = run.summary;
        summary.markers = run.report.finish()?;
        info!(
            converted = summary.converted,
            skipped = summary.skipped,
            markers = summary.markers,
            "Conversion finished"
        );
        Ok(summary)
    }

    /// Converts the content of `directory` into `destination`; subdirectories
    /// are mirrored.
    fn process_directory(
        &mut self,
        run: &mut Run,
        directory: &Path,
        destination: &Path,
        relative: &str,
    ) -> Result<()> {
        let mut entries = fs::read_dir(directory)
            .map_err(|e| ConverterError::io("list directory", directory, e))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| ConverterError::io("list directory", directory, e))?;
        entries.sort();

        for path in entries {
            let name = file_name(&path);
            let relative_path = format!("{relative}{name}");
            if path.is_dir() {
                let sub_relative = format!("{relative_path}/");
                self.process_directory(run, &path, &destination.join(&name), &sub_relative)?;
            } else if run.is_included(&relative_path) {
                self.process_file(run, &path, destination)?;
            } else {
                debug!(file = %path.display(), "Not included");
            }
        }
        Ok(())
    }

    fn process_file(&mut self, run: &mut Run, source: &Path, destination: &Path) -> Result<()> {
        let mut ctx =
            FileConversionContext::new(source, destination.to_path_buf(), &mut run.directories);
        let outcome = self.converter.convert_file(&mut ctx);
        let finished = ctx.finish();
        let outcome = outcome.map_err(|e| e.with_file(source))?;
        let (markers, written) = finished.map_err(|e| e.with_file(source))?;

        match outcome {
            FileOutcome::Converted => {
                run.summary.converted += 1;
                debug!(
                    source = %source.display(),
                    destination = %written.as_deref().unwrap_or(destination).display(),
                    "Converted file"
                );
            }
            FileOutcome::Skipped => {
                run.summary.skipped += 1;
                warn!(file = %source.display(), "Skipped file");
            }
        }
        run.report
            .write_markers(source, written.as_deref(), &markers)
    }
}

impl Run {
    fn is_included(&self, relative_path: &str) -> bool {
        // A report left at any depth is never a template
        if relative_path.rsplit('/').next() == Some(MARKERS_FILE_NAME) {
            return false;
        }
        let included = self
            .include
            .as_ref()
            .map_or(true, |re| re.is_match(relative_path));
        let excluded = self
            .exclude
            .as_ref()
            .is_some_and(|re| re.is_match(relative_path));
        included && !excluded
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    std::path::absolute(&path).map_err(|e| ConverterError::io("resolve", &path, e))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn compile_pattern(property: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        ConverterError::property_validation(
            property,
            format!("The value of the \"{property}\" is not a valid regular expression: {e}"),
        )
    })
}

/// Makes `re` match whole strings only.
fn anchor(property: &str, re: &Regex) -> Result<Regex> {
    compile_pattern(property, &format!("^(?:{})$", re.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopConverter;

    impl FileConverter for NoopConverter {
        fn convert_file(&mut self, _ctx: &mut FileConversionContext<'_>) -> Result<FileOutcome> {
            Ok(FileOutcome::Converted)
        }
    }

    #[test]
    fn test_anchor_requires_full_match() {
        let re = anchor(INCLUDE_PROPERTY, &Regex::new(r"a|.*\.ftl").unwrap()).unwrap();
        assert!(re.is_match("a"));
        assert!(re.is_match("x/y.ftl"));
        assert!(!re.is_match("ab"));
        assert!(!re.is_match("y.ftlx"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Driver::new(NoopConverter).include_pattern("(").err().unwrap();
        assert_eq!(err.property_name(), Some(INCLUDE_PROPERTY));
    }

    #[test]
    fn test_missing_properties() {
        let err = Driver::new(NoopConverter).execute().unwrap_err();
        assert!(matches!(err, ConverterError::MissingRequiredProperty { .. }));
        assert_eq!(err.property_name(), Some(SOURCE_PROPERTY));

        let err = Driver::new(NoopConverter).source("x").execute().unwrap_err();
        assert_eq!(err.property_name(), Some(DESTINATION_DIRECTORY_PROPERTY));
    }
}
