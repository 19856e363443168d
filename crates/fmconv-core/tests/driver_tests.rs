//! Driver behavior with a trivial upper-casing converter

use std::fs;
use std::path::{Path, PathBuf};

use fmconv_core::{
    ConverterError, Driver, FileConversionContext, FileConverter, FileOutcome, MarkerKind,
    MARKERS_FILE_NAME,
};
use pretty_assertions::assert_eq;
use regex::Regex;
use tempfile::TempDir;

/// Writes the upper-cased source to `<name>.uc`. Sources containing "warn"
/// get a source marker, sources containing "fail" fail the conversion.
#[derive(Default)]
struct ToUpperCaseConverter {
    seen: Vec<String>,
}

impl FileConverter for ToUpperCaseConverter {
    fn convert_file(
        &mut self,
        ctx: &mut FileConversionContext<'_>,
    ) -> fmconv_core::Result<FileOutcome> {
        let name = ctx.source_file_name();
        self.seen.push(name.clone());
        let content = String::from_utf8_lossy(&ctx.read_source()?).into_owned();
        if content.contains("fail") {
            return Err(ConverterError::failed("Failure requested by the content"));
        }
        if content.contains("warn") {
            ctx.markers()
                .mark_in_source(1, 2, MarkerKind::Warn, "Warning\nrequested")?;
        }
        ctx.set_destination_file_name(format!("{name}.uc"))?;
        ctx.write_destination(content.to_uppercase().as_bytes())?;
        Ok(FileOutcome::Converted)
    }
}

fn write(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Source tree with files at the top and in nested directories.
fn source_tree() -> anyhow::Result<TempDir> {
    let dir = TempDir::new()?;
    write(&dir.path().join("t1.txt"), "t1")?;
    write(&dir.path().join("t2.txt"), "t2")?;
    write(&dir.path().join("sub/t3.txt"), "t3")?;
    write(&dir.path().join("sub/deep/t4.txt"), "t4")?;
    write(&dir.path().join("other/t5.bin"), "t5")?;
    Ok(dir)
}

#[test]
fn test_converts_directory_tree() -> anyhow::Result<()> {
    let src = source_tree()?;
    let dst = TempDir::new()?;

    let mut driver = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path());
    let summary = driver.execute()?;

    assert_eq!(summary.converted, 5);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.markers, 0);
    assert_eq!(fs::read_to_string(dst.path().join("t1.txt.uc"))?, "T1");
    assert_eq!(fs::read_to_string(dst.path().join("sub/t3.txt.uc"))?, "T3");
    assert_eq!(fs::read_to_string(dst.path().join("sub/deep/t4.txt.uc"))?, "T4");
    assert!(!dst.path().join(MARKERS_FILE_NAME).exists());
    Ok(())
}

#[test]
fn test_visits_files_in_name_order() -> anyhow::Result<()> {
    let src = source_tree()?;
    let dst = TempDir::new()?;

    let mut driver = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path());
    driver.execute()?;

    assert_eq!(
        driver.converter().seen,
        ["t5.bin", "t4.txt", "t3.txt", "t1.txt", "t2.txt"]
    );
    Ok(())
}

#[test]
fn test_single_file_source() -> anyhow::Result<()> {
    let src = source_tree()?;
    let dst = TempDir::new()?;

    let summary = Driver::new(ToUpperCaseConverter::default())
        .source(src.path().join("sub/t3.txt"))
        .destination_directory(dst.path())
        .execute()?;

    assert_eq!(summary.converted, 1);
    assert_eq!(fs::read_to_string(dst.path().join("t3.txt.uc"))?, "T3");
    Ok(())
}

#[test]
fn test_include_and_exclude_match_relative_paths() -> anyhow::Result<()> {
    let src = source_tree()?;
    let dst = TempDir::new()?;

    let summary = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path())
        .include_pattern(r".*\.txt")?
        .exclude_pattern(r"sub/deep/.*")?
        .execute()?;

    assert_eq!(summary.converted, 3);
    assert!(dst.path().join("t1.txt.uc").exists());
    assert!(dst.path().join("sub/t3.txt.uc").exists());
    assert!(!dst.path().join("sub/deep").exists());
    assert!(!dst.path().join("other").exists());
    Ok(())
}

#[test]
fn test_include_must_match_entire_path() -> anyhow::Result<()> {
    let src = source_tree()?;
    let dst = TempDir::new()?;

    let summary = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path())
        .include(Some(Regex::new("t1")?))
        .execute()?;

    assert_eq!(summary.converted, 0);
    Ok(())
}

#[test]
fn test_executes_only_once() -> anyhow::Result<()> {
    let src = source_tree()?;
    let dst = TempDir::new()?;

    let mut driver = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path());
    driver.execute()?;
    let seen = driver.converter().seen.clone();
    let written = listing(dst.path())?;

    let err = driver.execute().unwrap_err();
    assert!(matches!(err, ConverterError::IllegalState(_)));
    assert_eq!(driver.converter().seen, seen);
    assert_eq!(listing(dst.path())?, written);
    Ok(())
}

/// Sorted paths of every file and directory below `dir`.
fn listing(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            paths.extend(listing(&path)?);
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

#[test]
fn test_marker_report() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    write(&src.path().join("a.txt"), "no markers")?;
    write(&src.path().join("b.txt"), "warn me")?;

    let summary = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path())
        .execute()?;

    assert_eq!(summary.converted, 2);
    assert_eq!(summary.markers, 1);
    let report = fs::read_to_string(dst.path().join(MARKERS_FILE_NAME))?;
    let expected = format!(
        "[WARN] {}:1:2 Warning\n\trequested\n",
        src.path().join("b.txt").display()
    );
    assert_eq!(report, expected);
    Ok(())
}

#[test]
fn test_stale_report_is_deleted_and_not_converted() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    write(&src.path().join("a.txt"), "a")?;
    write(&src.path().join(MARKERS_FILE_NAME), "old report")?;

    // Converting into the source directory itself
    let summary = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(src.path())
        .execute()?;

    assert_eq!(summary.converted, 1);
    assert!(!src.path().join(MARKERS_FILE_NAME).exists());
    Ok(())
}

#[test]
fn test_report_in_subdirectory_is_not_converted() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    write(&src.path().join("a.txt"), "a")?;
    write(&src.path().join("sub").join(MARKERS_FILE_NAME), "[WARN] fail")?;

    let mut driver = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path())
        .include(None);
    let summary = driver.execute()?;

    assert_eq!(summary.converted, 1);
    assert_eq!(driver.converter().seen, ["a.txt"]);
    assert!(!dst.path().join("sub").exists());
    Ok(())
}

#[test]
fn test_relative_paths_are_reported_absolute() -> anyhow::Result<()> {
    // Created below the working directory so it can be named relatively
    let work = tempfile::Builder::new().prefix("relative-run").tempdir_in(".")?;
    let relative = PathBuf::from(work.path().file_name().unwrap_or_default());
    write(&work.path().join("src/a.txt"), "warn")?;
    fs::create_dir(work.path().join("dst"))?;

    let summary = Driver::new(ToUpperCaseConverter::default())
        .source(relative.join("src"))
        .destination_directory(relative.join("dst"))
        .execute()?;

    assert_eq!(summary.markers, 1);
    let report = fs::read_to_string(work.path().join("dst").join(MARKERS_FILE_NAME))?;
    let source = std::env::current_dir()?.join(&relative).join("src").join("a.txt");
    assert!(source.is_absolute());
    assert!(
        report.starts_with(&format!("[WARN] {}:1:2 ", source.display())),
        "report: {report}"
    );
    Ok(())
}

#[test]
fn test_failure_names_file_and_keeps_earlier_output() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    write(&src.path().join("a.txt"), "ok")?;
    write(&src.path().join("b.txt"), "fail")?;

    let err = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(dst.path())
        .execute()
        .unwrap_err();

    assert_eq!(err.file(), Some(src.path().join("b.txt").as_path()));
    assert!(err.to_string().contains("Failure requested by the content"));
    assert!(dst.path().join("a.txt.uc").exists());
    Ok(())
}

#[test]
fn test_destination_checks() -> anyhow::Result<()> {
    let src = source_tree()?;
    let dst = TempDir::new()?;
    let missing = dst.path().join("missing");

    let err = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(&missing)
        .execute()
        .unwrap_err();
    assert!(matches!(err, ConverterError::PropertyValidation { .. }));
    assert_eq!(err.property_name(), Some("destinationDirectory"));
    assert!(!missing.exists());

    let summary = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(&missing)
        .create_destination_directory(true)
        .execute()?;
    assert_eq!(summary.converted, 5);
    assert!(missing.join("t1.txt.uc").exists());

    let err = Driver::new(ToUpperCaseConverter::default())
        .source(src.path())
        .destination_directory(src.path().join("t1.txt"))
        .execute()
        .unwrap_err();
    assert_eq!(err.property_name(), Some("destinationDirectory"));
    Ok(())
}

#[test]
fn test_missing_source() -> anyhow::Result<()> {
    let dst = TempDir::new()?;
    let err = Driver::new(ToUpperCaseConverter::default())
        .source(dst.path().join("nope"))
        .destination_directory(dst.path())
        .execute()
        .unwrap_err();
    assert_eq!(err.property_name(), Some("source"));
    assert!(err.to_string().contains("File or directory doesn't exist"));
    Ok(())
}
