//! The command line contract, run in-process

use std::fs;

use fmconv_cli::{execute, EXIT_CONVERSION_FAILED, EXIT_SUCCESS, EXIT_WRONG_INPUT};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Runs the command line; returns the exit code and the output.
fn run(args: &[&str]) -> (i32, String) {
    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    let mut out = Vec::new();
    let code = execute(&mut out, &args);
    (code, String::from_utf8_lossy(&out).into_owned())
}

fn path(dir: &TempDir) -> String {
    dir.path().display().to_string()
}

#[test]
fn test_no_arguments_prints_usage() {
    let (code, out) = run(&[]);
    assert_eq!(code, EXIT_WRONG_INPUT);
    assert!(out.contains("Usage:"), "output: {out}");
}

#[test]
fn test_help() {
    let (code, out) = run(&["--help"]);
    assert_eq!(code, EXIT_SUCCESS);
    assert!(out.contains("--destination"));
    assert!(out.contains("--skip-unparsable-files"));
}

#[test]
fn test_missing_destination() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let (code, out) = run(&[&path(&src)]);
    assert_eq!(code, EXIT_WRONG_INPUT);
    assert!(out.starts_with("Wrong command line input: "), "output: {out}");
    assert!(out.contains("Usage:"));
    Ok(())
}

#[test]
fn test_source_count() -> anyhow::Result<()> {
    let dst = TempDir::new()?;
    let (code, out) = run(&["-d", &path(&dst)]);
    assert_eq!(code, EXIT_WRONG_INPUT);
    assert!(out.starts_with("Wrong command line input: "));

    let (code, _) = run(&["a", "b", "-d", &path(&dst)]);
    assert_eq!(code, EXIT_WRONG_INPUT);
    Ok(())
}

#[test]
fn test_bad_key_value_options() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    for option in ["-S", "-E"] {
        let (code, out) = run(&[&path(&src), "-d", &path(&dst), option, "novalue"]);
        assert_eq!(code, EXIT_WRONG_INPUT, "option {option}");
        assert!(out.starts_with("Wrong command line input: "));
    }

    let (code, _) = run(&[&path(&src), "-d", &path(&dst), "-S", "no_such_setting=1"]);
    assert_eq!(code, EXIT_WRONG_INPUT);
    Ok(())
}

#[test]
fn test_bad_regular_expression() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    let (code, out) = run(&[&path(&src), "-d", &path(&dst), "--include", "("]);
    assert_eq!(code, EXIT_WRONG_INPUT);
    assert!(
        out.starts_with(
            "Wrong command line input: The value of the \"include\" is not a valid regular \
             expression: "
        ),
        "output: {out}"
    );
    Ok(())
}

#[test]
fn test_nothing_to_convert() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    fs::write(src.path().join("readme.txt"), "x")?;

    let (code, out) = run(&[&path(&src), "-d", &path(&dst)]);
    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(out, "No file to convert was found.\n");
    Ok(())
}

#[test]
fn test_successful_conversion() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    let out_dir = dst.path().join("out");
    fs::write(src.path().join("a.ftl"), "<#if x>${x}<#elseif y>y</#if>")?;
    fs::write(src.path().join("b.tpl"), "${b}")?;

    let (code, out) = run(&[
        &path(&src),
        "-d",
        &out_dir.display().to_string(),
        "-p",
        "--include",
        r".*\.(ftl|tpl)",
        "-E",
        "tpl=tpl3",
    ]);

    assert_eq!(out, "Conversion was finished successfully. Converted 2 file(s).\n");
    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(
        fs::read_to_string(out_dir.join("a.f3ac"))?,
        "<#if x>${x}<#elseIf y>y</#if>"
    );
    assert!(out_dir.join("b.tpl3").exists());
    Ok(())
}

#[test]
fn test_square_bracket_setting() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    fs::write(src.path().join("a.ftl"), "[#if x]${x}[/#if]")?;

    let (code, _) = run(&[&path(&src), "-d", &path(&dst), "-S", "tag_syntax=square_bracket"]);
    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(fs::read_to_string(dst.path().join("a.f3sc"))?, "[#if x]${x}[/#if]");
    Ok(())
}

#[test]
fn test_conversion_error() -> anyhow::Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    fs::write(src.path().join("a.ftl"), "<#if x>")?;

    let (code, out) = run(&[&path(&src), "-d", &path(&dst)]);
    assert_eq!(code, EXIT_CONVERSION_FAILED);
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some("Conversion was terminated with error:"));
    let error = lines.next().unwrap_or_default();
    assert!(error.starts_with("Parse: "), "error line: {error}");
    assert!(error.contains("a.ftl"));
    let cause = lines.next().unwrap_or_default();
    assert!(
        cause.starts_with("Caused by: ParseError: Syntax error at line 1"),
        "cause line: {cause}"
    );

    let (code, out) = run(&[&path(&src), "-d", &path(&dst), "--skip-unparsable-files"]);
    assert_eq!(code, EXIT_SUCCESS);
    assert_eq!(out, "Conversion was finished successfully. Converted 0 file(s).\n");
    Ok(())
}
