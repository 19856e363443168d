//! # fmconv command line
//!
//! The `fmconv` front-end over [`fmconv_core`]. [`execute`] takes the
//! arguments (without the program name) and an output stream, and returns the
//! process exit code, so the whole command line contract can be tested
//! in-process.

#![warn(clippy::all)]

use std::error::Error as StdError;
use std::io::{self, Write};

use clap::{error::ErrorKind, Arg, ArgAction, ArgMatches, Command};
use fmconv_core::charset::CharsetError;
use fmconv_core::{
    ConversionSummary, ConverterError, Driver, Fm2Settings, Fm2ToFm3Converter, ParseError,
};
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

/// Exit code for a bad command line, also used when nothing was given
pub const EXIT_WRONG_INPUT: i32 = -1;
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CONVERSION_FAILED: i32 = 1;

/// Options that `execute` found valid.
#[derive(Debug)]
struct Options {
    source: String,
    destination: String,
    create_destination: bool,
    include: Option<Regex>,
    exclude: Option<Regex>,
    fm2_settings: Fm2Settings,
    file_extension_substitutions: IndexMap<String, String>,
    predefined_file_extension_substitutions: bool,
    skip_unparsable_files: bool,
}

/// A command line problem, reported before the usage text.
#[derive(Debug)]
struct WrongInput(String);

fn command() -> Command {
    Command::new("fmconv")
        .no_binary_name(true)
        .version(fmconv_core::VERSION)
        .about("Converts FreeMarker 2 templates to FreeMarker 3 templates")
        .arg(
            Arg::new("source")
                .value_name("SOURCE")
                .help("Template file, or directory of templates, to convert")
                .num_args(0..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("destination")
                .short('d')
                .long("destination")
                .value_name("DIR")
                .help("Directory where the converted files are written"),
        )
        .arg(
            Arg::new("create-destination")
                .short('p')
                .long("create-destination")
                .help("Create the destination directory if it doesn't exist")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("include")
                .long("include")
                .value_name("REGEXP")
                .help("Only convert files whose path relative to the source matches this"),
        )
        .arg(
            Arg::new("exclude")
                .long("exclude")
                .value_name("REGEXP")
                .help("Don't convert files whose path relative to the source matches this"),
        )
        .arg(
            Arg::new("fm2-setting")
                .short('S')
                .long("fm2-setting")
                .value_name("NAME=VALUE")
                .help("FreeMarker 2 setting used for parsing the sources; can be repeated")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("file-ext-subst")
                .short('E')
                .long("file-ext-subst")
                .value_name("OLD=NEW")
                .help("Source to destination file extension substitution; can be repeated")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("no-predef-file-ext-substs")
                .long("no-predef-file-ext-substs")
                .help("Disable the predefined file extension substitutions (ftl to f3ac, etc.)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("skip-unparsable-files")
                .long("skip-unparsable-files")
                .help("Skip files FreeMarker 2 can't parse, instead of stopping")
                .action(ArgAction::SetTrue),
        )
}

/// Runs the command line; returns the exit code.
pub fn execute<W: Write>(out: &mut W, args: &[String]) -> i32 {
    match try_execute(out, args) {
        Ok(code) => code,
        // Nothing useful left to report on if the output itself is broken
        Err(_) => EXIT_CONVERSION_FAILED,
    }
}

fn try_execute<W: Write>(out: &mut W, args: &[String]) -> io::Result<i32> {
    let mut cmd = command();
    if args.is_empty() {
        writeln!(out, "{}", cmd.render_usage())?;
        return Ok(EXIT_WRONG_INPUT);
    }

    let matches = match cmd.try_get_matches_from_mut(args) {
        Ok(matches) => matches,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            write!(out, "{}", e.render())?;
            return Ok(EXIT_SUCCESS);
        }
        Err(e) => {
            let rendered = e.render().to_string();
            let message = rendered
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches("error: ");
            return wrong_input(out, &mut cmd, &WrongInput(message.to_string()));
        }
    };

    let options = match Options::from_matches(&matches) {
        Ok(options) => options,
        Err(e) => return wrong_input(out, &mut cmd, &e),
    };
    debug!(?options, "Parsed command line");

    match convert(options) {
        Ok(summary) if summary.converted == 0 && summary.skipped == 0 => {
            writeln!(out, "No file to convert was found.")?;
        }
        Ok(summary) => {
            writeln!(
                out,
                "Conversion was finished successfully. Converted {} file(s).",
                summary.converted
            )?;
        }
        Err(e) => {
            writeln!(out, "Conversion was terminated with error:")?;
            write_cause_chain(out, &e)?;
            return Ok(EXIT_CONVERSION_FAILED);
        }
    }
    Ok(EXIT_SUCCESS)
}

fn wrong_input<W: Write>(out: &mut W, cmd: &mut Command, e: &WrongInput) -> io::Result<i32> {
    writeln!(out, "Wrong command line input: {}", e.0)?;
    writeln!(out)?;
    writeln!(out, "{}", cmd.render_usage())?;
    Ok(EXIT_WRONG_INPUT)
}

/// Prints the error, then each of its causes on a `Caused by:` line, every
/// link as `<kind>: <message>`.
fn write_cause_chain<W: Write>(out: &mut W, e: &anyhow::Error) -> io::Result<()> {
    let mut chain = e.chain();
    if let Some(first) = chain.next() {
        writeln!(out, "{}: {first}", error_kind(first))?;
    }
    for cause in chain {
        writeln!(out, "Caused by: {}: {cause}", error_kind(cause))?;
    }
    Ok(())
}

fn error_kind(e: &(dyn StdError + 'static)) -> &'static str {
    if let Some(e) = e.downcast_ref::<ConverterError>() {
        e.kind()
    } else if e.is::<ParseError>() {
        "ParseError"
    } else if e.is::<CharsetError>() {
        "CharsetError"
    } else if e.is::<io::Error>() {
        "io::Error"
    } else {
        "Error"
    }
}

fn convert(options: Options) -> anyhow::Result<ConversionSummary> {
    let converter = Fm2ToFm3Converter::new()
        .fm2_settings(options.fm2_settings)
        .file_extension_substitutions(options.file_extension_substitutions)
        .predefined_file_extension_substitutions_enabled(
            options.predefined_file_extension_substitutions,
        )
        .skip_unparsable_files(options.skip_unparsable_files);

    let mut driver = Driver::new(converter)
        .source(options.source)
        .destination_directory(options.destination)
        .create_destination_directory(options.create_destination)
        .exclude(options.exclude);
    if let Some(include) = options.include {
        driver = driver.include(Some(include));
    }
    Ok(driver.execute()?)
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Result<Self, WrongInput> {
        let mut sources = matches
            .get_many::<String>("source")
            .unwrap_or_default()
            .cloned();
        let source = match (sources.next(), sources.next()) {
            (Some(source), None) => source,
            (None, _) => {
                return Err(WrongInput("The source file or directory is missing.".into()))
            }
            (Some(_), Some(_)) => {
                return Err(WrongInput(
                    "Only one source file or directory can be specified.".into(),
                ))
            }
        };
        let destination = matches
            .get_one::<String>("destination")
            .cloned()
            .ok_or_else(|| WrongInput("The --destination option is required.".into()))?;

        let mut fm2_settings = Fm2Settings::new();
        for setting in matches.get_many::<String>("fm2-setting").unwrap_or_default() {
            let (name, value) = split_key_value("fm2-setting", setting)?;
            fm2_settings
                .set(name, value)
                .map_err(|e| WrongInput(e.to_string()))?;
        }

        let mut file_extension_substitutions = IndexMap::new();
        for substitution in matches.get_many::<String>("file-ext-subst").unwrap_or_default() {
            let (old, new) = split_key_value("file-ext-subst", substitution)?;
            file_extension_substitutions.insert(old.to_string(), new.to_string());
        }

        Ok(Self {
            source,
            destination,
            create_destination: matches.get_flag("create-destination"),
            include: regex_option(matches, "include")?,
            exclude: regex_option(matches, "exclude")?,
            fm2_settings,
            file_extension_substitutions,
            predefined_file_extension_substitutions: !matches
                .get_flag("no-predef-file-ext-substs"),
            skip_unparsable_files: matches.get_flag("skip-unparsable-files"),
        })
    }
}

/// Splits `name=value`; both sides must be non-empty.
fn split_key_value<'a>(option: &str, value: &'a str) -> Result<(&'a str, &'a str), WrongInput> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() && !val.trim().is_empty() => {
            Ok((key.trim(), val.trim()))
        }
        _ => Err(WrongInput(format!(
            "The value of --{option} must have the form <name>=<value>, but was {value:?}."
        ))),
    }
}

fn regex_option(matches: &ArgMatches, name: &str) -> Result<Option<Regex>, WrongInput> {
    matches
        .get_one::<String>(name)
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                WrongInput(format!(
                    "The value of the \"{name}\" is not a valid regular expression: {e}"
                ))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key_value() {
        assert_eq!(split_key_value("x", "a=b").unwrap(), ("a", "b"));
        assert_eq!(split_key_value("x", " a = b=c ").unwrap(), ("a", "b=c"));
        assert!(split_key_value("x", "a").is_err());
        assert!(split_key_value("x", "=b").is_err());
        assert!(split_key_value("x", "a=").is_err());
    }

    #[test]
    fn test_cause_chain_names_each_kind() {
        let err = anyhow::Error::from(ConverterError::io(
            "read",
            std::path::Path::new("a.ftl"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        ));
        let mut out = Vec::new();
        write_cause_chain(&mut out, &err).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Io: Failed to read a.ftl\nCaused by: io::Error: gone\n"
        );
    }

    #[test]
    fn test_command_is_well_formed() {
        command().debug_assert();
    }
}
