/*!
# FreeMarker 2 to FreeMarker 3 File Converter

The [`FileConverter`] that reads FreeMarker 2 templates and writes their
FreeMarker 3 equivalents, with the destination extension substituted. Each
converted template is parsed again as FreeMarker 3 to catch converter bugs
early.
*/

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, warn};

use crate::charset::{Charset, CharsetError};
use crate::config::Fm2Settings;
use crate::converter;
use crate::driver::{FileConversionContext, FileConverter, FileOutcome};
use crate::error::{ConverterError, Result};
use crate::extensions::{ExtensionSubstitutions, DEFAULT_INCLUDE};
use crate::legacy::{self, ParseError, ParseOptions, TagSyntax, Template};
use crate::markers::{ConversionMarkers, MarkerKind};
use crate::naming::{self, LegacyOutputFormat, MappedOutputFormat};

/// A template converted in memory.
#[derive(Debug)]
pub struct ConvertedTemplate {
    pub content: String,
    pub tag_syntax: TagSyntax,
    /// Encoding declared in the `#ftl` header
    pub encoding: Option<String>,
    pub output_format: MappedOutputFormat,
    pub markers: ConversionMarkers,
}

/// Outcome of reading a source, before anything is converted.
enum Parsed {
    Template(String, Template, Charset),
    Failed(ParseError),
}

#[derive(Debug, Clone)]
pub struct Fm2ToFm3Converter {
    fm2_settings: Fm2Settings,
    file_extension_substitutions: IndexMap<String, String>,
    predefined_file_extension_substitutions_enabled: bool,
    skip_unparsable_files: bool,
    validate_output: bool,
}

impl Default for Fm2ToFm3Converter {
    fn default() -> Self {
        Self {
            fm2_settings: Fm2Settings::default(),
            file_extension_substitutions: IndexMap::new(),
            predefined_file_extension_substitutions_enabled: true,
            skip_unparsable_files: false,
            validate_output: true,
        }
    }
}

impl Fm2ToFm3Converter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings the FreeMarker 2 sources are parsed with
    pub fn fm2_settings(mut self, settings: Fm2Settings) -> Self {
        self.fm2_settings = settings;
        self
    }

    /// Extra extension substitutions, overriding the predefined ones
    pub fn file_extension_substitutions(mut self, substitutions: IndexMap<String, String>) -> Self {
        self.file_extension_substitutions = substitutions;
        self
    }

    pub fn predefined_file_extension_substitutions_enabled(mut self, enabled: bool) -> Self {
        self.predefined_file_extension_substitutions_enabled = enabled;
        self
    }

    /// Skip files that FreeMarker 2 can't parse, instead of failing the run
    pub fn skip_unparsable_files(mut self, skip: bool) -> Self {
        self.skip_unparsable_files = skip;
        self
    }

    /// Check that the output parses as FreeMarker 3
    pub fn validate_output(mut self, validate: bool) -> Self {
        self.validate_output = validate;
        self
    }

    pub fn settings(&self) -> &Fm2Settings {
        &self.fm2_settings
    }

    fn extensions(&self) -> ExtensionSubstitutions {
        ExtensionSubstitutions::new(
            &self.file_extension_substitutions,
            self.predefined_file_extension_substitutions_enabled,
        )
    }

    /// Output format before the `#ftl` header is taken into account.
    fn initial_output_format(&self, file_name: &str) -> LegacyOutputFormat {
        if self.fm2_settings.recognize_standard_file_extensions {
            let extension = file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
            match extension.as_deref() {
                Some("ftlh") => return LegacyOutputFormat::Html,
                Some("ftlx") => return LegacyOutputFormat::Xml,
                _ => {}
            }
        }
        self.fm2_settings.output_format.clone()
    }

    fn parse(&self, src: &str, file_name: &str) -> std::result::Result<Template, ParseError> {
        let options = ParseOptions::legacy(&self.fm2_settings, self.initial_output_format(file_name));
        legacy::parse(src, &options)
    }

    /// Decodes and parses a source. If the `#ftl` header declares another
    /// encoding than the default, the source is decoded again with that one.
    fn read(&self, bytes: &[u8], file_name: &str) -> Result<Parsed> {
        let default_charset = self.fm2_settings.default_encoding;
        let (src, decode_error) = match default_charset.decode(bytes) {
            Ok(src) => (src, None),
            // The header may still name an encoding the bytes are valid in
            Err(e) => (String::from_utf8_lossy(bytes).into_owned(), Some(e)),
        };
        let parsed = self.parse(&src, file_name);
        let declared = parsed
            .as_ref()
            .ok()
            .and_then(|template| template.encoding.as_deref())
            .map(|name| {
                Charset::for_name(name).ok_or_else(|| {
                    ConverterError::failed(format!(
                        "Unsupported template encoding in the #ftl header: {name:?}"
                    ))
                })
            })
            .transpose()?;
        let charset = declared.unwrap_or(default_charset);

        if charset == default_charset {
            if let Some(e) = decode_error {
                return Err(decode_failure(charset, e));
            }
            return Ok(match parsed {
                Ok(template) => Parsed::Template(src, template, charset),
                Err(err) => Parsed::Failed(err),
            });
        }
        debug!(file = file_name, encoding = %charset, "Re-reading with the declared encoding");
        let src = charset
            .decode(bytes)
            .map_err(|e| decode_failure(charset, e))?;
        Ok(match self.parse(&src, file_name) {
            Ok(template) => Parsed::Template(src, template, charset),
            Err(err) => Parsed::Failed(err),
        })
    }

    /// Converts a parsed template; `src` must be its source.
    fn convert_parsed(&self, src: &str, template: &Template) -> Result<ConvertedTemplate> {
        let mut markers = ConversionMarkers::new();
        let content = converter::convert(template, src, &mut markers)?;

        let output_format = naming::map_output_format(&template.output_format);
        if output_format.approximate {
            markers.mark_in_destination(
                1,
                1,
                MarkerKind::Tip,
                format!(
                    "The {:?} output format has no FreeMarker 3 counterpart; it was assumed to \
                     be {}. Check the output format configuration of FreeMarker 3.",
                    template.output_format.name(),
                    output_format.format.name()
                ),
            )?;
        }

        if self.validate_output {
            let options = ParseOptions::modern(template.tag_syntax, output_format.format.to_legacy())
                .with_custom_output_formats(&self.fm2_settings);
            legacy::parse(&content, &options)
                .map_err(|source| ConverterError::InvalidOutput { file: None, source })?;
        }

        Ok(ConvertedTemplate {
            content,
            tag_syntax: template.tag_syntax,
            encoding: template.encoding.clone(),
            output_format,
            markers,
        })
    }

    /// Converts template source text. `file_name` is used for deciding the
    /// output format by extension.
    pub fn convert_text(&self, file_name: &str, src: &str) -> Result<ConvertedTemplate> {
        let template = self
            .parse(src, file_name)
            .map_err(|source| ConverterError::Parse { file: None, source })?;
        self.convert_parsed(src, &template)
    }

    /// Destination file name for `file_name` written in `syntax`.
    pub fn destination_file_name(&self, file_name: &str, syntax: TagSyntax) -> String {
        self.extensions().destination_file_name(file_name, syntax)
    }
}

impl FileConverter for Fm2ToFm3Converter {
    fn default_include(&self) -> Option<Regex> {
        Regex::new(DEFAULT_INCLUDE).ok()
    }

    fn convert_file(&mut self, ctx: &mut FileConversionContext<'_>) -> Result<FileOutcome> {
        let file_name = ctx.source_file_name();
        let bytes = ctx.read_source()?;
        let (src, template, charset) = match self.read(&bytes, &file_name)? {
            Parsed::Template(src, template, charset) => (src, template, charset),
            Parsed::Failed(err) if self.skip_unparsable_files => {
                warn!(file = %ctx.source_file().display(), error = %err, "Skipping unparsable file");
                ctx.markers().mark_in_source(
                    err.position.row,
                    err.position.column,
                    MarkerKind::Warn,
                    format!("Skipped file due to parse error: {}", err.message),
                )?;
                return Ok(FileOutcome::Skipped);
            }
            Parsed::Failed(source) => return Err(ConverterError::Parse { file: None, source }),
        };

        ctx.set_destination_file_name(self.destination_file_name(&file_name, template.tag_syntax))?;
        let converted = self.convert_parsed(&src, &template)?;
        let content = charset.encode(&converted.content).map_err(|e| {
            ConverterError::Failed {
                message: format!("Couldn't encode the converted template as {charset}"),
                file: None,
                position: None,
                cause: Some(Box::new(e)),
            }
        })?;
        ctx.write_destination(&content)?;

        let markers = ctx.markers();
        for marker in converted.markers.source_markers() {
            markers.mark_in_source(marker.row(), marker.column(), marker.kind(), marker.message())?;
        }
        for marker in converted.markers.destination_markers() {
            markers.mark_in_destination(
                marker.row(),
                marker.column(),
                marker.kind(),
                marker.message(),
            )?;
        }
        Ok(FileOutcome::Converted)
    }
}

fn decode_failure(charset: Charset, e: CharsetError) -> ConverterError {
    ConverterError::Failed {
        message: format!("Couldn't decode the template as {charset}"),
        file: None,
        position: None,
        cause: Some(Box::new(e)),
    }
}
