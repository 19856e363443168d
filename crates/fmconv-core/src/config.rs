//! FreeMarker 2 parser configuration.

use indexmap::IndexMap;

use crate::charset::Charset;
use crate::error::{ConverterError, Result};
use crate::legacy::TagSyntaxSetting;
use crate::naming::LegacyOutputFormat;

/// Property under which FreeMarker 2 setting problems are reported.
pub const FM2_SETTINGS_PROPERTY: &str = "freeMarker2Settings";

/// Settings used when parsing the FreeMarker 2 sources.
///
/// Built once per run and shared by reference with every file conversion.
#[derive(Debug, Clone)]
pub struct Fm2Settings {
    pub tag_syntax: TagSyntaxSetting,
    pub default_encoding: Charset,
    pub output_format: LegacyOutputFormat,
    pub recognize_standard_file_extensions: bool,
    custom_output_formats: IndexMap<String, bool>,
}

impl Default for Fm2Settings {
    fn default() -> Self {
        Self {
            tag_syntax: TagSyntaxSetting::AngleBracket,
            default_encoding: Charset::Utf8,
            output_format: LegacyOutputFormat::Undefined,
            recognize_standard_file_extensions: true,
            custom_output_formats: IndexMap::new(),
        }
    }
}

impl Fm2Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a setting by its FreeMarker 2 name; both the snake_case and the
    /// camelCase spelling are accepted.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match name {
            "tag_syntax" | "tagSyntax" => {
                self.tag_syntax = match value {
                    "angle_bracket" | "angleBracket" => TagSyntaxSetting::AngleBracket,
                    "square_bracket" | "squareBracket" => TagSyntaxSetting::SquareBracket,
                    "auto_detect" | "autoDetect" => TagSyntaxSetting::AutoDetect,
                    _ => return Err(invalid_value(name, value)),
                };
            }
            "default_encoding" | "defaultEncoding" => {
                self.default_encoding = Charset::for_name(value).ok_or_else(|| {
                    ConverterError::property_validation(
                        FM2_SETTINGS_PROPERTY,
                        format!("Unsupported encoding for \"{name}\": {value:?}"),
                    )
                })?;
            }
            "output_format" | "outputFormat" => {
                self.output_format = self
                    .resolve_output_format(value)
                    .ok_or_else(|| invalid_value(name, value))?;
            }
            "recognize_standard_file_extensions" | "recognizeStandardFileExtensions" => {
                self.recognize_standard_file_extensions = match value {
                    "true" => true,
                    "false" => false,
                    _ => return Err(invalid_value(name, value)),
                };
            }
            _ => {
                return Err(ConverterError::property_validation(
                    FM2_SETTINGS_PROPERTY,
                    format!("Unknown FreeMarker 2 setting: {name:?}"),
                ))
            }
        }
        Ok(())
    }

    /// Registers an application specific output format.
    pub fn register_output_format(&mut self, name: impl Into<String>, markup: bool) {
        self.custom_output_formats.insert(name.into(), markup);
    }

    /// Resolves an output format name against the standard and registered formats.
    pub fn resolve_output_format(&self, name: &str) -> Option<LegacyOutputFormat> {
        LegacyOutputFormat::standard(name).or_else(|| {
            self.custom_output_formats
                .get(name)
                .map(|markup| LegacyOutputFormat::Custom {
                    name: name.to_string(),
                    markup: *markup,
                })
        })
    }
}

fn invalid_value(name: &str, value: &str) -> ConverterError {
    ConverterError::property_validation(
        FM2_SETTINGS_PROPERTY,
        format!("Invalid value for the \"{name}\" setting: {value:?}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_spellings_are_accepted() {
        let mut settings = Fm2Settings::new();
        settings.set("tag_syntax", "square_bracket").unwrap();
        assert_eq!(settings.tag_syntax, TagSyntaxSetting::SquareBracket);
        settings.set("tagSyntax", "autoDetect").unwrap();
        assert_eq!(settings.tag_syntax, TagSyntaxSetting::AutoDetect);
        settings.set("defaultEncoding", "ISO-8859-1").unwrap();
        assert_eq!(settings.default_encoding, Charset::Latin1);
        settings.set("recognize_standard_file_extensions", "false").unwrap();
        assert!(!settings.recognize_standard_file_extensions);
    }

    #[test]
    fn test_unknown_setting_is_a_property_error() {
        let mut settings = Fm2Settings::new();
        let err = settings.set("classic_compatible", "true").unwrap_err();
        assert_eq!(err.property_name(), Some(FM2_SETTINGS_PROPERTY));
        assert!(settings.set("tag_syntax", "round").is_err());
        assert!(settings.set("default_encoding", "EBCDIC").is_err());
    }

    #[test]
    fn test_custom_output_formats() {
        let mut settings = Fm2Settings::new();
        assert!(settings.set("output_format", "XUL").is_err());
        settings.register_output_format("XUL", true);
        settings.set("output_format", "XUL").unwrap();
        assert!(settings.output_format.is_markup());
        settings.set("output_format", "HTML").unwrap();
        assert_eq!(settings.output_format, LegacyOutputFormat::Html);
    }
}
