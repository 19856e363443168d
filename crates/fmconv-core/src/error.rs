use std::fmt;
use std::path::{Path, PathBuf};

use crate::legacy::ParseError;

/// A 1-based row/column position inside a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

/// Renders the `<file>:<row>:<column>: ` prefix of a failure message.
struct Location<'a> {
    file: Option<&'a Path>,
    position: Option<Position>,
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.file, self.position) {
            (Some(file), Some(pos)) => write!(f, "{}:{}: ", file.display(), pos),
            (Some(file), None) => write!(f, "{}: ", file.display()),
            (None, Some(pos)) => write!(f, "{}: ", pos),
            (None, None) => Ok(()),
        }
    }
}

fn location(file: &Option<PathBuf>, position: &Option<Position>) -> String {
    Location {
        file: file.as_deref(),
        position: *position,
    }
    .to_string()
}

/// Error family of the conversion pipeline.
///
/// Everything that fails below the driver is normalized into this type, so
/// callers only ever handle one kind of error.
#[derive(thiserror::Error, Debug)]
pub enum ConverterError {
    /// Generic conversion failure
    #[error("{}{message}", location(file, position))]
    Failed {
        message: String,
        file: Option<PathBuf>,
        position: Option<Position>,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// A configuration property has an unusable value
    #[error("Invalid value for the {property:?} property: {reason}")]
    PropertyValidation { property: String, reason: String },

    /// A required configuration property was never set
    #[error("The {property:?} property must be set")]
    MissingRequiredProperty { property: String },

    /// A legacy construct that has no FreeMarker 3 equivalent
    #[error("{}{message}", location(file, &Some(*position)))]
    UnconvertableLegacyFeature {
        message: String,
        file: Option<PathBuf>,
        position: Position,
    },

    /// The source template is not valid FreeMarker 2
    #[error("{}Failed to parse the source template", location(file, &None))]
    Parse {
        file: Option<PathBuf>,
        #[source]
        source: ParseError,
    },

    /// The converted output is not valid FreeMarker 3
    #[error("{}The converted template is not valid FreeMarker 3 (this is a bug in the converter)", location(file, &None))]
    InvalidOutput {
        file: Option<PathBuf>,
        #[source]
        source: ParseError,
    },

    /// I/O failure, with the file and phase in the message
    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ConverterError {
    /// Create a generic failure without position or cause
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            file: None,
            position: None,
            cause: None,
        }
    }

    /// Create a generic failure anchored at a template position
    pub fn failed_at(message: impl Into<String>, position: Position) -> Self {
        Self::Failed {
            message: message.into(),
            file: None,
            position: Some(position),
            cause: None,
        }
    }

    /// Create an unconvertable-construct error
    pub fn unconvertable(message: impl Into<String>, position: Position) -> Self {
        Self::UnconvertableLegacyFeature {
            message: message.into(),
            file: None,
            position,
        }
    }

    pub fn property_validation(property: &str, reason: impl Into<String>) -> Self {
        Self::PropertyValidation {
            property: property.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing_property(property: &str) -> Self {
        Self::MissingRequiredProperty {
            property: property.to_string(),
        }
    }

    /// Wrap an I/O error with the file it happened on and what was being done
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            message: format!("Failed to {} {}", action, path.display()),
            source,
        }
    }

    /// Attach the path of the file being converted, unless one is already set.
    pub fn with_file(mut self, path: &Path) -> Self {
        match &mut self {
            Self::Failed { file, .. }
            | Self::UnconvertableLegacyFeature { file, .. }
            | Self::Parse { file, .. }
            | Self::InvalidOutput { file, .. } => {
                if file.is_none() {
                    *file = Some(path.to_path_buf());
                }
            }
            _ => {}
        }
        self
    }

    /// Template position the error refers to, if any
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::Failed { position, .. } => *position,
            Self::UnconvertableLegacyFeature { position, .. } => Some(*position),
            Self::Parse { source, .. } | Self::InvalidOutput { source, .. } => {
                Some(source.position)
            }
            _ => None,
        }
    }

    /// Name of the offending property for property validation failures
    pub fn property_name(&self) -> Option<&str> {
        match self {
            Self::PropertyValidation { property, .. }
            | Self::MissingRequiredProperty { property } => Some(property),
            _ => None,
        }
    }

    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::Failed { file, .. }
            | Self::UnconvertableLegacyFeature { file, .. }
            | Self::Parse { file, .. }
            | Self::InvalidOutput { file, .. } => file.as_deref(),
            _ => None,
        }
    }

    /// Name of the variant, used when printing error chains
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "Failed",
            Self::PropertyValidation { .. } => "PropertyValidation",
            Self::MissingRequiredProperty { .. } => "MissingRequiredProperty",
            Self::UnconvertableLegacyFeature { .. } => "UnconvertableLegacyFeature",
            Self::Parse { .. } => "Parse",
            Self::InvalidOutput { .. } => "InvalidOutput",
            Self::Io { .. } => "Io",
            Self::IllegalState(_) => "IllegalState",
            Self::InvalidArgument(_) => "InvalidArgument",
        }
    }
}

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, ConverterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_message_is_prefixed_with_file_and_position() {
        let err = ConverterError::failed_at("Boom", Position::new(3, 7))
            .with_file(Path::new("/t/a.ftl"));
        assert_eq!(err.to_string(), "/t/a.ftl:3:7: Boom");
        assert_eq!(err.position(), Some(Position::new(3, 7)));
    }

    #[test]
    fn failed_message_without_context_is_bare() {
        assert_eq!(ConverterError::failed("Boom").to_string(), "Boom");
    }

    #[test]
    fn with_file_keeps_first_path() {
        let err = ConverterError::unconvertable("x", Position::new(1, 2))
            .with_file(Path::new("a"))
            .with_file(Path::new("b"));
        assert_eq!(err.file(), Some(Path::new("a")));
        assert_eq!(err.to_string(), "a:1:2: x");
    }

    #[test]
    fn kind_names_the_variant() {
        assert_eq!(ConverterError::failed("x").kind(), "Failed");
        assert_eq!(ConverterError::missing_property("source").kind(), "MissingRequiredProperty");
        assert_eq!(
            ConverterError::unconvertable("x", Position::new(1, 1)).kind(),
            "UnconvertableLegacyFeature"
        );
    }

    #[test]
    fn property_name_is_exposed() {
        let err = ConverterError::missing_property("source");
        assert_eq!(err.property_name(), Some("source"));
        let err = ConverterError::property_validation("include", "bad");
        assert_eq!(err.property_name(), Some("include"));
        assert_eq!(ConverterError::failed("x").property_name(), None);
    }
}
