//! # FreeMarker Template Converter Core
//!
//! Converts FreeMarker 2 templates to FreeMarker 3 syntax:
//! - A FreeMarker 2 parser that keeps source spans ([`legacy`])
//! - The AST-to-source converter ([`converter`])
//! - Naming and output format tables ([`naming`])
//! - The file tree driver and its marker report ([`driver`])
//!
//! Everything that is not a mechanical rewrite is either reported as a
//! marker, or fails with a position carrying [`ConverterError`].

#![warn(clippy::all)]

pub mod charset;
pub mod config;
pub mod converter;
pub mod driver;
pub mod error;
pub mod extensions;
pub mod fm2_to_fm3;
pub mod legacy;
pub mod markers;
pub mod naming;

// Re-export commonly used types
pub use config::Fm2Settings;
pub use driver::{
    ConversionSummary, Driver, FileConversionContext, FileConverter, FileOutcome,
    MARKERS_FILE_NAME,
};
pub use error::{ConverterError, Position, Result};
pub use extensions::ExtensionSubstitutions;
pub use fm2_to_fm3::{ConvertedTemplate, Fm2ToFm3Converter};
pub use legacy::{ParseError, TagSyntax, TagSyntaxSetting};
pub use markers::{ConversionMarkers, Marker, MarkerKind};
pub use naming::snake_case_to_camel_case;

/// Converter version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for the converter components. Logs go to stderr, as
/// stdout carries the command line output.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fmconv_core=info".parse().unwrap()),
        )
        .init();
}
