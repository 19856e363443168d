/*!
# Conversion Markers

Positioned diagnostics collected while one file is converted. Markers never
abort a conversion; they end up in the run's marker report for a human to
review.
*/

use std::fmt;

use crate::error::{ConverterError, Result};

/// Severity of a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Something that most likely needs a manual fix
    Warn,
    /// Something worth checking, but probably fine
    Tip,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerKind::Warn => f.write_str("WARN"),
            MarkerKind::Tip => f.write_str("TIP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    row: usize,
    column: usize,
    kind: MarkerKind,
    message: String,
}

impl Marker {
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn kind(&self) -> MarkerKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Markers of a single file, anchored either to the source or to the
/// destination file. Entries are kept in insertion order.
#[derive(Debug, Default)]
pub struct ConversionMarkers {
    source_markers: Vec<Marker>,
    destination_markers: Vec<Marker>,
}

impl ConversionMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_in_source(
        &mut self,
        row: usize,
        column: usize,
        kind: MarkerKind,
        message: impl Into<String>,
    ) -> Result<()> {
        let marker = Self::create(row, column, kind, message.into())?;
        self.source_markers.push(marker);
        Ok(())
    }

    pub fn mark_in_destination(
        &mut self,
        row: usize,
        column: usize,
        kind: MarkerKind,
        message: impl Into<String>,
    ) -> Result<()> {
        let marker = Self::create(row, column, kind, message.into())?;
        self.destination_markers.push(marker);
        Ok(())
    }

    fn create(row: usize, column: usize, kind: MarkerKind, message: String) -> Result<Marker> {
        if row == 0 || column == 0 {
            return Err(ConverterError::InvalidArgument(format!(
                "Marker positions are 1-based, got row {row}, column {column}"
            )));
        }
        Ok(Marker {
            row,
            column,
            kind,
            message,
        })
    }

    pub fn source_markers(&self) -> &[Marker] {
        &self.source_markers
    }

    pub fn destination_markers(&self) -> &[Marker] {
        &self.destination_markers
    }

    pub fn is_empty(&self) -> bool {
        self.source_markers.is_empty() && self.destination_markers.is_empty()
    }
}
