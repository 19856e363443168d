/*!
# FreeMarker 2 to FreeMarker 3 Source Converter

Walks a parsed FreeMarker 2 template and prints it as FreeMarker 3 source.

The AST only records spans, so the converter works by copying the source
between the spans it knows about, and printing its own text for the parts
that change. Whitespace and comments inside tags survive this way, which
keeps diffs of converted templates small.

Constructs without a FreeMarker 3 equivalent fail with
[`ConverterError::UnconvertableLegacyFeature`]; lossy but automatic changes
are recorded as markers instead.
*/

mod directives;
mod expressions;

use crate::error::{ConverterError, Position, Result};
use crate::legacy::ast::{EndTag, StartTag};
use crate::legacy::lexer::comment_end;
use crate::legacy::{LineIndex, TagSyntax, Template};
use crate::markers::{ConversionMarkers, MarkerKind};

/// Where an expression is printed, as far as operator precedence goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprContext {
    Free,
    /// Target of `.name`, `[key]` or `(args)`
    Accessor,
    /// Target of `?name`
    BuiltInTarget,
    /// Left side of `!`
    DefaultToTarget,
    /// Left side of `??`
    ExistsTarget,
}

/// Converts `template`, parsed from `src`, to FreeMarker 3 source text.
///
/// Markers for lossy conversions are added to `markers`.
pub fn convert(template: &Template, src: &str, markers: &mut ConversionMarkers) -> Result<String> {
    let mut converter = SourceConverter {
        src,
        out: String::with_capacity(src.len() + src.len() / 8),
        syntax: template.tag_syntax,
        line_index: LineIndex::new(src),
        root: src,
        offset_maps: Vec::new(),
        markers,
    };
    converter.elements(&template.elements)?;
    Ok(converter.out)
}

struct SourceConverter<'t, 'm> {
    /// The text spans currently refer to; the decoded value of a string
    /// literal while its interpolations are converted
    src: &'t str,
    out: String,
    syntax: TagSyntax,
    line_index: LineIndex,
    root: &'t str,
    /// Maps from string literal values back to their enclosing text
    offset_maps: Vec<&'t [usize]>,
    markers: &'m mut ConversionMarkers,
}

impl<'t, 'm> SourceConverter<'t, 'm> {
    fn copy(&mut self, from: usize, to: usize) {
        if from < to {
            self.out.push_str(&self.src[from..to]);
        }
    }

    fn gap(&self, from: usize, to: usize) -> &'t str {
        if from < to {
            &self.src[from..to]
        } else {
            ""
        }
    }

    fn position(&self, offset: usize) -> Position {
        let offset = self
            .offset_maps
            .iter()
            .rev()
            .fold(offset, |offset, map| map[offset.min(map.len() - 1)]);
        self.line_index.position(self.root, offset)
    }

    fn unconvertable(&self, message: impl Into<String>, offset: usize) -> ConverterError {
        ConverterError::unconvertable(message, self.position(offset))
    }

    fn failed_at(&self, message: impl Into<String>, offset: usize) -> ConverterError {
        ConverterError::failed_at(message, self.position(offset))
    }

    fn warn_in_source(&mut self, offset: usize, message: impl Into<String>) -> Result<()> {
        let position = self.position(offset);
        self.markers
            .mark_in_source(position.row, position.column, MarkerKind::Warn, message)
    }

    /// Converts in the context of a string literal value; returns what was printed.
    fn nested<F>(&mut self, text: &'t str, offsets: &'t [usize], convert: F) -> Result<String>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved_src = std::mem::replace(&mut self.src, text);
        let saved_out = std::mem::take(&mut self.out);
        self.offset_maps.push(offsets);
        let result = convert(self);
        self.offset_maps.pop();
        self.src = saved_src;
        let printed = std::mem::replace(&mut self.out, saved_out);
        result.map(|()| printed)
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    /// Prints the tag begin character and the directive name; returns where
    /// the source continues.
    fn open_tag(&mut self, tag: &StartTag, name: &str) -> usize {
        self.out.push(self.syntax.begin_char());
        self.out.push('#');
        self.out.push_str(name);
        tag.name_end
    }

    /// Prints the rest of a start tag from `pos`. FreeMarker 3 doesn't allow
    /// `/>` on tags with nested content; with `strip_slash` it's dropped
    /// together with one preceding space.
    fn close_tag(&mut self, tag: &StartTag, pos: usize, strip_slash: bool) {
        self.copy(pos, tag.close.start);
        if tag.is_empty() {
            if strip_slash {
                if self.out.ends_with(' ') {
                    self.out.pop();
                }
            } else {
                self.out.push('/');
            }
        }
        self.out.push(self.syntax.end_char());
    }

    fn end_tag(&mut self, end: &EndTag, name: &str) {
        self.out.push(self.syntax.begin_char());
        self.out.push_str("/#");
        self.out.push_str(name);
        self.copy(end.name_end, end.close.start);
        self.out.push(self.syntax.end_char());
    }

    /// Prints the gap before a list item or argument, inserting the comma
    /// FreeMarker 3 requires if the source had none.
    fn separator_gap(&mut self, gap: &str) {
        if find_outside_comments(gap, ',').is_some() {
            self.out.push_str(gap);
            return;
        }
        let rest = gap.trim_start();
        if gap[..gap.len() - rest.len()].contains('\n') {
            self.out.push(',');
            self.out.push_str(gap);
        } else {
            self.out.push_str(", ");
            self.out.push_str(rest);
        }
    }
}

/// Whether the text contains a FreeMarker comment.
fn has_comment(gap: &str) -> bool {
    ["<#--", "<!--", "[#--", "[!--"]
        .iter()
        .any(|start| gap.contains(start))
}

/// Byte index of the first `c` not inside a comment.
fn find_outside_comments(gap: &str, c: char) -> Option<usize> {
    let mut i = 0;
    while let Some(found) = gap[i..].chars().next() {
        if let Ok(Some(end)) = comment_end(gap, i) {
            i = end;
            continue;
        }
        if found == c {
            return Some(i);
        }
        i += found.len_utf8();
    }
    None
}

/// Removes the first `c` that is not inside a comment.
fn remove_outside_comments(gap: &str, c: char) -> String {
    match find_outside_comments(gap, c) {
        Some(i) => format!("{}{}", &gap[..i], &gap[i + c.len_utf8()..]),
        None => gap.to_string(),
    }
}

/// Concatenates two pieces of tag source so that there is whitespace
/// between them, but no doubled whitespace.
fn join_with_space(a: &str, b: &str) -> String {
    if a.ends_with(char::is_whitespace) {
        format!("{a}{}", b.trim_start())
    } else if b.starts_with(char::is_whitespace) || a.is_empty() && b.is_empty() {
        format!("{a}{b}")
    } else {
        format!("{a} {b}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_outside_comments() {
        assert_eq!(find_outside_comments(" <#-- , --> , ", ','), Some(12));
        assert_eq!(find_outside_comments(" <#-- , --> ", ','), None);
        assert_eq!(find_outside_comments("\u{e9},", ','), Some(2));
    }

    #[test]
    fn test_join_with_space() {
        assert_eq!(join_with_space("a ", " b"), "a b");
        assert_eq!(join_with_space("a", " b"), "a b");
        assert_eq!(join_with_space("a", "b"), "a b");
        assert_eq!(join_with_space("", "p"), " p");
    }

    #[test]
    fn test_has_comment() {
        assert!(has_comment(" [!-- x --] "));
        assert!(!has_comment(" \n\t"));
    }
}
