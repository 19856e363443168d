use crate::error::Position;

/// Byte range into a template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }

    pub fn to(&self, other: Span) -> Span {
        Span::new(self.start, other.end)
    }
}

/// Maps byte offsets to 1-based row/column positions.
///
/// `\n`, `\r\n` and a lone `\r` each end a line. Every character, tab included,
/// counts as one column.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(src: &str) -> Self {
        let bytes = src.as_bytes();
        let mut line_starts = vec![0];
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => line_starts.push(i + 1),
                b'\r' => {
                    if bytes.get(i + 1) == Some(&b'\n') {
                        i += 1;
                    }
                    line_starts.push(i + 1);
                }
                _ => {}
            }
            i += 1;
        }
        Self { line_starts }
    }

    pub fn position(&self, src: &str, offset: usize) -> Position {
        let offset = offset.min(src.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let column = src
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - line_start);
        Position::new(line + 1, column + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions() {
        let src = "ab\ncd\r\nef\rg\th";
        let index = LineIndex::new(src);
        assert_eq!(index.position(src, 0), Position::new(1, 1));
        assert_eq!(index.position(src, 1), Position::new(1, 2));
        assert_eq!(index.position(src, 3), Position::new(2, 1));
        assert_eq!(index.position(src, 7), Position::new(3, 1));
        assert_eq!(index.position(src, 10), Position::new(4, 1));
        assert_eq!(index.position(src, 12), Position::new(4, 3));
    }

    #[test]
    fn test_columns_count_characters() {
        let src = "\u{e9}\u{e9}x";
        let index = LineIndex::new(src);
        assert_eq!(index.position(src, 4), Position::new(1, 3));
    }
}
