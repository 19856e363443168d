/*!
# Expression Lexer

Tokenizes the expression parts of a template: directive parameters and the
inside of interpolations. Template text itself is scanned by the parser.

Whitespace and expression comments (`<#-- -->`, `<!-- -->`, `[#-- --]`,
`[!-- --]`) are skipped. The converter finds them again by looking at the
source between token spans.
*/

use std::collections::VecDeque;

use super::source::Span;
use super::{Dialect, TagSyntax};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    RawString,
    True,
    False,
    In,
    As,
    Using,
    Relational(RelOp),
    Equals,
    DoubleEquals,
    NotEquals,
    And,
    Or,
    Plus,
    Minus,
    Times,
    Divide,
    Percent,
    Exclamation,
    Exists,
    Question,
    Dot,
    DotDot,
    DotDotLess,
    DotDotStar,
    DotStar,
    DotDoubleStar,
    Ellipsis,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Colon,
    CompoundAssign,
    PlusPlus,
    MinusMinus,
    /// `>` or `]` closing a directive tag
    TagEnd,
    /// `/>` or `/]`
    EmptyTagEnd,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        self.span.text(src)
    }
}

/// Where the lexer is; decides how `>` and `]` are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    Tag(TagSyntax),
    Interpolation,
}

/// Error with a byte offset; turned into a row/column by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

pub type LexResult<T> = std::result::Result<T, SyntaxError>;

const COMMENT_STARTS: [&str; 4] = ["<#--", "<!--", "[#--", "[!--"];

pub fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$' || c == '@'
}

pub fn is_identifier_part(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit()
}

/// Removes the `\` escapes of `\-`, `\.`, `\:` and `\#` from an identifier.
pub fn unescape_identifier(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Returns the end of the comment starting at `pos`, if one starts there.
pub fn comment_end(src: &str, pos: usize) -> LexResult<Option<usize>> {
    let rest = &src[pos..];
    if !COMMENT_STARTS.iter().any(|start| rest.starts_with(start)) {
        return Ok(None);
    }
    let body = &rest[4..];
    let end = [body.find("-->"), body.find("--]")]
        .into_iter()
        .flatten()
        .min()
        .ok_or_else(|| SyntaxError::new("Unclosed comment", pos))?;
    Ok(Some(pos + 4 + end + 3))
}

/// Skips whitespace and expression comments starting at `pos`.
pub fn skip_trivia(src: &str, mut pos: usize) -> LexResult<usize> {
    loop {
        let rest = &src[pos..];
        let trimmed = rest.trim_start();
        pos += rest.len() - trimmed.len();
        match comment_end(src, pos)? {
            Some(end) => pos = end,
            None => return Ok(pos),
        }
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    mode: LexMode,
    dialect: Dialect,
    paren_depth: usize,
    bracket_depth: usize,
    lookahead: VecDeque<Token>,
    last_end: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, pos: usize, mode: LexMode, dialect: Dialect) -> Self {
        Self {
            src,
            pos,
            mode,
            dialect,
            paren_depth: 0,
            bracket_depth: 0,
            lookahead: VecDeque::new(),
            last_end: pos,
        }
    }

    pub fn src(&self) -> &'a str {
        self.src
    }

    /// End offset of the last consumed token.
    pub fn last_end(&self) -> usize {
        self.last_end
    }

    pub fn peek(&mut self) -> LexResult<Token> {
        self.peek_nth(0)
    }

    pub fn peek_nth(&mut self, n: usize) -> LexResult<Token> {
        while self.lookahead.len() <= n {
            let token = self.scan()?;
            self.lookahead.push_back(token);
        }
        Ok(self.lookahead[n])
    }

    pub fn next_token(&mut self) -> LexResult<Token> {
        let token = match self.lookahead.pop_front() {
            Some(token) => token,
            None => self.scan()?,
        };
        if token.kind != TokenKind::Eof {
            self.last_end = token.span.end;
        }
        Ok(token)
    }

    fn token(&mut self, kind: TokenKind, start: usize, len: usize) -> Token {
        self.pos = start + len;
        Token {
            kind,
            span: Span::new(start, start + len),
        }
    }

    fn scan(&mut self) -> LexResult<Token> {
        let start = skip_trivia(self.src, self.pos)?;
        self.pos = start;
        let rest = &self.src[start..];
        let Some(c) = rest.chars().next() else {
            return Ok(self.token(TokenKind::Eof, start, 0));
        };
        let modern = self.dialect == Dialect::Modern;
        let in_tag = matches!(self.mode, LexMode::Tag(_));
        let angle_tag = self.mode == LexMode::Tag(TagSyntax::AngleBracket);

        if c.is_ascii_digit() {
            return Ok(self.scan_number(start));
        }
        if c == 'r' && (rest[1..].starts_with('"') || rest[1..].starts_with('\'')) {
            return self.scan_string(start + 1, start, TokenKind::RawString);
        }
        if is_identifier_start(c) || (c == '\\' && starts_identifier_escape(&rest[1..])) {
            return Ok(self.scan_identifier(start));
        }

        let kind_len = match c {
            '"' | '\'' => return self.scan_string(start, start, TokenKind::String),
            '(' => {
                self.paren_depth += 1;
                (TokenKind::LParen, 1)
            }
            ')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                (TokenKind::RParen, 1)
            }
            '[' => {
                self.bracket_depth += 1;
                (TokenKind::LBracket, 1)
            }
            ']' => {
                if self.bracket_depth == 0 && in_tag {
                    (TokenKind::TagEnd, 1)
                } else {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    (TokenKind::RBracket, 1)
                }
            }
            '{' => (TokenKind::LBrace, 1),
            '}' => (TokenKind::RBrace, 1),
            ',' => (TokenKind::Comma, 1),
            ';' => (TokenKind::Semicolon, 1),
            ':' => (TokenKind::Colon, 1),
            '>' if angle_tag && self.paren_depth == 0 => (TokenKind::TagEnd, 1),
            '>' if rest.starts_with(">=") => (TokenKind::Relational(RelOp::Ge), 2),
            '>' => (TokenKind::Relational(RelOp::Gt), 1),
            '<' if rest.starts_with("<=") => (TokenKind::Relational(RelOp::Le), 2),
            '<' => (TokenKind::Relational(RelOp::Lt), 1),
            '/' if angle_tag && self.paren_depth == 0 && rest.starts_with("/>") => {
                (TokenKind::EmptyTagEnd, 2)
            }
            '/' if in_tag && self.bracket_depth == 0 && rest.starts_with("/]") => {
                (TokenKind::EmptyTagEnd, 2)
            }
            '/' if rest.starts_with("/=") => (TokenKind::CompoundAssign, 2),
            '/' => (TokenKind::Divide, 1),
            '=' if rest.starts_with("==") => (TokenKind::DoubleEquals, 2),
            '=' => (TokenKind::Equals, 1),
            '!' if rest.starts_with("!=") => (TokenKind::NotEquals, 2),
            '!' => (TokenKind::Exclamation, 1),
            '?' if rest.starts_with("??") => (TokenKind::Exists, 2),
            '?' => (TokenKind::Question, 1),
            '+' if rest.starts_with("++") => (TokenKind::PlusPlus, 2),
            '+' if rest.starts_with("+=") => (TokenKind::CompoundAssign, 2),
            '+' => (TokenKind::Plus, 1),
            '-' if rest.starts_with("--") => (TokenKind::MinusMinus, 2),
            '-' if rest.starts_with("-=") => (TokenKind::CompoundAssign, 2),
            '-' => (TokenKind::Minus, 1),
            '*' if rest.starts_with("*=") => (TokenKind::CompoundAssign, 2),
            '*' => (TokenKind::Times, 1),
            '%' if rest.starts_with("%=") => (TokenKind::CompoundAssign, 2),
            '%' => (TokenKind::Percent, 1),
            '.' => self.dot_kind(rest),
            '&' if rest.starts_with("&&") => (TokenKind::And, 2),
            '|' if rest.starts_with("||") => (TokenKind::Or, 2),
            '&' | '|' | '\\' if !modern => match legacy_operator(rest) {
                Some(kind_len) => kind_len,
                None => return Err(SyntaxError::new(format!("Unexpected character: {c:?}"), start)),
            },
            _ => return Err(SyntaxError::new(format!("Unexpected character: {c:?}"), start)),
        };
        let (kind, len) = kind_len;
        Ok(self.token(kind, start, len))
    }

    fn dot_kind(&self, rest: &str) -> (TokenKind, usize) {
        if rest.starts_with("...") {
            (TokenKind::Ellipsis, 3)
        } else if rest.starts_with("..<") || rest.starts_with("..!") {
            (TokenKind::DotDotLess, 3)
        } else if rest.starts_with("..*") {
            (TokenKind::DotDotStar, 3)
        } else if rest.starts_with("..") {
            (TokenKind::DotDot, 2)
        } else if rest.starts_with(".**") {
            (TokenKind::DotDoubleStar, 3)
        } else if rest.starts_with(".*") {
            (TokenKind::DotStar, 2)
        } else {
            (TokenKind::Dot, 1)
        }
    }

    fn scan_number(&mut self, start: usize) -> Token {
        let bytes = self.src.as_bytes();
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
        self.token(TokenKind::Number, start, end - start)
    }

    fn scan_identifier(&mut self, start: usize) -> Token {
        let mut end = start;
        let rest = &self.src[start..];
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\\' && starts_identifier_escape(&rest[i + 1..]) {
                chars.next();
                end = start + i + 2;
            } else if is_identifier_part(c) {
                end = start + i + c.len_utf8();
            } else {
                break;
            }
        }
        let text = &self.src[start..end];
        let kind = keyword_kind(text, self.dialect).unwrap_or(TokenKind::Identifier);
        self.token(kind, start, end - start)
    }

    /// `quote_pos` is where the opening quote is, `start` where the token starts
    /// (they differ for raw strings).
    fn scan_string(&mut self, quote_pos: usize, start: usize, kind: TokenKind) -> LexResult<Token> {
        let bytes = self.src.as_bytes();
        let quote = bytes[quote_pos];
        let raw = kind == TokenKind::RawString;
        let mut i = quote_pos + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if !raw => i += 2,
                b if b == quote => return Ok(self.token(kind, start, i + 1 - start)),
                _ => i += 1,
            }
        }
        Err(SyntaxError::new("Unclosed string literal", start))
    }
}

fn starts_identifier_escape(rest: &str) -> bool {
    matches!(rest.chars().next(), Some('-' | '.' | ':' | '#'))
}

fn keyword_kind(text: &str, dialect: Dialect) -> Option<TokenKind> {
    let kind = match (text, dialect) {
        ("true", _) => TokenKind::True,
        ("false", _) => TokenKind::False,
        ("in", _) => TokenKind::In,
        ("as", _) => TokenKind::As,
        ("using", _) => TokenKind::Using,
        ("lt", _) => TokenKind::Relational(RelOp::Lt),
        ("gt", _) => TokenKind::Relational(RelOp::Gt),
        ("lte", Dialect::Legacy) | ("le", Dialect::Modern) => TokenKind::Relational(RelOp::Le),
        ("gte", Dialect::Legacy) | ("ge", Dialect::Modern) => TokenKind::Relational(RelOp::Ge),
        ("and", Dialect::Modern) => TokenKind::And,
        ("or", Dialect::Modern) => TokenKind::Or,
        _ => return None,
    };
    Some(kind)
}

/// The escaped operator spellings only FreeMarker 2 has.
fn legacy_operator(rest: &str) -> Option<(TokenKind, usize)> {
    const TABLE: &[(&str, TokenKind)] = &[
        ("&amp;&amp;", TokenKind::And),
        ("&lt;=", TokenKind::Relational(RelOp::Le)),
        ("&lt;", TokenKind::Relational(RelOp::Lt)),
        ("&gt;=", TokenKind::Relational(RelOp::Ge)),
        ("&gt;", TokenKind::Relational(RelOp::Gt)),
        ("&", TokenKind::And),
        ("|", TokenKind::Or),
        ("\\and", TokenKind::And),
        ("\\lte", TokenKind::Relational(RelOp::Le)),
        ("\\lt", TokenKind::Relational(RelOp::Lt)),
        ("\\gte", TokenKind::Relational(RelOp::Ge)),
        ("\\gt", TokenKind::Relational(RelOp::Gt)),
    ];
    TABLE
        .iter()
        .find(|(text, _)| rest.starts_with(text))
        .map(|(text, kind)| (*kind, text.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, mode: LexMode, dialect: Dialect) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, 0, mode, dialect);
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token.kind == TokenKind::Eof {
                break;
            }
            kinds.push(token.kind);
        }
        kinds
    }

    #[test]
    fn test_angle_tag_end_outside_parentheses() {
        use TokenKind::*;
        let tag = LexMode::Tag(TagSyntax::AngleBracket);
        assert_eq!(
            kinds("x > 1", tag, Dialect::Legacy),
            vec![Identifier, TagEnd, Number]
        );
        assert_eq!(
            kinds("(x > 1)", tag, Dialect::Legacy),
            vec![LParen, Identifier, Relational(RelOp::Gt), Number, RParen]
        );
        assert_eq!(kinds("x]", tag, Dialect::Legacy), vec![Identifier, TagEnd]);
        assert_eq!(kinds("x[0]/>", tag, Dialect::Legacy), vec![Identifier, LBracket, Number, RBracket, EmptyTagEnd]);
    }

    #[test]
    fn test_comments_are_trivia() {
        use TokenKind::*;
        assert_eq!(
            kinds("a <#-- c --> + <!-- d --> b [#-- e --]", LexMode::Interpolation, Dialect::Legacy),
            vec![Identifier, Plus, Identifier]
        );
    }

    #[test]
    fn test_legacy_operator_spellings() {
        use TokenKind::*;
        let found = kinds(
            "a &amp;&amp; b \\and c & d | e lte f \\gt g &lt;= h",
            LexMode::Interpolation,
            Dialect::Legacy,
        );
        assert_eq!(
            found,
            vec![
                Identifier, And, Identifier, And, Identifier, And, Identifier, Or, Identifier,
                Relational(RelOp::Le), Identifier, Relational(RelOp::Gt), Identifier,
                Relational(RelOp::Le), Identifier
            ]
        );
    }

    #[test]
    fn test_modern_keywords() {
        use TokenKind::*;
        assert_eq!(
            kinds("a and b or c le d", LexMode::Interpolation, Dialect::Modern),
            vec![Identifier, And, Identifier, Or, Identifier, Relational(RelOp::Le), Identifier]
        );
        assert_eq!(
            kinds("a and b", LexMode::Interpolation, Dialect::Legacy),
            vec![Identifier, Identifier, Identifier]
        );
        let mut lexer = Lexer::new("a & b", 0, LexMode::Interpolation, Dialect::Modern);
        lexer.next_token().unwrap();
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_ranges_and_numbers() {
        use TokenKind::*;
        assert_eq!(
            kinds("1..9 1..<2 1..*3 1.5", LexMode::Interpolation, Dialect::Legacy),
            vec![Number, DotDot, Number, Number, DotDotLess, Number, Number, DotDotStar, Number, Number]
        );
    }

    #[test]
    fn test_strings_and_escaped_identifiers() {
        let src = r#"'a\'b' r"c\d" foo\-bar"#;
        let mut lexer = Lexer::new(src, 0, LexMode::Interpolation, Dialect::Legacy);
        let t1 = lexer.next_token().unwrap();
        assert_eq!((t1.kind, t1.text(src)), (TokenKind::String, r"'a\'b'"));
        let t2 = lexer.next_token().unwrap();
        assert_eq!((t2.kind, t2.text(src)), (TokenKind::RawString, r#"r"c\d""#));
        let t3 = lexer.next_token().unwrap();
        assert_eq!(unescape_identifier(t3.text(src)), "foo-bar");
    }

    #[test]
    fn test_unclosed_comment() {
        assert!(skip_trivia("  <#-- x", 0).is_err());
        assert_eq!(skip_trivia(" <#-- x --> y", 0).unwrap(), 12);
    }
}
