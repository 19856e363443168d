// Template parser
//
// Template text is scanned directly for interpolations, comments and tags;
// the inside of tags and interpolations goes through the expression lexer.
// The same parser reads FreeMarker 3 output (`Dialect::Modern`) for
// validation, with the stricter rules of that language switched on.

use super::ast::*;
use super::lexer::{unescape_identifier, LexMode, LexResult, Lexer, SyntaxError, Token, TokenKind};
use super::source::Span;
use super::strings;
use super::{Dialect, ParseOptions, TagSyntax, TagSyntaxSetting, Template};
use crate::naming::{self, LegacyOutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    If,
    ElseIf,
    Else,
    Switch,
    Case,
    Default,
    Break,
    List,
    Foreach,
    Items,
    Sep,
    Macro,
    Function,
    Nested,
    Return,
    Assign(AssignScope),
    Attempt,
    Recover,
    NoParse,
    Comment,
    Block(BlockKind),
    Escape,
    OutputFormat,
    Simple(SimpleKind),
    Stop,
    Import,
    Include,
    Setting,
    Visit,
    Recurse,
    Call,
    Transform,
    Ftl,
}

/// Directive names with the dialects accepting them: (name, kind, legacy, modern).
const DIRECTIVES: &[(&str, Directive, bool, bool)] = &[
    ("if", Directive::If, true, true),
    ("elseif", Directive::ElseIf, true, false),
    ("elseIf", Directive::ElseIf, true, true),
    ("else", Directive::Else, true, true),
    ("switch", Directive::Switch, true, true),
    ("case", Directive::Case, true, true),
    ("default", Directive::Default, true, true),
    ("break", Directive::Break, true, true),
    ("list", Directive::List, true, true),
    ("foreach", Directive::Foreach, true, false),
    ("forEach", Directive::Foreach, true, false),
    ("items", Directive::Items, true, true),
    ("sep", Directive::Sep, true, true),
    ("macro", Directive::Macro, true, true),
    ("function", Directive::Function, true, true),
    ("nested", Directive::Nested, true, true),
    ("return", Directive::Return, true, true),
    ("assign", Directive::Assign(AssignScope::Assign), true, true),
    ("global", Directive::Assign(AssignScope::Global), true, true),
    ("local", Directive::Assign(AssignScope::Local), true, true),
    ("attempt", Directive::Attempt, true, true),
    ("recover", Directive::Recover, true, true),
    ("noparse", Directive::NoParse, true, false),
    ("noParse", Directive::NoParse, true, true),
    ("comment", Directive::Comment, true, false),
    ("compress", Directive::Block(BlockKind::Compress), true, true),
    ("escape", Directive::Escape, true, true),
    ("noescape", Directive::Block(BlockKind::NoEscape), true, false),
    ("noEscape", Directive::Block(BlockKind::NoEscape), true, true),
    ("autoesc", Directive::Block(BlockKind::AutoEsc), true, false),
    ("autoEsc", Directive::Block(BlockKind::AutoEsc), true, true),
    ("noautoesc", Directive::Block(BlockKind::NoAutoEsc), true, false),
    ("noAutoEsc", Directive::Block(BlockKind::NoAutoEsc), true, true),
    ("outputformat", Directive::OutputFormat, true, false),
    ("outputFormat", Directive::OutputFormat, true, true),
    ("flush", Directive::Simple(SimpleKind::Flush), true, true),
    ("fallback", Directive::Simple(SimpleKind::Fallback), true, true),
    ("t", Directive::Simple(SimpleKind::T), true, true),
    ("lt", Directive::Simple(SimpleKind::Lt), true, true),
    ("rt", Directive::Simple(SimpleKind::Rt), true, true),
    ("nt", Directive::Simple(SimpleKind::Nt), true, true),
    ("stop", Directive::Stop, true, true),
    ("import", Directive::Import, true, true),
    ("include", Directive::Include, true, true),
    ("setting", Directive::Setting, true, true),
    ("visit", Directive::Visit, true, true),
    ("recurse", Directive::Recurse, true, true),
    ("call", Directive::Call, true, false),
    ("transform", Directive::Transform, true, false),
    ("ftl", Directive::Ftl, true, true),
];

/// Upper bound of the `m`/`M` digit counts in `#{...; mXMY}`
const MAX_FRACTION_DIGITS: u32 = 50;

const IF_SEPARATORS: &[&str] = &["elseif", "elseIf", "else"];
const LIST_SEPARATORS: &[&str] = &["else"];
const SWITCH_SEPARATORS: &[&str] = &["case", "default"];
const ATTEMPT_SEPARATORS: &[&str] = &["recover"];

/// Something special found in template text.
#[derive(Debug, Clone, PartialEq)]
enum Markup {
    Interpolation,
    NumericalInterpolation,
    Comment(TagSyntax),
    Start {
        syntax: TagSyntax,
        name: String,
        name_end: usize,
    },
    End {
        syntax: TagSyntax,
        name: String,
        name_end: usize,
    },
    UserStart(TagSyntax),
    UserEnd(TagSyntax),
}

type PResult<T> = LexResult<T>;

pub(super) struct Parser<'a> {
    src: &'a str,
    pos: usize,
    options: &'a ParseOptions<'a>,
    dialect: Dialect,
    syntax: Option<TagSyntax>,
    lex: Lexer<'a>,
    output_formats: Vec<LegacyOutputFormat>,
    macro_depth: usize,
    /// Parsing the decoded value of a string literal: interpolations only
    in_string: bool,
    encoding: Option<String>,
}

impl<'a> Parser<'a> {
    pub(super) fn new(src: &'a str, options: &'a ParseOptions<'a>) -> Self {
        let syntax = match options.tag_syntax {
            TagSyntaxSetting::AngleBracket => Some(TagSyntax::AngleBracket),
            TagSyntaxSetting::SquareBracket => Some(TagSyntax::SquareBracket),
            TagSyntaxSetting::AutoDetect => None,
        };
        Self {
            src,
            pos: 0,
            options,
            dialect: options.dialect,
            syntax,
            lex: Lexer::new(src, 0, LexMode::Interpolation, options.dialect),
            output_formats: vec![options.output_format.clone()],
            macro_depth: 0,
            in_string: false,
            encoding: None,
        }
    }

    fn string_parser<'b>(&'b self, src: &'b str) -> Parser<'b> {
        Parser {
            src,
            pos: 0,
            options: self.options,
            dialect: self.dialect,
            syntax: self.syntax,
            lex: Lexer::new(src, 0, LexMode::Interpolation, self.dialect),
            output_formats: self.output_formats.clone(),
            macro_depth: self.macro_depth,
            in_string: true,
            encoding: None,
        }
    }

    pub(super) fn parse_template(mut self) -> PResult<Template> {
        let mut elements = self.parse_header()?;
        let body = self.parse_elements(&[])?;
        elements.extend(body);
        if self.pos < self.src.len() {
            return Err(self.unexpected_markup_error(self.pos));
        }
        let output_format = self.output_formats.swap_remove(0);
        Ok(Template {
            elements,
            tag_syntax: self.syntax(),
            encoding: self.encoding,
            output_format,
        })
    }

    fn syntax(&self) -> TagSyntax {
        self.syntax.unwrap_or(TagSyntax::AngleBracket)
    }

    fn fix_syntax(&mut self, syntax: TagSyntax) {
        if self.syntax.is_none() {
            self.syntax = Some(syntax);
        }
    }

    fn tag_end_char(&self) -> char {
        match self.syntax() {
            TagSyntax::AngleBracket => '>',
            TagSyntax::SquareBracket => ']',
        }
    }

    fn current_output_format(&self) -> &LegacyOutputFormat {
        // The stack is never empty: the template's own format is at the bottom.
        &self.output_formats[self.output_formats.len() - 1]
    }

    fn resolve_output_format(&self, name: &str) -> Option<LegacyOutputFormat> {
        match self.options.settings {
            Some(settings) => settings.resolve_output_format(name),
            None => LegacyOutputFormat::standard(name),
        }
    }

    // -----------------------------------------------------------------------
    // Template text
    // -----------------------------------------------------------------------

    fn markup_at(&self, pos: usize) -> Option<Markup> {
        let rest = &self.src[pos..];
        if rest.starts_with("${") {
            return Some(Markup::Interpolation);
        }
        if rest.starts_with("#{") && self.dialect == Dialect::Legacy {
            return Some(Markup::NumericalInterpolation);
        }
        if self.in_string {
            return None;
        }
        let syntax = match rest.as_bytes().first() {
            Some(b'<') => TagSyntax::AngleBracket,
            Some(b'[') => TagSyntax::SquareBracket,
            _ => return None,
        };
        if self.syntax.is_some_and(|s| s != syntax) {
            return None;
        }
        let after = &rest[1..];
        if after.starts_with("#--") {
            Some(Markup::Comment(syntax))
        } else if let Some(name_start) = after.strip_prefix('#').map(|_| pos + 2) {
            let (name, name_end) = self.read_name(name_start)?;
            Some(Markup::Start {
                syntax,
                name,
                name_end,
            })
        } else if after.starts_with("/#") {
            let (name, name_end) = self.read_name(pos + 3)?;
            Some(Markup::End {
                syntax,
                name,
                name_end,
            })
        } else if let Some(callee) = after.strip_prefix('@') {
            match callee.chars().next() {
                Some(c) if !c.is_whitespace() && c != '>' && c != ']' => {
                    Some(Markup::UserStart(syntax))
                }
                _ => None,
            }
        } else if after.starts_with("/@") {
            Some(Markup::UserEnd(syntax))
        } else {
            None
        }
    }

    fn read_name(&self, start: usize) -> Option<(String, usize)> {
        let len = self.src[start..]
            .bytes()
            .take_while(|b| b.is_ascii_alphabetic())
            .count();
        (len > 0).then(|| (self.src[start..start + len].to_string(), start + len))
    }

    fn find_markup(&self, from: usize) -> Option<(usize, Markup)> {
        let bytes = self.src.as_bytes();
        (from..bytes.len())
            .filter(|&i| matches!(bytes[i], b'$' | b'#' | b'<' | b'['))
            .find_map(|i| self.markup_at(i).map(|markup| (i, markup)))
    }

    fn push_text(&self, elements: &mut Vec<Element>, until: usize) {
        if until > self.pos {
            elements.push(Element::Text(Span::new(self.pos, until)));
        }
    }

    /// Parses elements until the end of input, an end tag, or a start tag
    /// named in `separators`. The terminating tag is left unconsumed.
    fn parse_elements(&mut self, separators: &[&str]) -> PResult<Vec<Element>> {
        let mut elements = Vec::new();
        loop {
            let Some((at, markup)) = self.find_markup(self.pos) else {
                self.push_text(&mut elements, self.src.len());
                self.pos = self.src.len();
                return Ok(elements);
            };
            self.push_text(&mut elements, at);
            self.pos = at;
            match markup {
                Markup::Interpolation => {
                    let element = self.parse_interpolation()?;
                    elements.push(element);
                }
                Markup::NumericalInterpolation => {
                    let element = self.parse_numerical_interpolation()?;
                    elements.push(element);
                }
                Markup::Comment(syntax) => {
                    let end = self.template_comment_end(at, syntax)?;
                    elements.push(Element::Comment(Span::new(at, end)));
                    self.pos = end;
                }
                Markup::Start {
                    syntax,
                    name,
                    name_end,
                } => {
                    self.fix_syntax(syntax);
                    if separators.contains(&name.as_str()) {
                        return Ok(elements);
                    }
                    let element = self.parse_directive(name, name_end, separators)?;
                    elements.push(element);
                }
                Markup::End { syntax, .. } | Markup::UserEnd(syntax) => {
                    self.fix_syntax(syntax);
                    return Ok(elements);
                }
                Markup::UserStart(syntax) => {
                    self.fix_syntax(syntax);
                    let element = self.parse_user_directive()?;
                    elements.push(element);
                }
            }
        }
    }

    fn template_comment_end(&self, start: usize, syntax: TagSyntax) -> PResult<usize> {
        let terminator = match syntax {
            TagSyntax::AngleBracket => "-->",
            TagSyntax::SquareBracket => "--]",
        };
        self.src[start + 4..]
            .find(terminator)
            .map(|i| start + 4 + i + terminator.len())
            .ok_or_else(|| SyntaxError::new("Unclosed comment", start))
    }

    fn unexpected_markup_error(&self, pos: usize) -> SyntaxError {
        match self.markup_at(pos) {
            Some(Markup::End { name, .. }) => SyntaxError::new(
                format!("Unexpected end tag: #{name} has no matching start tag"),
                pos,
            ),
            Some(Markup::Start { name, .. }) => {
                SyntaxError::new(format!("Unexpected #{name} directive"), pos)
            }
            Some(Markup::UserEnd(_)) => {
                SyntaxError::new("Unexpected user directive end tag", pos)
            }
            _ => SyntaxError::new("Unexpected content", pos),
        }
    }

    // -----------------------------------------------------------------------
    // #ftl header
    // -----------------------------------------------------------------------

    /// Parses the leading whitespace, comments and `#ftl` header, if there is
    /// a header. Otherwise nothing is consumed.
    fn parse_header(&mut self) -> PResult<Vec<Element>> {
        let mut prefix = Vec::new();
        let mut pos = 0;
        loop {
            let rest = &self.src[pos..];
            let ws = rest.len() - rest.trim_start().len();
            if ws > 0 {
                prefix.push(Element::Text(Span::new(pos, pos + ws)));
                pos += ws;
            }
            let rest = &self.src[pos..];
            let syntax = if rest.starts_with("<#--") {
                TagSyntax::AngleBracket
            } else if rest.starts_with("[#--") {
                TagSyntax::SquareBracket
            } else {
                break;
            };
            if self.syntax.is_some_and(|s| s != syntax) {
                break;
            }
            let end = self.template_comment_end(pos, syntax)?;
            prefix.push(Element::Comment(Span::new(pos, end)));
            pos = end;
        }
        let rest = &self.src[pos..];
        let syntax = if rest.starts_with("<#ftl") {
            TagSyntax::AngleBracket
        } else if rest.starts_with("[#ftl") {
            TagSyntax::SquareBracket
        } else {
            return Ok(Vec::new());
        };
        if rest[5..].starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Ok(Vec::new());
        }
        self.syntax = Some(syntax);
        self.pos = pos;
        let header = self.parse_header_tag(pos + 5)?;
        prefix.push(header);
        Ok(prefix)
    }

    fn parse_header_tag(&mut self, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let mut params = Vec::new();
        loop {
            let token = self.lex.peek()?;
            match token.kind {
                TokenKind::TagEnd | TokenKind::EmptyTagEnd => break,
                TokenKind::Comma if !params.is_empty() => {
                    self.lex.next_token()?;
                }
                _ => {}
            }
            let (name, name_span) = self.expect_identifier("header parameter name")?;
            let known = match self.dialect {
                Dialect::Legacy => naming::is_fm2_header_param(&name),
                Dialect::Modern => naming::is_fm3_header_param(&name),
            };
            if !known {
                return Err(SyntaxError::new(
                    format!("Unknown #ftl header parameter: {name}"),
                    name_span.start,
                ));
            }
            self.expect(TokenKind::Equals, "=")?;
            let value = self.parse_expression()?;
            match name.as_str() {
                "encoding" => {
                    self.encoding = Some(self.literal_string(&value, "encoding")?);
                }
                "output_format" | "outputFormat" => {
                    let format_name = self.literal_string(&value, "output format")?;
                    let format = self.resolve_output_format(&format_name).ok_or_else(|| {
                        SyntaxError::new(
                            format!("Unregistered output format name: {format_name:?}"),
                            value.start(),
                        )
                    })?;
                    self.output_formats[0] = format;
                }
                _ => {}
            }
            params.push(NamedArg {
                name,
                name_span,
                value,
            });
        }
        let tag = self.finish_start_tag(start, "ftl", name_end)?;
        Ok(Element::Header(Header { tag, params }))
    }

    fn literal_string(&self, value: &Expr, what: &str) -> PResult<String> {
        match value {
            Expr::String(lit) if lit.interpolations.is_none() => Ok(lit.value.clone()),
            _ => Err(SyntaxError::new(
                format!("The {what} must be a string literal"),
                value.start(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Tag helpers
    // -----------------------------------------------------------------------

    fn begin_tag(&mut self, from: usize) {
        self.lex = Lexer::new(self.src, from, LexMode::Tag(self.syntax()), self.dialect);
    }

    fn expect_tag_close(&mut self) -> PResult<Span> {
        let token = self.lex.next_token()?;
        match token.kind {
            TokenKind::TagEnd | TokenKind::EmptyTagEnd => {
                self.pos = token.span.end;
                Ok(token.span)
            }
            _ => Err(self.unexpected(token, "end of tag")),
        }
    }

    fn finish_start_tag(&mut self, start: usize, name: &str, name_end: usize) -> PResult<StartTag> {
        let close = self.expect_tag_close()?;
        Ok(StartTag {
            span: Span::new(start, close.end),
            name: name.to_string(),
            name_end,
            close,
        })
    }

    /// Start tag without parameters at the current position.
    fn parse_plain_start_tag(&mut self, name: &str, name_end: usize) -> PResult<StartTag> {
        let start = self.pos;
        self.begin_tag(name_end);
        self.finish_start_tag(start, name, name_end)
    }

    fn end_names(&self, legacy: &'static [&'static str], modern: &'static [&'static str]) -> &'static [&'static str] {
        match self.dialect {
            Dialect::Legacy => legacy,
            Dialect::Modern => modern,
        }
    }

    fn parse_end_tag(&mut self, names: &[&str], opener: &StartTag) -> PResult<EndTag> {
        let pos = self.pos;
        if pos >= self.src.len() {
            return Err(SyntaxError::new(
                format!("Unclosed #{} directive", opener.name),
                opener.span.start,
            ));
        }
        match self.markup_at(pos) {
            Some(Markup::End { name, name_end, .. }) => {
                if !names.contains(&name.as_str()) {
                    return Err(SyntaxError::new(
                        format!(
                            "Expected the end tag of #{}, but found the end tag of #{name}",
                            opener.name
                        ),
                        pos,
                    ));
                }
                let rest = &self.src[name_end..];
                let close_at = name_end + (rest.len() - rest.trim_start().len());
                let close_char = self.src[close_at..].chars().next();
                let accepted = close_char == Some(self.tag_end_char())
                    || (self.dialect == Dialect::Legacy && close_char == Some(']'));
                if !accepted {
                    return Err(SyntaxError::new("Malformed end tag", close_at));
                }
                self.pos = close_at + 1;
                Ok(EndTag {
                    span: Span::new(pos, close_at + 1),
                    name,
                    name_end,
                    close: Span::new(close_at, close_at + 1),
                })
            }
            _ => Err(self.unexpected_markup_error(pos)),
        }
    }

    /// Start tag name at the current position, if a directive starts here.
    fn start_tag_here(&self) -> Option<(String, usize)> {
        match self.markup_at(self.pos) {
            Some(Markup::Start { name, name_end, .. }) => Some((name, name_end)),
            _ => None,
        }
    }

    fn lookup_directive(&self, name: &str, at: usize) -> PResult<Directive> {
        DIRECTIVES
            .iter()
            .find(|(n, _, legacy, modern)| {
                *n == name
                    && match self.dialect {
                        Dialect::Legacy => *legacy,
                        Dialect::Modern => *modern,
                    }
            })
            .map(|(_, directive, _, _)| *directive)
            .ok_or_else(|| SyntaxError::new(format!("Unknown directive: #{name}"), at))
    }

    // -----------------------------------------------------------------------
    // Directives
    // -----------------------------------------------------------------------

    fn parse_directive(&mut self, name: String, name_end: usize, separators: &[&str]) -> PResult<Element> {
        let start = self.pos;
        let directive = self.lookup_directive(&name, start)?;
        match directive {
            Directive::If => self.parse_if(name, name_end),
            Directive::Switch => self.parse_switch(name, name_end),
            Directive::List | Directive::Foreach => self.parse_list(name, name_end, directive),
            Directive::Items => self.parse_items(name, name_end),
            Directive::Sep => {
                let tag = self.parse_plain_start_tag(&name, name_end)?;
                let body = self.parse_elements(separators)?;
                let end = match self.markup_at(self.pos) {
                    Some(Markup::End { name, .. }) if name == "sep" => {
                        Some(self.parse_end_tag(&["sep"], &tag)?)
                    }
                    _ => None,
                };
                Ok(Element::Sep(SepBlock { tag, body, end }))
            }
            Directive::Break => Ok(Element::Break(self.parse_plain_start_tag(&name, name_end)?)),
            Directive::Macro | Directive::Function => {
                self.parse_macro(name, name_end, directive == Directive::Function)
            }
            Directive::Nested => self.parse_nested(name, name_end),
            Directive::Return => {
                self.begin_tag(name_end);
                let value = if self.at_tag_close()? {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                let tag = self.finish_start_tag(start, &name, name_end)?;
                Ok(Element::Return(ReturnDirective { tag, value }))
            }
            Directive::Assign(scope) => self.parse_assign(name, name_end, scope),
            Directive::Attempt => self.parse_attempt(name, name_end),
            Directive::NoParse | Directive::Comment => {
                let tag = self.parse_plain_start_tag(&name, name_end)?;
                let names: &[&str] = if directive == Directive::Comment {
                    &["comment"]
                } else {
                    self.end_names(&["noparse", "noParse"], &["noParse"])
                };
                let content_end = self.find_raw_end(names, &tag)?;
                let content = Span::new(self.pos, content_end);
                self.pos = content_end;
                let end = self.parse_end_tag(names, &tag)?;
                let block = RawBlock { tag, content, end };
                Ok(if directive == Directive::Comment {
                    Element::LegacyComment(block)
                } else {
                    Element::NoParse(block)
                })
            }
            Directive::Block(kind) => {
                let tag = self.parse_plain_start_tag(&name, name_end)?;
                if kind == BlockKind::AutoEsc && !self.current_output_format().is_markup() {
                    return Err(SyntaxError::new(
                        format!(
                            "The #{name} directive can only be used where the current output format is a markup format, but it's {}",
                            self.current_output_format().name()
                        ),
                        start,
                    ));
                }
                let body = self.parse_elements(&[])?;
                let names: &[&str] = match kind {
                    BlockKind::Compress => &["compress"],
                    BlockKind::AutoEsc => self.end_names(&["autoesc", "autoEsc"], &["autoEsc"]),
                    BlockKind::NoAutoEsc => {
                        self.end_names(&["noautoesc", "noAutoEsc"], &["noAutoEsc"])
                    }
                    BlockKind::NoEscape => self.end_names(&["noescape", "noEscape"], &["noEscape"]),
                };
                let end = self.parse_end_tag(names, &tag)?;
                Ok(Element::Block(GenericBlock {
                    tag,
                    kind,
                    body,
                    end,
                }))
            }
            Directive::Escape => {
                self.begin_tag(name_end);
                let var = self.expect_name("loop variable name")?;
                self.expect(TokenKind::As, "as")?;
                let expr = self.parse_expression()?;
                let tag = self.finish_start_tag(start, &name, name_end)?;
                let body = self.parse_elements(&[])?;
                let end = self.parse_end_tag(&["escape"], &tag)?;
                Ok(Element::Escape(EscapeBlock {
                    tag,
                    var,
                    expr,
                    body,
                    end,
                }))
            }
            Directive::OutputFormat => {
                self.begin_tag(name_end);
                let value = self.parse_expression()?;
                let format_name = self.literal_string(&value, "output format name")?;
                let format = self.resolve_output_format(&format_name).ok_or_else(|| {
                    SyntaxError::new(
                        format!("Unregistered output format name: {format_name:?}"),
                        value.start(),
                    )
                })?;
                let tag = self.finish_start_tag(start, &name, name_end)?;
                self.output_formats.push(format);
                let body = self.parse_elements(&[]);
                self.output_formats.pop();
                let body = body?;
                let names = self.end_names(&["outputformat", "outputFormat"], &["outputFormat"]);
                let end = self.parse_end_tag(names, &tag)?;
                Ok(Element::OutputFormat(OutputFormatBlock {
                    tag,
                    value,
                    body,
                    end,
                }))
            }
            Directive::Simple(kind) => {
                let tag = self.parse_plain_start_tag(&name, name_end)?;
                Ok(Element::Simple(SimpleDirective { tag, kind }))
            }
            Directive::Stop => {
                self.begin_tag(name_end);
                let message = if self.at_tag_close()? {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                let tag = self.finish_start_tag(start, &name, name_end)?;
                Ok(Element::Stop(StopDirective { tag, message }))
            }
            Directive::Import => {
                self.begin_tag(name_end);
                let path = self.parse_expression()?;
                self.expect(TokenKind::As, "as")?;
                let namespace = self.expect_name("namespace name")?;
                let tag = self.finish_start_tag(start, &name, name_end)?;
                Ok(Element::Import(ImportDirective {
                    tag,
                    path,
                    namespace,
                }))
            }
            Directive::Include => self.parse_include(name, name_end),
            Directive::Setting => {
                self.begin_tag(name_end);
                let setting = self.expect_name("setting name")?;
                let known = match self.dialect {
                    Dialect::Legacy => naming::is_fm2_setting(&setting.name),
                    Dialect::Modern => naming::is_fm3_setting(&setting.name),
                };
                if !known {
                    return Err(SyntaxError::new(
                        format!("Unknown setting name: {}", setting.name),
                        setting.span.start,
                    ));
                }
                self.expect(TokenKind::Equals, "=")?;
                let value = self.parse_expression()?;
                let tag = self.finish_start_tag(start, &name, name_end)?;
                Ok(Element::Setting(SettingDirective {
                    tag,
                    name: setting,
                    value,
                }))
            }
            Directive::Visit | Directive::Recurse => {
                let recurse = directive == Directive::Recurse;
                self.begin_tag(name_end);
                let node = if recurse
                    && (self.at_tag_close()? || self.lex.peek()?.kind == TokenKind::Using)
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                let namespace = if self.lex.peek()?.kind == TokenKind::Using {
                    self.lex.next_token()?;
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                let tag = self.finish_start_tag(start, &name, name_end)?;
                Ok(Element::Visit(VisitDirective {
                    tag,
                    recurse,
                    node,
                    namespace,
                }))
            }
            Directive::Call => self.parse_call(name, name_end),
            Directive::Transform => self.parse_transform(name, name_end),
            Directive::Ftl => Err(SyntaxError::new(
                "The #ftl header must be the first thing in the template, only whitespace and comments can precede it",
                start,
            )),
            Directive::ElseIf
            | Directive::Else
            | Directive::Case
            | Directive::Default
            | Directive::Recover => Err(SyntaxError::new(
                format!("Unexpected #{name} directive: it has no enclosing directive it belongs to"),
                start,
            )),
        }
    }

    fn parse_if(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let condition = self.parse_expression()?;
        let tag = self.finish_start_tag(start, &name, name_end)?;
        let body = self.parse_elements(IF_SEPARATORS)?;
        let mut branches = vec![IfBranch {
            kind: IfKind::If,
            tag,
            condition: Some(condition),
            body,
        }];
        let mut seen_else = false;
        while let Some((name, name_end)) = self.start_tag_here() {
            let start = self.pos;
            let directive = self.lookup_directive(&name, start)?;
            if seen_else {
                return Err(SyntaxError::new(
                    format!("#{name} can't follow #else"),
                    start,
                ));
            }
            let (kind, tag, condition) = if directive == Directive::ElseIf {
                self.begin_tag(name_end);
                let condition = self.parse_expression()?;
                let tag = self.finish_start_tag(start, &name, name_end)?;
                (IfKind::ElseIf, tag, Some(condition))
            } else {
                seen_else = true;
                let tag = self.parse_plain_start_tag(&name, name_end)?;
                (IfKind::Else, tag, None)
            };
            let body = self.parse_elements(IF_SEPARATORS)?;
            branches.push(IfBranch {
                kind,
                tag,
                condition,
                body,
            });
        }
        let end = self.parse_end_tag(&["if"], &branches[0].tag)?;
        Ok(Element::If(IfBlock { branches, end }))
    }

    fn parse_switch(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let value = self.parse_expression()?;
        let tag = self.finish_start_tag(start, &name, name_end)?;
        let leading = self.parse_elements(SWITCH_SEPARATORS)?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while let Some((name, name_end)) = self.start_tag_here() {
            let start = self.pos;
            let directive = self.lookup_directive(&name, start)?;
            let (tag, value) = if directive == Directive::Case {
                if seen_default && self.dialect == Dialect::Modern {
                    return Err(SyntaxError::new(
                        "#case can't come after #default",
                        start,
                    ));
                }
                self.begin_tag(name_end);
                let value = self.parse_expression()?;
                (self.finish_start_tag(start, &name, name_end)?, Some(value))
            } else {
                if seen_default {
                    return Err(SyntaxError::new("A #switch can only have one #default", start));
                }
                seen_default = true;
                (self.parse_plain_start_tag(&name, name_end)?, None)
            };
            let body = self.parse_elements(SWITCH_SEPARATORS)?;
            cases.push(SwitchCase { tag, value, body });
        }
        let end = self.parse_end_tag(&["switch"], &tag)?;
        Ok(Element::Switch(SwitchBlock {
            tag,
            value,
            leading,
            cases,
            end,
        }))
    }

    fn parse_list(&mut self, name: String, name_end: usize, directive: Directive) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let form = if directive == Directive::Foreach {
            let var = self.expect_name("loop variable name")?;
            self.expect(TokenKind::In, "in")?;
            let source = self.parse_expression()?;
            ListForm::Foreach { var, source }
        } else {
            let source = self.parse_expression()?;
            let loop_vars = if self.lex.peek()?.kind == TokenKind::As {
                self.lex.next_token()?;
                self.parse_loop_var_names()?
            } else {
                Vec::new()
            };
            ListForm::List { source, loop_vars }
        };
        let tag = self.finish_start_tag(start, &name, name_end)?;
        let is_list = directive == Directive::List;
        let body = self.parse_elements(if is_list { LIST_SEPARATORS } else { &[] })?;
        let else_branch = match self.start_tag_here() {
            Some((name, name_end)) if is_list => {
                let else_tag = self.parse_plain_start_tag(&name, name_end)?;
                let body = self.parse_elements(&[])?;
                Some(ElseBranch { tag: else_tag, body })
            }
            _ => None,
        };
        let names: &[&str] = if is_list { &["list"] } else { &["foreach", "forEach"] };
        let end = self.parse_end_tag(names, &tag)?;
        Ok(Element::List(ListBlock {
            tag,
            form,
            body,
            else_branch,
            end,
        }))
    }

    fn parse_loop_var_names(&mut self) -> PResult<Vec<Name>> {
        let mut names = vec![self.expect_name("loop variable name")?];
        if self.lex.peek()?.kind == TokenKind::Comma {
            self.lex.next_token()?;
            names.push(self.expect_name("loop variable name")?);
        }
        Ok(names)
    }

    fn parse_items(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        self.expect(TokenKind::As, "as")?;
        let loop_vars = self.parse_loop_var_names()?;
        let tag = self.finish_start_tag(start, &name, name_end)?;
        let body = self.parse_elements(&[])?;
        let end = self.parse_end_tag(&["items"], &tag)?;
        Ok(Element::Items(ItemsBlock {
            tag,
            loop_vars,
            body,
            end,
        }))
    }

    fn parse_macro(&mut self, name: String, name_end: usize, function: bool) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let name_token = self.lex.next_token()?;
        match name_token.kind {
            TokenKind::Identifier | TokenKind::String | TokenKind::RawString => {}
            _ => return Err(self.unexpected(name_token, "macro name")),
        }
        let modern = self.dialect == Dialect::Modern;
        let open_paren = if self.lex.peek()?.kind == TokenKind::LParen {
            if modern && !function {
                return Err(SyntaxError::new(
                    "Macro parameters can't be enclosed in parentheses",
                    self.lex.peek()?.span.start,
                ));
            }
            Some(self.lex.next_token()?.span)
        } else {
            if modern && function {
                return Err(SyntaxError::new(
                    "Function parameters must be enclosed in parentheses",
                    self.lex.peek()?.span.start,
                ));
            }
            None
        };
        let mut params = Vec::new();
        let mut catch_all = None;
        let mut close_paren = None;
        let mut pending_comma = false;
        loop {
            let token = self.lex.peek()?;
            match token.kind {
                TokenKind::RParen if open_paren.is_some() => {
                    close_paren = Some(self.lex.next_token()?.span);
                    break;
                }
                TokenKind::TagEnd | TokenKind::EmptyTagEnd if open_paren.is_none() => break,
                TokenKind::Comma if !params.is_empty() || catch_all.is_some() => {
                    if modern && !function {
                        return Err(SyntaxError::new(
                            "Macro parameters must not be separated by commas",
                            token.span.start,
                        ));
                    }
                    self.lex.next_token()?;
                    pending_comma = true;
                    continue;
                }
                _ => {}
            }
            if catch_all.is_some() {
                return Err(SyntaxError::new(
                    "The catch-all parameter must be the last parameter",
                    token.span.start,
                ));
            }
            if modern && function && !params.is_empty() && !pending_comma {
                return Err(SyntaxError::new(
                    "Function parameters must be separated by commas",
                    token.span.start,
                ));
            }
            pending_comma = false;
            let param = self.expect_name("parameter name")?;
            match self.lex.peek()?.kind {
                TokenKind::Ellipsis => {
                    let dots = self.lex.next_token()?;
                    catch_all = Some((param, dots.span.end));
                }
                TokenKind::Equals => {
                    self.lex.next_token()?;
                    let default = self.parse_expression()?;
                    params.push(MacroParam {
                        name: param,
                        default: Some(default),
                    });
                }
                _ => params.push(MacroParam {
                    name: param,
                    default: None,
                }),
            }
        }
        let tag = self.finish_start_tag(start, &name, name_end)?;
        self.macro_depth += 1;
        let body = self.parse_elements(&[]);
        self.macro_depth -= 1;
        let body = body?;
        let end = self.parse_end_tag(if function { &["function"] } else { &["macro"] }, &tag)?;
        Ok(Element::Macro(MacroDef {
            tag,
            function,
            name_span: name_token.span,
            params,
            catch_all,
            open_paren,
            close_paren,
            body,
            end,
        }))
    }

    fn parse_nested(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let args = self.parse_positional_args(|kind| {
            matches!(kind, TokenKind::TagEnd | TokenKind::EmptyTagEnd)
        })?;
        let tag = self.finish_start_tag(start, &name, name_end)?;
        Ok(Element::Nested(NestedDirective { tag, args }))
    }

    /// Positional arguments up to a token accepted by `stop` or the first
    /// `name=` argument. Commas are optional in FreeMarker 2.
    fn parse_positional_args(&mut self, stop: impl Fn(TokenKind) -> bool) -> PResult<Vec<Expr>> {
        let mut args: Vec<Expr> = Vec::new();
        let mut pending_comma = false;
        loop {
            let token = self.lex.peek()?;
            if stop(token.kind) || self.at_named_arg()? {
                if pending_comma {
                    return Err(self.unexpected(token, "argument"));
                }
                return Ok(args);
            }
            if token.kind == TokenKind::Comma && !args.is_empty() && !pending_comma {
                self.lex.next_token()?;
                pending_comma = true;
                continue;
            }
            if !args.is_empty() && !pending_comma && self.dialect == Dialect::Modern {
                return Err(SyntaxError::new(
                    "Arguments must be separated by commas",
                    token.span.start,
                ));
            }
            if !can_start_expression(token.kind) {
                return Err(self.unexpected(token, "argument"));
            }
            pending_comma = false;
            args.push(self.parse_expression()?);
        }
    }

    fn at_named_arg(&mut self) -> PResult<bool> {
        Ok(self.lex.peek()?.kind == TokenKind::Identifier
            && self.lex.peek_nth(1)?.kind == TokenKind::Equals)
    }

    fn parse_named_args(&mut self, stop: impl Fn(TokenKind) -> bool) -> PResult<Vec<NamedArg>> {
        let mut args = Vec::new();
        loop {
            let token = self.lex.peek()?;
            if stop(token.kind) {
                return Ok(args);
            }
            if token.kind == TokenKind::Comma && !args.is_empty() {
                self.lex.next_token()?;
            }
            let (name, name_span) = self.expect_identifier("parameter name")?;
            self.expect(TokenKind::Equals, "=")?;
            let value = self.parse_expression()?;
            args.push(NamedArg {
                name,
                name_span,
                value,
            });
        }
    }

    fn parse_assign(&mut self, name: String, name_end: usize, scope: AssignScope) -> PResult<Element> {
        let start = self.pos;
        if scope == AssignScope::Local && self.macro_depth == 0 {
            return Err(SyntaxError::new(
                "The #local directive can only be used inside a macro or function",
                start,
            ));
        }
        self.begin_tag(name_end);
        let target = self.expect_assign_target()?;
        let next = self.lex.peek()?.kind;
        if matches!(next, TokenKind::In | TokenKind::TagEnd) {
            let namespace = self.parse_optional_namespace()?;
            let tag = self.finish_start_tag(start, &name, name_end)?;
            let body = self.parse_elements(&[])?;
            let end = self.parse_end_tag(&[scope.tag_name()], &tag)?;
            return Ok(Element::BlockAssign(BlockAssign {
                tag,
                scope,
                target,
                namespace,
                body,
                end,
            }));
        }
        let mut assignments = Vec::new();
        let mut target = target;
        loop {
            let op = self.lex.next_token()?;
            let value = match op.kind {
                TokenKind::Equals | TokenKind::CompoundAssign => Some(self.parse_expression()?),
                TokenKind::PlusPlus | TokenKind::MinusMinus => None,
                _ => return Err(self.unexpected(op, "assignment operator")),
            };
            assignments.push(Assignment {
                target,
                op: op.span,
                value,
            });
            let mut next = self.lex.peek()?;
            if next.kind == TokenKind::Comma {
                self.lex.next_token()?;
                next = self.lex.peek()?;
            }
            match next.kind {
                TokenKind::Identifier | TokenKind::String | TokenKind::RawString => {
                    target = self.expect_assign_target()?;
                }
                _ => break,
            }
        }
        let namespace = self.parse_optional_namespace()?;
        let tag = self.finish_start_tag(start, &name, name_end)?;
        Ok(Element::Assign(AssignDirective {
            tag,
            scope,
            assignments,
            namespace,
        }))
    }

    fn expect_assign_target(&mut self) -> PResult<Span> {
        let token = self.lex.next_token()?;
        match token.kind {
            TokenKind::Identifier | TokenKind::String | TokenKind::RawString => Ok(token.span),
            _ => Err(self.unexpected(token, "variable name")),
        }
    }

    fn parse_optional_namespace(&mut self) -> PResult<Option<Expr>> {
        if self.lex.peek()?.kind == TokenKind::In {
            self.lex.next_token()?;
            Ok(Some(self.parse_expression()?))
        } else {
            Ok(None)
        }
    }

    fn parse_attempt(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let tag = self.parse_plain_start_tag(&name, name_end)?;
        let body = self.parse_elements(ATTEMPT_SEPARATORS)?;
        let Some((recover_name, recover_name_end)) = self.start_tag_here() else {
            return Err(SyntaxError::new("#attempt without #recover", tag.span.start));
        };
        let recover = self.parse_plain_start_tag(&recover_name, recover_name_end)?;
        let recover_body = self.parse_elements(&[])?;
        let names = self.end_names(&["attempt", "recover"], &["attempt"]);
        let end = self.parse_end_tag(names, &tag)?;
        Ok(Element::Attempt(AttemptBlock {
            tag,
            body,
            recover,
            recover_body,
            end,
        }))
    }

    /// Finds where the content of a `#noparse`/`#comment` ends.
    fn find_raw_end(&self, names: &[&str], tag: &StartTag) -> PResult<usize> {
        let open = match self.syntax() {
            TagSyntax::AngleBracket => "</#",
            TagSyntax::SquareBracket => "[/#",
        };
        let mut from = self.pos;
        while let Some(found) = self.src[from..].find(open) {
            let at = from + found;
            if let Some((name, _)) = self.read_name(at + 3) {
                if names.contains(&name.as_str()) {
                    return Ok(at);
                }
            }
            from = at + open.len();
        }
        Err(SyntaxError::new(
            format!("Unclosed #{} directive", tag.name),
            tag.span.start,
        ))
    }

    fn parse_include(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let path = self.parse_expression()?;
        let args = self.parse_named_args(|kind| {
            matches!(kind, TokenKind::TagEnd | TokenKind::EmptyTagEnd)
        })?;
        let mut params = Vec::with_capacity(args.len());
        for arg in args {
            let kind = match (arg.name.as_str(), self.dialect) {
                ("parse", Dialect::Legacy) => IncludeParamKind::Parse,
                ("encoding", Dialect::Legacy) => IncludeParamKind::Encoding,
                ("ignore_missing", Dialect::Legacy) | ("ignoreMissing", _) => {
                    IncludeParamKind::IgnoreMissing
                }
                _ => {
                    return Err(SyntaxError::new(
                        format!("Unsupported #include parameter: {}", arg.name),
                        arg.name_span.start,
                    ))
                }
            };
            params.push(IncludeParam { kind, arg });
        }
        let tag = self.finish_start_tag(start, &name, name_end)?;
        Ok(Element::Include(IncludeDirective { tag, path, params }))
    }

    fn parse_call(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let (first, first_span) = self.expect_identifier("macro name")?;
        let mut callee = Expr::Identifier {
            span: first_span,
            name: first,
        };
        while self.lex.peek()?.kind == TokenKind::Dot {
            self.lex.next_token()?;
            let (name, name_span) = self.expect_identifier("name")?;
            callee = Expr::Dot {
                span: Span::new(callee.start(), name_span.end),
                target: Box::new(callee),
                name,
                name_span,
            };
        }
        let is_close = |kind| matches!(kind, TokenKind::TagEnd | TokenKind::EmptyTagEnd);
        let (parens, positional, named) = if self.lex.peek()?.kind == TokenKind::LParen {
            let open = self.lex.next_token()?.span;
            let positional = self.parse_positional_args(|kind| kind == TokenKind::RParen)?;
            let close = self.expect(TokenKind::RParen, ")")?.span;
            (Some((open, close)), positional, Vec::new())
        } else {
            let positional = self.parse_positional_args(is_close)?;
            let named = self.parse_named_args(is_close)?;
            (None, positional, named)
        };
        let tag = self.finish_start_tag(start, &name, name_end)?;
        Ok(Element::LegacyCall(LegacyCall {
            tag,
            callee,
            parens,
            positional,
            named,
        }))
    }

    fn parse_transform(&mut self, name: String, name_end: usize) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(name_end);
        let callee = self.parse_expression()?;
        if self.lex.peek()?.kind == TokenKind::Semicolon {
            self.lex.next_token()?;
        }
        let params = self.parse_named_args(|kind| {
            matches!(kind, TokenKind::TagEnd | TokenKind::EmptyTagEnd)
        })?;
        let tag = self.finish_start_tag(start, &name, name_end)?;
        let body = self.parse_elements(&[])?;
        let end = self.parse_end_tag(&["transform"], &tag)?;
        Ok(Element::Transform(TransformBlock {
            tag,
            callee,
            params,
            body,
            end,
        }))
    }

    fn parse_user_directive(&mut self) -> PResult<Element> {
        let start = self.pos;
        self.begin_tag(start + 2);
        let callee = self.parse_expression()?;
        let stop = |kind| {
            matches!(
                kind,
                TokenKind::TagEnd | TokenKind::EmptyTagEnd | TokenKind::Semicolon
            )
        };
        let positional = self.parse_positional_args(stop)?;
        let named = self.parse_named_args(stop)?;
        let loop_vars = if self.lex.peek()?.kind == TokenKind::Semicolon {
            self.lex.next_token()?;
            let mut vars = vec![self.expect_name("loop variable name")?];
            while self.lex.peek()?.kind == TokenKind::Comma {
                self.lex.next_token()?;
                vars.push(self.expect_name("loop variable name")?);
            }
            vars
        } else {
            Vec::new()
        };
        let close = self.expect_tag_close()?;
        let body = if close.len() == 2 {
            None
        } else {
            let elements = self.parse_elements(&[])?;
            let end = self.parse_user_end_tag(&callee, start)?;
            Some((elements, end))
        };
        Ok(Element::UserDirective(UserDirective {
            start,
            callee,
            positional,
            named,
            loop_vars,
            close,
            body,
        }))
    }

    fn parse_user_end_tag(&mut self, callee: &Expr, opener: usize) -> PResult<UserEndTag> {
        let pos = self.pos;
        if pos >= self.src.len() {
            return Err(SyntaxError::new("Unclosed user directive call", opener));
        }
        if !matches!(self.markup_at(pos), Some(Markup::UserEnd(_))) {
            return Err(self.unexpected_markup_error(pos));
        }
        let name_start = pos + 3;
        let end_char = self.tag_end_char();
        // FreeMarker 2 also accepted `]` closing an angle bracket end tag
        let legacy_glitch = self.dialect == Dialect::Legacy && end_char == '>';
        let close_at = self.src[name_start..]
            .find(|c| c == end_char || (legacy_glitch && c == ']'))
            .map(|i| name_start + i)
            .ok_or_else(|| SyntaxError::new("Malformed end tag", pos))?;
        let name = self.src[name_start..close_at].trim();
        let callee_text = callee.span().text(self.src);
        if !name.is_empty() && callee.is_identifier_path() && name != callee_text {
            return Err(SyntaxError::new(
                format!("Expected </@{callee_text}> or </@>, but found </@{name}>"),
                pos,
            ));
        }
        self.pos = close_at + 1;
        Ok(UserEndTag {
            span: Span::new(pos, close_at + 1),
            name_start,
            close: Span::new(close_at, close_at + 1),
        })
    }

    // -----------------------------------------------------------------------
    // Interpolations
    // -----------------------------------------------------------------------

    fn parse_interpolation(&mut self) -> PResult<Element> {
        let start = self.pos;
        self.lex = Lexer::new(self.src, start + 2, LexMode::Interpolation, self.dialect);
        let expr = self.parse_expression()?;
        let close = self.expect(TokenKind::RBrace, "}")?;
        self.pos = close.span.end;
        Ok(Element::Interpolation(Interpolation {
            span: Span::new(start, close.span.end),
            expr,
        }))
    }

    fn parse_numerical_interpolation(&mut self) -> PResult<Element> {
        let start = self.pos;
        self.lex = Lexer::new(self.src, start + 2, LexMode::Interpolation, self.dialect);
        let expr = self.parse_expression()?;
        let format = if self.lex.peek()?.kind == TokenKind::Semicolon {
            self.lex.next_token()?;
            let token = self.lex.next_token()?;
            if token.kind != TokenKind::Identifier {
                return Err(self.unexpected(token, "number format"));
            }
            Some(parse_number_format(token.text(self.src), token.span.start)?)
        } else {
            None
        };
        let close = self.expect(TokenKind::RBrace, "}")?;
        self.pos = close.span.end;
        Ok(Element::NumericalInterpolation(NumericalInterpolation {
            span: Span::new(start, close.span.end),
            expr,
            format,
        }))
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    pub(super) fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.lex.peek()?.kind == TokenKind::Or {
            let op = self.lex.next_token()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or {
                span: lhs.span().to(rhs.span()),
                op_span: op.span,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.lex.peek()?.kind == TokenKind::And {
            let op = self.lex.next_token()?;
            let rhs = self.parse_equality()?;
            lhs = Expr::And {
                span: lhs.span().to(rhs.span()),
                op_span: op.span,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let lhs = self.parse_relational()?;
        let token = self.lex.peek()?;
        let op = match token.kind {
            TokenKind::Equals if self.dialect == Dialect::Modern => {
                return Err(SyntaxError::new(
                    "Use == instead of = for comparison",
                    token.span.start,
                ))
            }
            TokenKind::Equals | TokenKind::DoubleEquals => ComparisonOp::Equals,
            TokenKind::NotEquals => ComparisonOp::NotEquals,
            _ => return Ok(lhs),
        };
        self.lex.next_token()?;
        let rhs = self.parse_relational()?;
        Ok(Expr::Comparison {
            span: lhs.span().to(rhs.span()),
            op,
            op_span: token.span,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let lhs = self.parse_range()?;
        let token = self.lex.peek()?;
        let TokenKind::Relational(op) = token.kind else {
            return Ok(lhs);
        };
        self.lex.next_token()?;
        let rhs = self.parse_range()?;
        Ok(Expr::Comparison {
            span: lhs.span().to(rhs.span()),
            op: ComparisonOp::Relational(op),
            op_span: token.span,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_range(&mut self) -> PResult<Expr> {
        let lhs = self.parse_additive()?;
        let kind = match self.lex.peek()?.kind {
            TokenKind::DotDot => RangeKind::Inclusive,
            TokenKind::DotDotLess => RangeKind::Exclusive,
            TokenKind::DotDotStar => RangeKind::Limited,
            _ => return Ok(lhs),
        };
        let op = self.lex.next_token()?;
        let rhs = if kind == RangeKind::Inclusive && !can_start_expression(self.lex.peek()?.kind) {
            None
        } else {
            Some(Box::new(self.parse_additive()?))
        };
        let end = rhs.as_ref().map_or(op.span.end, |rhs| rhs.end());
        Ok(Expr::Range {
            span: Span::new(lhs.start(), end),
            kind,
            lhs: Box::new(lhs),
            rhs,
        })
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.lex.peek()?.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => return Ok(lhs),
            };
            self.lex.next_token()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                span: lhs.span().to(rhs.span()),
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.lex.peek()?.kind {
                TokenKind::Times => BinaryOp::Multiply,
                TokenKind::Divide => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => return Ok(lhs),
            };
            self.lex.next_token()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                span: lhs.span().to(rhs.span()),
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let token = self.lex.peek()?;
        match token.kind {
            TokenKind::Plus | TokenKind::Minus => {
                self.lex.next_token()?;
                let operand = self.parse_primary()?;
                Ok(Expr::UnaryPlusMinus {
                    span: Span::new(token.span.start, operand.end()),
                    operand: Box::new(operand),
                })
            }
            TokenKind::Exclamation => self.parse_not(),
            _ => self.parse_primary(),
        }
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        let token = self.lex.peek()?;
        if token.kind != TokenKind::Exclamation {
            return self.parse_primary();
        }
        self.lex.next_token()?;
        let operand = self.parse_not()?;
        Ok(Expr::Not {
            span: Span::new(token.span.start, operand.end()),
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            let token = self.lex.peek()?;
            expr = match token.kind {
                TokenKind::Dot => {
                    self.lex.next_token()?;
                    let (name, name_span) = self.expect_name_token("name after \".\"")?;
                    Expr::Dot {
                        span: Span::new(expr.start(), name_span.end),
                        target: Box::new(expr),
                        name,
                        name_span,
                    }
                }
                TokenKind::DotStar | TokenKind::DotDoubleStar => {
                    self.lex.next_token()?;
                    let name_span = Span::new(token.span.start + 1, token.span.end);
                    Expr::Dot {
                        span: Span::new(expr.start(), token.span.end),
                        target: Box::new(expr),
                        name: name_span.text(self.src).to_string(),
                        name_span,
                    }
                }
                TokenKind::LBracket => {
                    self.lex.next_token()?;
                    let key = self.parse_expression()?;
                    let close = self.expect(TokenKind::RBracket, "]")?;
                    Expr::DynamicKey {
                        span: Span::new(expr.start(), close.span.end),
                        target: Box::new(expr),
                        key: Box::new(key),
                    }
                }
                TokenKind::LParen => {
                    self.lex.next_token()?;
                    let args = self.parse_comma_separated(TokenKind::RParen)?;
                    let close = self.expect(TokenKind::RParen, ")")?;
                    Expr::MethodCall {
                        span: Span::new(expr.start(), close.span.end),
                        target: Box::new(expr),
                        args,
                    }
                }
                TokenKind::Question => {
                    self.lex.next_token()?;
                    let (name, name_span) = self.expect_name_token("built-in name")?;
                    self.check_built_in(&name, name_span)?;
                    Expr::BuiltIn {
                        span: Span::new(expr.start(), name_span.end),
                        target: Box::new(expr),
                        name,
                        name_span,
                    }
                }
                TokenKind::Exists => {
                    self.lex.next_token()?;
                    Expr::Exists {
                        span: Span::new(expr.start(), token.span.end),
                        target: Box::new(expr),
                    }
                }
                TokenKind::Exclamation => {
                    self.lex.next_token()?;
                    if self.can_start_default_rhs()? {
                        let rhs = match self.dialect {
                            Dialect::Legacy => self.parse_expression()?,
                            Dialect::Modern => self.parse_primary()?,
                        };
                        return Ok(Expr::DefaultTo {
                            span: Span::new(expr.start(), rhs.end()),
                            target: Box::new(expr),
                            rhs: Some(Box::new(rhs)),
                        });
                    }
                    Expr::DefaultTo {
                        span: Span::new(expr.start(), token.span.end),
                        target: Box::new(expr),
                        rhs: None,
                    }
                }
                _ => return Ok(expr),
            };
        }
    }

    fn can_start_default_rhs(&mut self) -> PResult<bool> {
        let kind = self.lex.peek()?.kind;
        let starts = match self.dialect {
            Dialect::Legacy => can_start_expression(kind),
            Dialect::Modern => can_start_primary(kind),
        };
        Ok(starts && !self.at_named_arg()?)
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let token = self.lex.next_token()?;
        match token.kind {
            TokenKind::Number => Ok(Expr::Number(token.span)),
            TokenKind::True | TokenKind::False => Ok(Expr::Boolean(token.span)),
            TokenKind::String | TokenKind::RawString => self.parse_string_literal(token),
            TokenKind::Identifier => Ok(Expr::Identifier {
                span: token.span,
                name: unescape_identifier(token.text(self.src)),
            }),
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                let close = self.expect(TokenKind::RParen, ")")?;
                Ok(Expr::Paren {
                    span: Span::new(token.span.start, close.span.end),
                    inner: Box::new(inner),
                })
            }
            TokenKind::LBracket => self.parse_list_literal(token),
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                if self.lex.peek()?.kind != TokenKind::RBrace {
                    loop {
                        let key = self.parse_expression()?;
                        self.expect(TokenKind::Colon, ":")?;
                        let value = self.parse_expression()?;
                        entries.push(HashEntry { key, value });
                        if self.lex.peek()?.kind != TokenKind::Comma {
                            break;
                        }
                        self.lex.next_token()?;
                    }
                }
                let close = self.expect(TokenKind::RBrace, "}")?;
                Ok(Expr::Hash {
                    span: Span::new(token.span.start, close.span.end),
                    entries,
                })
            }
            TokenKind::Dot => {
                let (name, name_span) = self.expect_name_token("built-in variable name")?;
                let known = match self.dialect {
                    Dialect::Legacy => naming::is_fm2_built_in_variable(&name),
                    Dialect::Modern => naming::is_fm3_built_in_variable(&name),
                };
                if !known {
                    return Err(SyntaxError::new(
                        format!("Unknown built-in variable: {name}"),
                        name_span.start,
                    ));
                }
                Ok(Expr::BuiltinVariable {
                    span: Span::new(token.span.start, name_span.end),
                    name,
                    name_span,
                })
            }
            _ => Err(self.unexpected(token, "expression")),
        }
    }

    fn parse_list_literal(&mut self, open: Token) -> PResult<Expr> {
        let mut items = Vec::new();
        let mut pending_comma = false;
        loop {
            let token = self.lex.peek()?;
            match token.kind {
                TokenKind::RBracket if !pending_comma => break,
                TokenKind::Comma if !items.is_empty() && !pending_comma => {
                    self.lex.next_token()?;
                    pending_comma = true;
                    continue;
                }
                _ => {}
            }
            if !items.is_empty() && !pending_comma && self.dialect == Dialect::Modern {
                return Err(SyntaxError::new(
                    "List items must be separated by commas",
                    token.span.start,
                ));
            }
            pending_comma = false;
            items.push(self.parse_expression()?);
        }
        let close = self.expect(TokenKind::RBracket, "]")?;
        Ok(Expr::List {
            span: Span::new(open.span.start, close.span.end),
            items,
        })
    }

    fn parse_comma_separated(&mut self, close: TokenKind) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.lex.peek()?.kind == close {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expression()?);
            if self.lex.peek()?.kind != TokenKind::Comma {
                return Ok(items);
            }
            self.lex.next_token()?;
        }
    }

    fn parse_string_literal(&mut self, token: Token) -> PResult<Expr> {
        let raw = token.kind == TokenKind::RawString;
        let text = token.text(self.src);
        let quote_at = usize::from(raw);
        let quote = char::from(text.as_bytes()[quote_at]);
        let content_start = token.span.start + quote_at + 1;
        let content = &self.src[content_start..token.span.end - 1];
        if raw {
            return Ok(Expr::String(StringLiteral {
                span: token.span,
                raw,
                quote,
                value: content.to_string(),
                interpolations: None,
            }));
        }
        let decoded = strings::decode(content, content_start)?;
        let interpolated = content.contains("${")
            || (self.dialect == Dialect::Legacy && content.contains("#{"));
        let interpolations = if interpolated {
            Some(self.parse_string_parts(decoded.value.clone(), decoded.offsets)?)
        } else {
            None
        };
        Ok(Expr::String(StringLiteral {
            span: token.span,
            raw,
            quote,
            value: decoded.value,
            interpolations,
        }))
    }

    fn parse_string_parts(&self, text: String, offsets: Vec<usize>) -> PResult<InterpolatedString> {
        let elements = {
            let mut parser = self.string_parser(&text);
            parser.parse_elements(&[]).map_err(|mut err| {
                err.offset = offsets[err.offset.min(offsets.len() - 1)];
                err
            })?
        };
        let parts = elements
            .into_iter()
            .map(|element| match element {
                Element::Text(span) => StringPart::Text(span),
                other => StringPart::Interpolation(other),
            })
            .collect();
        Ok(InterpolatedString {
            text,
            offsets,
            parts,
        })
    }

    fn check_built_in(&self, name: &str, span: Span) -> PResult<()> {
        let known = match self.dialect {
            Dialect::Legacy => naming::is_fm2_built_in(name),
            Dialect::Modern => naming::is_fm3_built_in(name),
        };
        if !known {
            return Err(SyntaxError::new(format!("Unknown built-in: ?{name}"), span.start));
        }
        if matches!(name, "esc" | "no_esc" | "noEsc") && !self.current_output_format().is_markup() {
            return Err(SyntaxError::new(
                format!(
                    "The ?{name} built-in can only be used where the current output format is a markup format, but it's {}",
                    self.current_output_format().name()
                ),
                span.start,
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn at_tag_close(&mut self) -> PResult<bool> {
        Ok(matches!(
            self.lex.peek()?.kind,
            TokenKind::TagEnd | TokenKind::EmptyTagEnd
        ))
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        let token = self.lex.next_token()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.unexpected(token, &format!("\"{what}\"")))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> PResult<(String, Span)> {
        let token = self.lex.next_token()?;
        if token.kind == TokenKind::Identifier {
            Ok((unescape_identifier(token.text(self.src)), token.span))
        } else {
            Err(self.unexpected(token, what))
        }
    }

    fn expect_name(&mut self, what: &str) -> PResult<Name> {
        let (name, span) = self.expect_identifier(what)?;
        Ok(Name { name, span })
    }

    /// A name after `.` or `?`; keywords are accepted there too.
    fn expect_name_token(&mut self, what: &str) -> PResult<(String, Span)> {
        let token = self.lex.next_token()?;
        let text = token.text(self.src);
        match token.kind {
            TokenKind::Identifier => Ok((unescape_identifier(text), token.span)),
            _ if !text.is_empty() && text.chars().all(|c| c.is_ascii_alphabetic()) => {
                Ok((text.to_string(), token.span))
            }
            _ => Err(self.unexpected(token, what)),
        }
    }

    fn unexpected(&self, token: Token, expected: &str) -> SyntaxError {
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("{:?}", token.text(self.src))
        };
        SyntaxError::new(
            format!("Expected {expected}, but found {found}"),
            token.span.start,
        )
    }
}

fn can_start_expression(kind: TokenKind) -> bool {
    can_start_primary(kind)
        || matches!(
            kind,
            TokenKind::Exclamation | TokenKind::Plus | TokenKind::Minus
        )
}

fn can_start_primary(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Identifier
            | TokenKind::Number
            | TokenKind::String
            | TokenKind::RawString
            | TokenKind::True
            | TokenKind::False
            | TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::LBrace
            | TokenKind::Dot
    )
}

/// Parses the `mNMN` part of `#{x; m1M3}`.
fn parse_number_format(text: &str, at: usize) -> PResult<NumberFormat> {
    let mut format = NumberFormat { min: None, max: None };
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let mut digits = String::new();
        while let Some((_, d)) = chars.peek().filter(|(_, d)| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        let value = digits
            .parse::<u32>()
            .map_err(|_| SyntaxError::new("Invalid number format", at + i))?;
        if value > MAX_FRACTION_DIGITS {
            return Err(SyntaxError::new(
                format!("Cannot specify more than {MAX_FRACTION_DIGITS} fraction digits"),
                at + i,
            ));
        }
        let slot = match c {
            'm' => &mut format.min,
            'M' => &mut format.max,
            _ => return Err(SyntaxError::new("Invalid number format", at + i)),
        };
        if slot.replace(value).is_some() {
            return Err(SyntaxError::new("Invalid number format", at + i));
        }
    }
    Ok(format)
}
