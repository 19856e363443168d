/*!
# Template Parser

Parses FreeMarker templates into an AST that keeps byte spans into the
source. Two dialects are understood: the FreeMarker 2 language the converter
reads, and the FreeMarker 3 language it writes, used to validate the output.
*/

pub mod ast;
pub mod lexer;
mod parser;
pub mod source;
pub mod strings;

pub use ast::{Element, Expr};
pub use source::{LineIndex, Span};

use tracing::trace;

use crate::config::Fm2Settings;
use crate::error::Position;
use crate::naming::LegacyOutputFormat;

/// Language variant being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// FreeMarker 2, the conversion source
    Legacy,
    /// FreeMarker 3, the conversion target
    Modern,
}

/// The tag syntax a template actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSyntax {
    /// `<#if x>`
    AngleBracket,
    /// `[#if x]`
    SquareBracket,
}

impl TagSyntax {
    pub fn begin_char(&self) -> char {
        match self {
            Self::AngleBracket => '<',
            Self::SquareBracket => '[',
        }
    }

    pub fn end_char(&self) -> char {
        match self {
            Self::AngleBracket => '>',
            Self::SquareBracket => ']',
        }
    }
}

/// Configured tag syntax; `AutoDetect` lets the first tag decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSyntaxSetting {
    AngleBracket,
    SquareBracket,
    AutoDetect,
}

/// A template that couldn't be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Syntax error at line {}, column {}: {message}", position.row, position.column)]
pub struct ParseError {
    pub message: String,
    pub position: Position,
}

impl ParseError {
    fn from_syntax_error(src: &str, err: lexer::SyntaxError) -> Self {
        Self {
            position: LineIndex::new(src).position(src, err.offset),
            message: err.message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseOptions<'a> {
    pub dialect: Dialect,
    pub tag_syntax: TagSyntaxSetting,
    /// Output format before the `#ftl` header is considered
    pub output_format: LegacyOutputFormat,
    /// Source of custom output format names
    pub settings: Option<&'a Fm2Settings>,
}

impl<'a> ParseOptions<'a> {
    /// Options for reading a FreeMarker 2 source configured by `settings`.
    pub fn legacy(settings: &'a Fm2Settings, output_format: LegacyOutputFormat) -> Self {
        Self {
            dialect: Dialect::Legacy,
            tag_syntax: settings.tag_syntax,
            output_format,
            settings: Some(settings),
        }
    }

    /// Options for checking converter output.
    pub fn modern(tag_syntax: TagSyntax, output_format: LegacyOutputFormat) -> Self {
        Self {
            dialect: Dialect::Modern,
            tag_syntax: match tag_syntax {
                TagSyntax::AngleBracket => TagSyntaxSetting::AngleBracket,
                TagSyntax::SquareBracket => TagSyntaxSetting::SquareBracket,
            },
            output_format,
            settings: None,
        }
    }

    /// Resolves custom output format names through `settings`.
    pub fn with_custom_output_formats(mut self, settings: &'a Fm2Settings) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub elements: Vec<Element>,
    /// The syntax the template turned out to use
    pub tag_syntax: TagSyntax,
    /// The `encoding` of the `#ftl` header
    pub encoding: Option<String>,
    /// Output format in effect at the top level, after the `#ftl` header
    pub output_format: LegacyOutputFormat,
}

pub fn parse(src: &str, options: &ParseOptions) -> Result<Template, ParseError> {
    let template = parser::Parser::new(src, options)
        .parse_template()
        .map_err(|err| ParseError::from_syntax_error(src, err))?;
    trace!(
        dialect = ?options.dialect,
        tag_syntax = ?template.tag_syntax,
        elements = template.elements.len(),
        "Parsed template"
    );
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::ast::*;
    use super::*;

    fn legacy(src: &str) -> Result<Template, ParseError> {
        let settings = Fm2Settings::default();
        parse(src, &ParseOptions::legacy(&settings, LegacyOutputFormat::Undefined))
    }

    fn modern(src: &str) -> Result<Template, ParseError> {
        parse(
            src,
            &ParseOptions::modern(TagSyntax::AngleBracket, LegacyOutputFormat::Undefined),
        )
    }

    #[test]
    fn test_text_and_interpolation() {
        let template = legacy("a ${x} b").unwrap();
        assert_eq!(template.elements.len(), 3);
        assert_eq!(template.elements[0], Element::Text(Span::new(0, 2)));
        match &template.elements[1] {
            Element::Interpolation(i) => {
                assert_eq!(i.span, Span::new(2, 6));
                assert!(matches!(&i.expr, Expr::Identifier { name, .. } if name == "x"));
            }
            other => panic!("unexpected element: {other:?}"),
        }
    }

    #[test]
    fn test_if_else_chain() {
        let template = legacy("<#if a>1<#elseif b>2<#else>3</#if>").unwrap();
        let Element::If(block) = &template.elements[0] else {
            panic!("expected #if");
        };
        let kinds: Vec<_> = block.branches.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![IfKind::If, IfKind::ElseIf, IfKind::Else]);
        assert_eq!(block.end.name, "if");
    }

    #[test]
    fn test_list_with_else_and_sep() {
        let template = legacy("<#list xs as x>${x}<#sep>, <#else>none</#list>").unwrap();
        let Element::List(list) = &template.elements[0] else {
            panic!("expected #list");
        };
        assert!(list.else_branch.is_some());
        assert!(list.body.iter().any(|e| matches!(e, Element::Sep(s) if s.end.is_none())));
    }

    #[test]
    fn test_unclosed_and_mismatched_tags() {
        let err = legacy("<#if x>").unwrap_err();
        assert!(err.message.contains("Unclosed #if"), "{err}");
        assert_eq!(err.position, Position::new(1, 1));

        let err = legacy("<#if x>\n</#list>").unwrap_err();
        assert_eq!(err.position, Position::new(2, 1));
    }

    #[test]
    fn test_auto_detected_square_syntax() {
        let mut settings = Fm2Settings::default();
        settings.tag_syntax = TagSyntaxSetting::AutoDetect;
        let options = ParseOptions::legacy(&settings, LegacyOutputFormat::Undefined);
        let template = parse("<p>[#if x]y[/#if]<#if>", &options).unwrap();
        assert_eq!(template.tag_syntax, TagSyntax::SquareBracket);
        assert!(matches!(template.elements.last(), Some(Element::Text(_))));
    }

    #[test]
    fn test_header_decides_syntax_and_encoding() {
        let mut settings = Fm2Settings::default();
        settings.tag_syntax = TagSyntaxSetting::AutoDetect;
        let options = ParseOptions::legacy(&settings, LegacyOutputFormat::Undefined);
        let template = parse(
            " <#-- c --> [#ftl encoding='ISO-8859-1' output_format='HTML']<#x>",
            &options,
        )
        .unwrap();
        assert_eq!(template.tag_syntax, TagSyntax::SquareBracket);
        assert_eq!(template.encoding.as_deref(), Some("ISO-8859-1"));
        assert_eq!(template.output_format, LegacyOutputFormat::Html);
        assert!(matches!(template.elements[3], Element::Header(_)));
    }

    #[test]
    fn test_misplaced_header() {
        let err = legacy("x<#ftl>").unwrap_err();
        assert!(err.message.contains("#ftl"), "{err}");
    }

    #[test]
    fn test_default_operator_rhs() {
        let template = legacy("${a!b + 1}${c!}").unwrap();
        let Element::Interpolation(first) = &template.elements[0] else {
            panic!();
        };
        let Expr::DefaultTo { rhs: Some(rhs), .. } = &first.expr else {
            panic!("expected default operator");
        };
        assert!(matches!(rhs.as_ref(), Expr::Binary { .. }));
        let Element::Interpolation(second) = &template.elements[1] else {
            panic!();
        };
        assert!(matches!(&second.expr, Expr::DefaultTo { rhs: None, .. }));
    }

    #[test]
    fn test_named_argument_stops_default_rhs() {
        let template = legacy("<@m a=x! b=1/>").unwrap();
        let Element::UserDirective(call) = &template.elements[0] else {
            panic!();
        };
        assert_eq!(call.named.len(), 2);
        assert!(matches!(&call.named[0].value, Expr::DefaultTo { rhs: None, .. }));
    }

    #[test]
    fn test_string_interpolations() {
        let template = legacy(r#"${"a${x}\"b"}"#).unwrap();
        let Element::Interpolation(interpolation) = &template.elements[0] else {
            panic!();
        };
        let Expr::String(lit) = &interpolation.expr else {
            panic!();
        };
        let parts = &lit.interpolations.as_ref().unwrap().parts;
        assert_eq!(parts.len(), 3);
        assert_eq!(lit.value, "a${x}\"b");
    }

    #[test]
    fn test_error_inside_string_points_into_source() {
        let err = legacy("${'ab\\n${x +}'}").unwrap_err();
        assert_eq!(err.position.row, 1);
        assert!(err.position.column > 8, "{err}");
    }

    #[test]
    fn test_local_outside_macro() {
        assert!(legacy("<#local x = 1>").is_err());
        assert!(legacy("<#macro m><#local x = 1></#macro>").is_ok());
    }

    #[test]
    fn test_unknown_names() {
        assert!(legacy("<#nosuch>").is_err());
        assert!(legacy("${x?nosuch}").is_err());
        assert!(legacy("${.nosuch}").is_err());
        assert!(legacy("<#setting nosuch=1>").is_err());
    }

    #[test]
    fn test_esc_requires_markup_format() {
        assert!(legacy("${x?esc}").is_err());
        assert!(legacy("<#ftl output_format='HTML'>${x?esc}").is_ok());
        assert!(legacy("<#outputformat 'XML'><#autoesc>${x}</#autoesc></#outputformat>").is_ok());
        assert!(legacy("<#autoesc>${x}</#autoesc>").is_err());
    }

    #[test]
    fn test_legacy_only_constructs() {
        for src in [
            "<#foreach x in xs>${x}</#foreach>",
            "<#call m(1, 2)>",
            "<#comment>x</#comment>",
            "${x = 1}",
            "${[1 2 3]}",
            "<#attempt>a<#recover>b</#recover>",
            "#{x; m1M2}",
        ] {
            assert!(legacy(src).is_ok(), "{src}");
        }
    }

    #[test]
    fn test_modern_rejects_legacy_constructs() {
        for src in [
            "<#foreach x in xs>${x}</#foreach>",
            "<#call m(1, 2)>",
            "<#comment>x</#comment>",
            "${x = 1}",
            "${[1 2 3]}",
            "<#attempt>a<#recover>b</#recover>",
            "<#macro m(a)></#macro>",
            "<#function f a></#function>",
            "<@m 1 2/>",
            "<#switch x><#default><#case 1></#switch>",
            "${x?is_string}",
            "<#elseif x>",
        ] {
            assert!(modern(src).is_err(), "{src}");
        }
    }

    #[test]
    fn test_modern_accepts_converted_constructs() {
        for src in [
            "<#list xs as x>${x}</#list>",
            "<@m 1, 2/>",
            "${x == 1 && y le 2}",
            "<#macro m a b=1 others...></#macro>",
            "<#function f(a, b)><#return a></#function>",
            "${x!(a + b)}",
            "<#attempt>a<#recover>b</#attempt>",
            "${x?isString}",
        ] {
            assert!(modern(src).is_ok(), "{src}: {:?}", modern(src));
        }
    }

    #[test]
    fn test_numerical_interpolation_format() {
        let template = legacy("#{x; m2M5}").unwrap();
        let Element::NumericalInterpolation(ni) = &template.elements[0] else {
            panic!();
        };
        assert_eq!(
            ni.format,
            Some(NumberFormat {
                min: Some(2),
                max: Some(5)
            })
        );
    }

    #[test]
    fn test_fraction_digits_are_limited() {
        assert!(legacy("#{x; m50M50}").is_ok());
        let err = legacy("#{x; M51}").unwrap_err();
        assert!(err.message.contains("more than 50 fraction digits"), "{err}");
        assert!(legacy("#{x; M4000000000}").is_err());
    }

    #[test]
    fn test_noparse_content_is_raw() {
        let template = legacy("<#noparse><#if>${</#noparse>").unwrap();
        let Element::NoParse(block) = &template.elements[0] else {
            panic!();
        };
        assert_eq!(block.content, Span::new(10, 17));
    }
}
