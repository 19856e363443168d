//! Snippet conversions through the public API

use fmconv_core::{ConverterError, Fm2ToFm3Converter, MarkerKind, Position};
use pretty_assertions::assert_eq;

fn convert(src: &str) -> String {
    match Fm2ToFm3Converter::new().convert_text("t.ftl", src) {
        Ok(converted) => converted.content,
        Err(e) => panic!("Conversion of {src:?} failed: {e}"),
    }
}

fn assert_converted(src: &str, expected: &str) {
    assert_eq!(convert(src), expected, "source: {src:?}");
}

/// Asserts that `src` is rejected as unconvertable at `row:column`.
fn assert_unconvertable(src: &str, row: usize, column: usize) {
    let err = Fm2ToFm3Converter::new()
        .convert_text("t.ftl", src)
        .expect_err("conversion should fail");
    assert!(
        matches!(err, ConverterError::UnconvertableLegacyFeature { .. }),
        "unexpected error for {src:?}: {err:?}"
    );
    assert_eq!(err.position(), Some(Position::new(row, column)), "source: {src:?}");
}

#[test]
fn test_text_and_comments_are_kept() {
    assert_converted("", "");
    assert_converted("Hello world!\n", "Hello world!\n");
    assert_converted("a <#-- c --> b", "a <#-- c --> b");
    assert_converted("<p>${x}</p>", "<p>${x}</p>");
}

#[test]
fn test_interpolations() {
    assert_converted("${ x <#-- c --> }", "${ x <#-- c --> }");
    assert_converted("#{x}", "${x}");
    assert_converted("#{n; m2M5}", "${n?string('0.00###')}");
    assert_converted("#{n; m2}", "${n?string('0.00')}");
    assert_converted("#{a + b; M2}", "${(a + b)?string('0.##')}");
}

#[test]
fn test_oversized_number_format_is_rejected() {
    for src in ["#{x; M51}", "#{x; m2M4000000000}"] {
        let err = Fm2ToFm3Converter::new()
            .convert_text("t.ftl", src)
            .expect_err("too many fraction digits");
        assert!(matches!(err, ConverterError::Parse { .. }), "{src:?}: {err:?}");
    }
    assert_converted("#{x; M50}", &format!("${{x?string('0.{}')}}", "#".repeat(50)));
}

#[test]
fn test_header() {
    assert_converted("<#ftl>x", "<#ftl>x");
    assert_converted(
        "<#ftl output_format='HTML' strip_whitespace=true>x",
        "<#ftl outputFormat='HTML' stripWhitespace=true>x",
    );
    assert_converted("<#ftl attributes={'a': []}]x", "<#ftl customSettings={'a': []}>x");
}

#[test]
fn test_if_and_else() {
    assert_converted(
        "<#if a>1<#elseif b>2<#else>3</#if>",
        "<#if a>1<#elseIf b>2<#else>3</#if>",
    );
    assert_converted("<#if a>1<#else />2</#if>", "<#if a>1<#else>2</#if>");
    assert_converted("[#if a]1[#else/]2[/#if]", "[#if a]1[#else]2[/#if]");
}

#[test]
fn test_recover_end_tag_becomes_attempt() {
    assert_converted(
        "<#attempt>${x}<#recover>failed</#recover>",
        "<#attempt>${x}<#recover>failed</#attempt>",
    );
    assert_converted(
        "<#attempt>${x}<#recover/>failed</#attempt>",
        "<#attempt>${x}<#recover>failed</#attempt>",
    );
}

#[test]
fn test_list_and_foreach() {
    assert_converted("<#list xs as x>${x}</#list>", "<#list xs as x>${x}</#list>");
    assert_converted(
        "<#foreach x in xs>${x}</#foreach>",
        "<#list xs as x>${x}</#list>",
    );
    assert_converted(
        "<#foreach <#--1--> x <#--X--> in xs <#--XS-->>${x}</#foreach>",
        "<#list <#--1--> xs <#--XS--> as x <#--X-->>${x}</#list>",
    );
}

#[test]
fn test_switch() {
    assert_converted(
        "<#switch x><#case 1>a<#break><#default>b</#switch>",
        "<#switch x><#case 1>a<#break><#default>b</#switch>",
    );
    assert_unconvertable("<#switch x><#default><#case 1></#switch>", 1, 22);
}

#[test]
fn test_macro_parameters() {
    assert_converted("<#macro m>x</#macro>", "<#macro m>x</#macro>");
    assert_converted("<#macro m()>x</#macro>", "<#macro m>x</#macro>");
    assert_converted("<#macro m p1 p2>x</#macro>", "<#macro m p1 p2>x</#macro>");
    assert_converted("<#macro m(p1, p2)>x</#macro>", "<#macro m p1 p2>x</#macro>");
    assert_converted(
        "<#macro m<#--0-->(p1<#--1-->,<#--2-->p2)>x</#macro>",
        "<#macro m<#--0--> p1<#--1--> <#--2-->p2>x</#macro>",
    );
}

#[test]
fn test_function_parameters() {
    assert_converted(
        "<#function f p1 p2 p3><#return p1></#function>",
        "<#function f(p1, p2, p3)><#return p1></#function>",
    );
    assert_converted(
        "<#function f(p1, p2)><#return p1></#function>",
        "<#function f(p1, p2)><#return p1></#function>",
    );
    assert_converted(
        "<#function f><#return 1></#function>",
        "<#function f()><#return 1></#function>",
    );
}

#[test]
fn test_call_and_transform() {
    assert_converted("<#call m(1, 2, 3)>", "<@m 1, 2, 3/>");
    assert_converted("<#transform t a=1 b=2>x</#transform>", "<@t a=1 b=2>x</@t>");
}

#[test]
fn test_user_directive_arguments_get_commas() {
    assert_converted("<@m 1 2 3/>", "<@m 1, 2, 3/>");
    assert_converted("<@m a=1 b=2>x</@m>", "<@m a=1 b=2>x</@m>");
    assert_converted("<@m x[0]]x</@m]", "<@m x[0]>x</@m>");
}

#[test]
fn test_include_parameters() -> anyhow::Result<()> {
    assert_converted("<#include 'a.ftl'>", "<#include 'a.ftl'>");
    assert_converted(
        "<#include 'a.ftl' ignore_missing=true>",
        "<#include 'a.ftl' ignoreMissing=true>",
    );

    let converted = Fm2ToFm3Converter::new()
        .convert_text("t.ftl", "<#include 'a.ftl' parse=false encoding='utf-8'>")?;
    assert_eq!(converted.content, "<#include 'a.ftl'>");
    let warnings = converted.markers.source_markers();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|m| m.kind() == MarkerKind::Warn));
    assert!(warnings[0].message().contains("\"parse\""));
    assert!(warnings[1].message().contains("\"encoding\""));
    Ok(())
}

#[test]
fn test_setting() {
    assert_converted(
        "<#setting number_format='0.##'>",
        "<#setting numberFormat='0.##'>",
    );
    assert_unconvertable("<#setting classic_compatible=true>", 1, 1);
}

#[test]
fn test_legacy_comment_directive() {
    assert_converted("<#comment>x</#comment>", "<#--x-->");
    assert_unconvertable("\n <#comment>a-->b</#comment>", 2, 2);
}

#[test]
fn test_comparison_operators() {
    assert_converted("${a = b}", "${a == b}");
    assert_converted("${a == b}", "${a == b}");
    assert_converted("${a != b}", "${a != b}");
    assert_converted("<#if (a > b)>x</#if>", "<#if (a > b)>x</#if>");
    assert_converted("<#if a gt b>x</#if>", "<#if a gt b>x</#if>");
    assert_converted("<#if a lte b>x</#if>", "<#if a le b>x</#if>");
}

#[test]
fn test_exists_and_defaults() {
    assert_converted("${x?exists}", "${x??}");
    assert_converted("${x?if_exists}", "${x!}");
    assert_converted("${x?if_exists.y}", "${(x!).y}");
    assert_converted("${v!+1}", "${v!(+1)}");
    assert_unconvertable("<#assign d = x?default>", 1, 14);
}

#[test]
fn test_built_ins_and_variables() {
    assert_converted("${s?upper_case}", "${s?upperCase}");
    assert_converted("${.current_node}", "${.node}");
    assert_converted("${.template_name}", "${.currentTemplateName}");
    assert_converted("${x.@@nested_markup}", "${x.@@nestedMarkup}");
}

#[test]
fn test_list_literals_get_commas() {
    assert_converted("${[1 2 3]?size}", "${[1, 2, 3]?size}");
    assert_converted("${[1, 2]?size}", "${[1, 2]?size}");
}

#[test]
fn test_keyword_identifiers_are_unconvertable() {
    assert_unconvertable("${le}", 1, 3);
}

#[test]
fn test_directive_renames() {
    assert_converted("<#noparse>${x}</#noparse>", "<#noParse>${x}</#noParse>");
    assert_converted(
        "<#ftl output_format='HTML'><#noautoesc>${x}</#noautoesc>",
        "<#ftl outputFormat='HTML'><#noAutoEsc>${x}</#noAutoEsc>",
    );
}

#[test]
fn test_square_bracket_syntax_is_kept() -> anyhow::Result<()> {
    let converted = Fm2ToFm3Converter::new()
        .convert_text("t.ftl", "[#ftl][#if x]${x}[/#if]")?;
    assert_eq!(converted.content, "[#ftl][#if x]${x}[/#if]");
    assert_eq!(converted.tag_syntax, fmconv_core::TagSyntax::SquareBracket);
    Ok(())
}

#[test]
fn test_parse_error() {
    let err = Fm2ToFm3Converter::new()
        .convert_text("t.ftl", "<#if x>")
        .expect_err("unclosed #if");
    assert!(matches!(err, ConverterError::Parse { .. }));
    assert!(err.position().is_some());
}
