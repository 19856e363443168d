//! Name tables of the two template languages and the rules that map FreeMarker 2
//! identifiers to their FreeMarker 3 spelling.
//!
//! Lookups always try the irregular rename table first and fall back to the
//! snake_case to camelCase conversion.

/// Converts a `snake_case` name to `camelCase`.
///
/// The first word is lower-cased entirely, every later word gets an upper-case
/// first letter and a lower-case rest. Empty words (from leading, trailing or
/// doubled underscores) contribute nothing.
pub fn snake_case_to_camel_case(name: Option<&str>) -> Option<String> {
    name.map(camel_case)
}

fn camel_case(name: &str) -> String {
    if !name.contains('_') {
        return name.to_lowercase();
    }
    let mut result = String::with_capacity(name.len());
    let mut first_word = true;
    for word in name.split('_') {
        if word.is_empty() {
            continue;
        }
        if first_word {
            result.push_str(&word.to_lowercase());
            first_word = false;
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                result.extend(first.to_uppercase());
                result.push_str(&chars.as_str().to_lowercase());
            }
        }
    }
    result
}

/// Applies the case converter only to names that are actually snake_case;
/// camelCase names are returned as they are.
fn default_rename(name: &str) -> String {
    if name.contains('_') {
        camel_case(name)
    } else {
        name.to_string()
    }
}

fn lookup(table: &[(&str, &'static str)], name: &str) -> Option<&'static str> {
    table.iter().find(|(from, _)| *from == name).map(|(_, to)| *to)
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

const IRREGULAR_BUILT_IN_NAMES: &[(&str, &str)] = &[
    ("webSafe", "html"),
    ("web_safe", "html"),
    ("datetime", "dateTime"),
    ("datetime_if_unknown", "dateTimeIfUnknown"),
    ("datetimeIfUnknown", "dateTimeIfUnknown"),
    ("iso_utc_fz", "isoUtcFZ"),
    ("iso_utc_nz", "isoUtcNZ"),
    ("iso_utc_ms_nz", "isoUtcMsNZ"),
    ("iso_utc_m_nz", "isoUtcMNZ"),
    ("iso_utc_h_nz", "isoUtcHNZ"),
    ("iso_local_nz", "isoLocalNZ"),
    ("iso_local_ms_nz", "isoLocalMsNZ"),
    ("iso_local_m_nz", "isoLocalMNZ"),
    ("iso_local_h_nz", "isoLocalHNZ"),
    ("iso_nz", "isoNZ"),
    ("iso_ms_nz", "isoMsNZ"),
    ("iso_m_nz", "isoMNZ"),
    ("iso_h_nz", "isoHNZ"),
    ("is_transform", "isDirective"),
    ("isTransform", "isDirective"),
    ("is_macro", "isDirective"),
    ("isMacro", "isDirective"),
    ("is_method", "isFunction"),
    ("isMethod", "isFunction"),
    ("is_collection", "isIterable"),
    ("isCollection", "isIterable"),
    ("is_collection_ex", "isCollection"),
    ("isCollectionEx", "isCollection"),
];

/// Built-in names as FreeMarker 2 spelled them (snake_case form).
const FM2_BUILT_INS: &[&str] = &[
    "abs", "absolute_template_name", "ancestors", "api", "boolean", "byte", "c",
    "cap_first", "capitalize", "ceiling", "children", "chop_linebreak", "chunk",
    "contains", "counter", "date", "date_if_unknown", "datetime",
    "datetime_if_unknown", "default", "double", "ends_with", "ensure_ends_with",
    "ensure_starts_with", "esc", "eval", "exists", "first", "float", "floor",
    "groups", "has_api", "has_content", "has_next", "html", "if_exists", "index",
    "index_of", "int", "interpret", "is_boolean", "is_collection",
    "is_collection_ex", "is_date", "is_date_like", "is_date_only", "is_datetime",
    "is_directive", "is_enumerable", "is_even_item", "is_first", "is_hash",
    "is_hash_ex", "is_indexable", "is_infinite", "is_last", "is_macro",
    "is_markup_output", "is_method", "is_nan", "is_node", "is_number",
    "is_odd_item", "is_sequence", "is_string", "is_time", "is_transform",
    "is_unknown_date_like", "iso", "iso_h", "iso_h_nz", "iso_local", "iso_local_h",
    "iso_local_h_nz", "iso_local_m", "iso_local_m_nz", "iso_local_ms",
    "iso_local_ms_nz", "iso_local_nz", "iso_m", "iso_m_nz", "iso_ms", "iso_ms_nz",
    "iso_nz", "iso_utc", "iso_utc_fz", "iso_utc_h", "iso_utc_h_nz", "iso_utc_m",
    "iso_utc_m_nz", "iso_utc_ms", "iso_utc_ms_nz", "iso_utc_nz", "item_cycle",
    "item_parity", "item_parity_cap", "j_string", "join", "js_string",
    "json_string", "keep_after", "keep_after_last", "keep_before",
    "keep_before_last", "keys", "last", "last_index_of", "left_pad", "length",
    "long", "lower_abc", "lower_case", "markup_string", "matches", "max", "min",
    "namespace", "new", "next_sibling", "no_esc", "node_name", "node_namespace",
    "node_type", "number", "number_to_date", "number_to_datetime",
    "number_to_time", "parent", "previous_sibling", "remove_beginning",
    "remove_ending", "replace", "reverse", "right_pad", "root", "round", "rtf",
    "seq_contains", "seq_index_of", "seq_last_index_of", "sequence", "short",
    "size", "sort", "sort_by", "split", "starts_with", "string", "substring",
    "switch", "then", "time", "time_if_unknown", "trim", "uncap_first",
    "upper_abc", "upper_case", "url", "url_path", "values", "web_safe",
    "word_list", "xhtml", "xml",
];

const FM3_BUILT_INS: &[&str] = &[
    "abs", "absoluteTemplateName", "ancestors", "api", "boolean", "byte", "c",
    "capFirst", "capitalize", "ceiling", "children", "chopLinebreak", "contains",
    "date", "dateIfUnknown", "dateTime", "dateTimeIfUnknown", "double",
    "endsWith", "ensureEndsWith", "ensureStartsWith", "esc", "eval", "first",
    "float", "floor", "chunk", "counter", "itemCycle", "hasApi", "hasContent",
    "hasNext", "html", "index", "indexOf", "int", "interpret", "isBoolean",
    "isIterable", "isCollection", "isDate", "isDateLike", "isDateOnly",
    "isEvenItem", "isFirst", "isLast", "isUnknownDateLike", "isDatetime",
    "isDirective", "isHashEx", "isHash", "isInfinite", "isMarkupOutput",
    "isFunction", "isNan", "isNode", "isNumber", "isOddItem", "isSequence",
    "isString", "isTime", "isoUtc", "isoUtcFZ", "isoUtcNZ", "isoUtcMs",
    "isoUtcMsNZ", "isoUtcM", "isoUtcMNZ", "isoUtcH", "isoUtcHNZ", "isoLocal",
    "isoLocalNZ", "isoLocalMs", "isoLocalMsNZ", "isoLocalM", "isoLocalMNZ",
    "isoLocalH", "isoLocalHNZ", "iso", "isoNZ", "isoMs", "isoMsNZ", "isoM",
    "isoMNZ", "isoH", "isoHNZ", "jString", "join", "jsString", "jsonString",
    "keepAfter", "keepBefore", "keepAfterLast", "keepBeforeLast", "keys",
    "lastIndexOf", "last", "leftPad", "length", "long", "lowerAbc", "lowerCase",
    "namespace", "new", "markupString", "nodeName", "nodeNamespace", "nodeType",
    "noEsc", "max", "min", "number", "numberToDate", "numberToTime",
    "numberToDatetime", "parent", "previousSibling", "nextSibling", "itemParity",
    "itemParityCap", "reverse", "rightPad", "root", "round", "removeEnding",
    "removeBeginning", "rtf", "sequence", "seqContains", "seqIndexOf",
    "seqLastIndexOf", "short", "size", "sortBy", "sort", "split", "switch",
    "then", "startsWith", "string", "substring", "time", "timeIfUnknown", "trim",
    "uncapFirst", "upperAbc", "upperCase", "url", "urlPath", "values",
    "wordList", "xhtml", "xml", "matches", "groups", "replace",
];

/// The camelCase spelling FreeMarker 2 itself accepted for a snake_case name.
/// Differs from the plain case conversion for the `_nz`/`_fz` ISO built-ins.
fn fm2_camel_spelling(snake: &str) -> String {
    for suffix in ["_nz", "_fz"] {
        if let Some(stem) = snake.strip_suffix(suffix) {
            return format!("{}{}", camel_case(stem), suffix[1..].to_uppercase());
        }
    }
    default_rename(snake)
}

/// Whether `name` is a built-in FreeMarker 2 knows, in either naming convention.
pub fn is_fm2_built_in(name: &str) -> bool {
    FM2_BUILT_INS
        .iter()
        .any(|snake| *snake == name || fm2_camel_spelling(snake) == name)
}

pub fn is_fm3_built_in(name: &str) -> bool {
    FM3_BUILT_INS.contains(&name)
}

/// The FreeMarker 3 name a FreeMarker 2 built-in should be converted to. The
/// result is only a candidate; check it with [`is_fm3_built_in`].
pub fn built_in_candidate(fm2_name: &str) -> String {
    lookup(IRREGULAR_BUILT_IN_NAMES, fm2_name)
        .map(str::to_string)
        .unwrap_or_else(|| default_rename(fm2_name))
}

// ---------------------------------------------------------------------------
// Built-in variables (`.name`)
// ---------------------------------------------------------------------------

const IRREGULAR_BUILT_IN_VARIABLE_NAMES: &[(&str, &str)] = &[
    ("current_node", "node"),
    ("currentNode", "node"),
    ("template_name", "currentTemplateName"),
    ("templateName", "currentTemplateName"),
];

const FM2_BUILT_IN_VARIABLES: &[&str] = &[
    "auto_esc", "caller_template_name", "current_node", "current_template_name",
    "data_model", "error", "get_optional_template", "globals",
    "incompatible_improvements", "lang", "locale", "locale_object", "locals",
    "main", "main_template_name", "namespace", "node", "now", "output_encoding",
    "output_format", "pass", "template_name", "url_escaping_charset", "vars",
    "version",
];

const FM3_BUILT_IN_VARIABLES: &[&str] = &[
    "mainTemplateName", "currentTemplateName", "namespace", "main", "globals",
    "locals", "dataModel", "lang", "locale", "localeObject", "node", "pass",
    "vars", "version", "incompatibleImprovements", "error", "outputEncoding",
    "outputFormat", "autoEsc", "urlEscapingCharset", "now",
    "getOptionalTemplate", "callerTemplateName",
];

pub fn is_fm2_built_in_variable(name: &str) -> bool {
    FM2_BUILT_IN_VARIABLES
        .iter()
        .any(|snake| *snake == name || default_rename(snake) == name)
}

pub fn is_fm3_built_in_variable(name: &str) -> bool {
    FM3_BUILT_IN_VARIABLES.contains(&name)
}

pub fn built_in_variable_candidate(fm2_name: &str) -> String {
    lookup(IRREGULAR_BUILT_IN_VARIABLE_NAMES, fm2_name)
        .map(str::to_string)
        .unwrap_or_else(|| default_rename(fm2_name))
}

// ---------------------------------------------------------------------------
// Settings (`#setting`)
// ---------------------------------------------------------------------------

const FM2_SETTINGS: &[&str] = &[
    "boolean_format", "classic_compatible", "date_format", "datetime_format",
    "locale", "number_format", "output_encoding", "sql_date_and_time_time_zone",
    "time_format", "time_zone", "url_escaping_charset",
];

const FM3_SETTINGS: &[&str] = &[
    "booleanFormat", "dateFormat", "datetimeFormat", "locale", "numberFormat",
    "outputEncoding", "sqlDateAndTimeTimeZone", "timeFormat", "timeZone",
    "urlEscapingCharset",
];

pub fn is_fm2_setting(name: &str) -> bool {
    FM2_SETTINGS
        .iter()
        .any(|snake| *snake == name || default_rename(snake) == name)
}

pub fn is_fm3_setting(name: &str) -> bool {
    FM3_SETTINGS.contains(&name)
}

pub fn setting_candidate(fm2_name: &str) -> String {
    default_rename(fm2_name)
}

// ---------------------------------------------------------------------------
// `#ftl` header parameters
// ---------------------------------------------------------------------------

const FM2_HEADER_PARAMS: &[&str] = &[
    "encoding", "strip_whitespace", "strip_text", "ns_prefixes", "attributes",
    "strict_syntax", "output_format", "auto_esc",
];

const FM3_HEADER_PARAMS: &[&str] = &[
    "encoding", "stripWhitespace", "stripText", "nsPrefixes", "customSettings",
    "outputFormat", "autoEsc",
];

pub fn is_fm2_header_param(name: &str) -> bool {
    FM2_HEADER_PARAMS
        .iter()
        .any(|snake| *snake == name || default_rename(snake) == name)
}

pub fn is_fm3_header_param(name: &str) -> bool {
    FM3_HEADER_PARAMS.contains(&name)
}

/// `None` when the parameter has no FreeMarker 3 counterpart.
pub fn header_param_candidate(fm2_name: &str) -> Option<String> {
    match default_rename(fm2_name).as_str() {
        "strictSyntax" => None,
        "attributes" => Some("customSettings".to_string()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// DOM hash keys
// ---------------------------------------------------------------------------

/// Renames `@@snake_name` DOM special keys. Other keys are left alone.
pub fn dom_key(key: &str) -> Option<String> {
    let rest = key.strip_prefix("@@")?;
    if rest.contains('_') {
        Some(format!("@@{}", camel_case(rest)))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Output formats
// ---------------------------------------------------------------------------

/// An output format a FreeMarker 2 template can be associated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyOutputFormat {
    Html,
    Xhtml,
    Xml,
    Rtf,
    PlainText,
    Undefined,
    JavaScript,
    Json,
    Css,
    /// A user registered format
    Custom { name: String, markup: bool },
}

impl LegacyOutputFormat {
    /// Resolves one of the standard output format names.
    pub fn standard(name: &str) -> Option<Self> {
        Some(match name {
            "HTML" => Self::Html,
            "XHTML" => Self::Xhtml,
            "XML" => Self::Xml,
            "RTF" => Self::Rtf,
            "plainText" => Self::PlainText,
            "undefined" => Self::Undefined,
            "JavaScript" => Self::JavaScript,
            "JSON" => Self::Json,
            "CSS" => Self::Css,
            _ => return None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Html => "HTML",
            Self::Xhtml => "XHTML",
            Self::Xml => "XML",
            Self::Rtf => "RTF",
            Self::PlainText => "plainText",
            Self::Undefined => "undefined",
            Self::JavaScript => "JavaScript",
            Self::Json => "JSON",
            Self::Css => "CSS",
            Self::Custom { name, .. } => name,
        }
    }

    /// Whether auto-escaping (`?esc`, `#autoesc`) is possible in this format.
    pub fn is_markup(&self) -> bool {
        match self {
            Self::Html | Self::Xhtml | Self::Xml | Self::Rtf => true,
            Self::Custom { markup, .. } => *markup,
            _ => false,
        }
    }
}

/// Output format counterpart on the FreeMarker 3 side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Html,
    Xhtml,
    Xml,
    Rtf,
    PlainText,
    Undefined,
    JavaScript,
    Json,
    Css,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Html => "HTML",
            Self::Xhtml => "XHTML",
            Self::Xml => "XML",
            Self::Rtf => "RTF",
            Self::PlainText => "plainText",
            Self::Undefined => "undefined",
            Self::JavaScript => "JavaScript",
            Self::Json => "JSON",
            Self::Css => "CSS",
        }
    }

    pub fn is_markup(&self) -> bool {
        matches!(self, Self::Html | Self::Xhtml | Self::Xml | Self::Rtf)
    }

    pub fn to_legacy(self) -> LegacyOutputFormat {
        match self {
            Self::Html => LegacyOutputFormat::Html,
            Self::Xhtml => LegacyOutputFormat::Xhtml,
            Self::Xml => LegacyOutputFormat::Xml,
            Self::Rtf => LegacyOutputFormat::Rtf,
            Self::PlainText => LegacyOutputFormat::PlainText,
            Self::Undefined => LegacyOutputFormat::Undefined,
            Self::JavaScript => LegacyOutputFormat::JavaScript,
            Self::Json => LegacyOutputFormat::Json,
            Self::Css => LegacyOutputFormat::Css,
        }
    }
}

/// Result of mapping a legacy output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedOutputFormat {
    pub format: OutputFormat,
    /// Set when there was no exact counterpart and a generic format was chosen
    pub approximate: bool,
}

/// Total mapping from legacy output formats to FreeMarker 3 ones.
pub fn map_output_format(format: &LegacyOutputFormat) -> MappedOutputFormat {
    let exact = |format| MappedOutputFormat {
        format,
        approximate: false,
    };
    match format {
        LegacyOutputFormat::Html => exact(OutputFormat::Html),
        LegacyOutputFormat::Xhtml => exact(OutputFormat::Xhtml),
        LegacyOutputFormat::Xml => exact(OutputFormat::Xml),
        LegacyOutputFormat::Rtf => exact(OutputFormat::Rtf),
        LegacyOutputFormat::PlainText => exact(OutputFormat::PlainText),
        LegacyOutputFormat::Undefined => exact(OutputFormat::Undefined),
        LegacyOutputFormat::JavaScript => exact(OutputFormat::JavaScript),
        LegacyOutputFormat::Json => exact(OutputFormat::Json),
        LegacyOutputFormat::Css => exact(OutputFormat::Css),
        LegacyOutputFormat::Custom { markup, .. } => MappedOutputFormat {
            format: if *markup {
                OutputFormat::Html
            } else {
                OutputFormat::PlainText
            },
            approximate: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case_to_camel_case() {
        assert_eq!(snake_case_to_camel_case(None), None);
        assert_eq!(snake_case_to_camel_case(Some("")).as_deref(), Some(""));
        assert_eq!(snake_case_to_camel_case(Some("foo")).as_deref(), Some("foo"));
        assert_eq!(snake_case_to_camel_case(Some("FOO")).as_deref(), Some("foo"));
        assert_eq!(snake_case_to_camel_case(Some("foo_bar")).as_deref(), Some("fooBar"));
        assert_eq!(
            snake_case_to_camel_case(Some("FOO_BAR_BAZ")).as_deref(),
            Some("fooBarBaz")
        );
        assert_eq!(snake_case_to_camel_case(Some("a_b_c")).as_deref(), Some("aBC"));
    }

    #[test]
    fn test_names_without_underscore_are_kept() {
        assert_eq!(default_rename("upperCase"), "upperCase");
        assert_eq!(default_rename("FOO"), "FOO");
        assert_eq!(default_rename("foo_bar"), "fooBar");
    }

    #[test]
    fn test_empty_words_are_ignored() {
        assert_eq!(camel_case("_foo_bar"), "fooBar");
        assert_eq!(camel_case("foo__bar_"), "fooBar");
        assert_eq!(camel_case("__"), "");
    }

    #[test]
    fn test_every_fm2_built_in_resolves() {
        let unmappable = ["is_enumerable", "is_indexable", "default", "exists", "if_exists"];
        for name in FM2_BUILT_INS {
            if unmappable.contains(name) {
                continue;
            }
            let converted = built_in_candidate(name);
            assert!(is_fm3_built_in(&converted), "{name} -> {converted}");
        }
    }

    #[test]
    fn test_irregular_built_ins() {
        assert_eq!(built_in_candidate("web_safe"), "html");
        assert_eq!(built_in_candidate("iso_utc_nz"), "isoUtcNZ");
        assert_eq!(built_in_candidate("is_collection_ex"), "isCollection");
        assert_eq!(built_in_candidate("upperCase"), "upperCase");
        assert!(is_fm2_built_in("isoUtcNZ"));
        assert!(is_fm2_built_in("upperCase"));
        assert!(!is_fm2_built_in("no_such_thing"));
    }

    #[test]
    fn test_built_in_variables() {
        assert_eq!(built_in_variable_candidate("current_node"), "node");
        assert_eq!(built_in_variable_candidate("template_name"), "currentTemplateName");
        assert_eq!(built_in_variable_candidate("data_model"), "dataModel");
        for name in FM2_BUILT_IN_VARIABLES {
            assert!(is_fm3_built_in_variable(&built_in_variable_candidate(name)), "{name}");
        }
    }

    #[test]
    fn test_header_params() {
        assert_eq!(header_param_candidate("attributes").as_deref(), Some("customSettings"));
        assert_eq!(header_param_candidate("strip_text").as_deref(), Some("stripText"));
        assert_eq!(header_param_candidate("strict_syntax"), None);
    }

    #[test]
    fn test_dom_keys() {
        assert_eq!(dom_key("@@nested_markup").as_deref(), Some("@@nestedMarkup"));
        assert_eq!(dom_key("@@markup"), None);
        assert_eq!(dom_key("foo_bar"), None);
    }

    #[test]
    fn test_custom_output_formats_map_approximately() {
        let markup = LegacyOutputFormat::Custom {
            name: "XUL".into(),
            markup: true,
        };
        let mapped = map_output_format(&markup);
        assert_eq!(mapped.format, OutputFormat::Html);
        assert!(mapped.approximate);

        let plain = LegacyOutputFormat::Custom {
            name: "Text2".into(),
            markup: false,
        };
        assert_eq!(map_output_format(&plain).format, OutputFormat::PlainText);
        assert!(!map_output_format(&LegacyOutputFormat::Xml).approximate);
    }
}
