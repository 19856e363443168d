//! Destination file name derivation.

use indexmap::IndexMap;

use crate::legacy::TagSyntax;

/// Built-in FreeMarker 2 to FreeMarker 3 extension substitutions, for
/// angle-bracket templates.
pub const PREDEFINED_FILE_EXTENSION_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("ftl", "f3ac"),
    ("ftlh", "f3ah"),
    ("ftlx", "f3ax"),
    ("fm", "f3ac"),
];

/// Case-insensitive full-match pattern selecting files worth converting by default.
pub const DEFAULT_INCLUDE: &str = r"(?i).*\.(ftl|ftlh|ftlx|fm)";

/// Merged extension table: explicit overrides layered over the built-in table.
#[derive(Debug, Clone)]
pub struct ExtensionSubstitutions {
    table: IndexMap<String, String>,
}

impl ExtensionSubstitutions {
    pub fn new(overrides: &IndexMap<String, String>, predefined_enabled: bool) -> Self {
        let mut table = IndexMap::new();
        if predefined_enabled {
            for (from, to) in PREDEFINED_FILE_EXTENSION_SUBSTITUTIONS {
                table.insert(from.to_string(), to.to_string());
            }
        }
        for (from, to) in overrides {
            table.insert(from.clone(), to.clone());
        }
        Self { table }
    }

    /// Case-sensitive lookup first, then a case-insensitive one.
    pub fn lookup(&self, extension: &str) -> Option<&str> {
        if let Some(found) = self.table.get(extension) {
            return Some(found);
        }
        self.table
            .iter()
            .find(|(from, _)| from.eq_ignore_ascii_case(extension))
            .map(|(_, to)| to.as_str())
    }

    /// Derives the destination file name for a legacy template.
    ///
    /// The directory part of `file_name` (up to the last `/`) is dropped. Names
    /// without extension, or with an extension that has no substitution, are
    /// returned unchanged.
    pub fn destination_file_name(&self, file_name: &str, syntax: TagSyntax) -> String {
        let base = match file_name.rfind('/') {
            Some(idx) => &file_name[idx + 1..],
            None => file_name,
        };
        let Some(dot) = base.rfind('.') else {
            return base.to_string();
        };
        let (stem, extension) = (&base[..dot], &base[dot + 1..]);
        match self.lookup(extension) {
            Some(replacement) => {
                let replacement = if syntax == TagSyntax::SquareBracket {
                    square_bracket_extension(replacement)
                } else {
                    replacement.to_string()
                };
                format!("{stem}.{replacement}")
            }
            None => base.to_string(),
        }
    }
}

/// `f3a?` extensions mark angle-bracket templates; `f3s?` the square-bracket ones.
fn square_bracket_extension(extension: &str) -> String {
    if extension.len() == 4 && extension.starts_with("f3a") {
        format!("f3s{}", &extension[3..])
    } else {
        extension.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predefined() -> ExtensionSubstitutions {
        ExtensionSubstitutions::new(&IndexMap::new(), true)
    }

    #[test]
    fn test_predefined_substitutions() {
        let subst = predefined();
        assert_eq!(subst.destination_file_name("template.ftl", TagSyntax::AngleBracket), "template.f3ac");
        assert_eq!(subst.destination_file_name("t.ftlh", TagSyntax::AngleBracket), "t.f3ah");
        assert_eq!(subst.destination_file_name("t.ftlx", TagSyntax::AngleBracket), "t.f3ax");
        assert_eq!(subst.destination_file_name("t.fm", TagSyntax::AngleBracket), "t.f3ac");
    }

    #[test]
    fn test_case_insensitive_fallback() {
        let subst = predefined();
        assert_eq!(
            subst.destination_file_name("template.FTL", TagSyntax::AngleBracket),
            "template.f3ac"
        );
    }

    #[test]
    fn test_square_bracket_syntax() {
        let subst = predefined();
        assert_eq!(subst.destination_file_name("t.ftl", TagSyntax::SquareBracket), "t.f3sc");
        assert_eq!(subst.destination_file_name("t.ftlx", TagSyntax::SquareBracket), "t.f3sx");
    }

    #[test]
    fn test_unmapped_names_are_unchanged() {
        let subst = predefined();
        assert_eq!(subst.destination_file_name("README", TagSyntax::AngleBracket), "README");
        assert_eq!(subst.destination_file_name("a/b/c.txt", TagSyntax::AngleBracket), "c.txt");
        assert_eq!(subst.destination_file_name("dir/t.ftl", TagSyntax::AngleBracket), "t.f3ac");
    }

    #[test]
    fn test_overrides_and_disabled_predefined() {
        let mut overrides = IndexMap::new();
        overrides.insert("ftl".to_string(), "fm3".to_string());
        overrides.insert("TXT".to_string(), "f3at".to_string());

        let subst = ExtensionSubstitutions::new(&overrides, true);
        assert_eq!(subst.destination_file_name("t.ftl", TagSyntax::AngleBracket), "t.fm3");
        assert_eq!(subst.destination_file_name("t.ftlh", TagSyntax::AngleBracket), "t.f3ah");
        assert_eq!(subst.destination_file_name("t.txt", TagSyntax::SquareBracket), "t.f3st");

        let disabled = ExtensionSubstitutions::new(&IndexMap::new(), false);
        assert_eq!(disabled.destination_file_name("t.ftl", TagSyntax::AngleBracket), "t.ftl");
    }
}
