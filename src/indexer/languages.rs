use tree_sitter::Language;

/// Extension → language name, without building any grammar.
const EXTENSION_TABLE: &[(&str, &str)] = &[
    ("go", "go"),
    ("py", "python"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("mts", "typescript"),
    ("cts", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("rs", "rust"),
];

/// Source extensions probed when resolving an extensionless import.
pub const PROBE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs", "go"];

pub struct LanguageConfig {
    pub name: &'static str,
    pub language: Language,
    pub extensions: &'static [&'static str],
    /// Declarations. Captures: `@name` plus one kind capture among
    /// `@function @method @class @struct @interface @module @anonymous`.
    pub query: &'static str,
    /// Callee expressions, captured as `@call`.
    pub call_query: &'static str,
    /// Module specifiers, captured as `@import`.
    pub import_query: &'static str,
    /// Re-export statements (`@reexport`) with their module (`@source`).
    pub export_query: &'static str,
}

impl LanguageConfig {
    pub fn get_all() -> Vec<LanguageConfig> {
        vec![
            go_config(),
            python_config(),
            typescript_config(),
            javascript_config(),
            rust_config(),
        ]
    }
}

/// Language name for a file path, judged by its extension.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.').map(|(_, e)| e)?;
    if ext.contains('/') {
        return None;
    }
    let ext = ext.to_ascii_lowercase();
    EXTENSION_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Names accepted by language filters, sorted.
pub fn supported_languages() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = EXTENSION_TABLE.iter().map(|(_, l)| *l).collect();
    names.sort_unstable();
    names.dedup();
    names
}

fn go_config() -> LanguageConfig {
    LanguageConfig {
        name: "go",
        language: tree_sitter_go::LANGUAGE.into(),
        extensions: &["go"],
        query: r#"
(function_declaration
  name: (identifier) @name) @function

(method_declaration
  name: (field_identifier) @name) @method

(type_declaration
  (type_spec
    name: (type_identifier) @name
    type: (struct_type))) @struct

(type_declaration
  (type_spec
    name: (type_identifier) @name
    type: (interface_type))) @interface

(argument_list
  (func_literal) @anonymous)
"#,
        call_query: r#"
(call_expression
  function: (_) @call)
"#,
        import_query: r#"
(import_spec
  path: (interpreted_string_literal) @import)
"#,
        export_query: "",
    }
}

fn python_config() -> LanguageConfig {
    LanguageConfig {
        name: "python",
        language: tree_sitter_python::LANGUAGE.into(),
        extensions: &["py"],
        query: r#"
(function_definition
  name: (identifier) @name) @function

(class_definition
  name: (identifier) @name) @class

(argument_list
  (lambda) @anonymous)
"#,
        call_query: r#"
(call
  function: (_) @call)
"#,
        import_query: r#"
(import_statement
  name: (dotted_name) @import)
(import_statement
  name: (aliased_import
    name: (dotted_name) @import))
(import_from_statement
  module_name: (dotted_name) @import)
(import_from_statement
  module_name: (relative_import) @import)
"#,
        export_query: "",
    }
}

fn typescript_config() -> LanguageConfig {
    LanguageConfig {
        name: "typescript",
        language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        extensions: &["ts", "tsx", "mts", "cts"],
        query: r#"
(function_declaration
  name: (identifier) @name) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(class_declaration
  name: (type_identifier) @name) @class

(abstract_class_declaration
  name: (type_identifier) @name) @class

(interface_declaration
  name: (type_identifier) @name) @interface

(method_definition
  name: (property_identifier) @name) @method

(internal_module
  name: (identifier) @name) @module

(arguments
  (arrow_function) @anonymous)

(arguments
  (function_expression) @anonymous)
"#,
        call_query: r#"
(call_expression
  function: (_) @call)
"#,
        import_query: r#"
(import_statement
  source: (string) @import)
"#,
        export_query: r#"
(export_statement
  source: (string) @source) @reexport
"#,
    }
}

fn javascript_config() -> LanguageConfig {
    LanguageConfig {
        name: "javascript",
        language: tree_sitter_javascript::LANGUAGE.into(),
        extensions: &["js", "jsx", "mjs", "cjs"],
        query: r#"
(function_declaration
  name: (identifier) @name) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(class_declaration
  name: (identifier) @name) @class

(method_definition
  name: (property_identifier) @name) @method

(arguments
  (arrow_function) @anonymous)

(arguments
  (function_expression) @anonymous)
"#,
        call_query: r#"
(call_expression
  function: (_) @call)
"#,
        import_query: r#"
(import_statement
  source: (string) @import)
"#,
        export_query: r#"
(export_statement
  source: (string) @source) @reexport
"#,
    }
}

fn rust_config() -> LanguageConfig {
    LanguageConfig {
        name: "rust",
        language: tree_sitter_rust::LANGUAGE.into(),
        extensions: &["rs"],
        query: r#"
(function_item
  name: (identifier) @name) @function

(struct_item
  name: (type_identifier) @name) @struct

(enum_item
  name: (type_identifier) @name) @struct

(trait_item
  name: (type_identifier) @name) @interface

(mod_item
  name: (identifier) @name) @module

(arguments
  (closure_expression) @anonymous)
"#,
        call_query: r#"
(call_expression
  function: (_) @call)
"#,
        import_query: r#"
(use_declaration
  argument: (scoped_identifier) @import)
(use_declaration
  argument: (identifier) @import)
(use_declaration
  argument: (use_wildcard) @import)
(use_declaration
  argument: (scoped_use_list
    path: (_) @import))
"#,
        export_query: r#"
(use_declaration
  (visibility_modifier)
  argument: (_) @source) @reexport
"#,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Query;

    #[test]
    fn test_all_queries_compile() {
        for config in LanguageConfig::get_all() {
            for (label, source) in [
                ("symbols", config.query),
                ("calls", config.call_query),
                ("imports", config.import_query),
                ("exports", config.export_query),
            ] {
                if source.is_empty() {
                    continue;
                }
                if let Err(e) = Query::new(&config.language, source) {
                    panic!("{} {} query failed to compile: {e}", config.name, label);
                }
            }
        }
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path("src/a.ts"), Some("typescript"));
        assert_eq!(language_for_path("pkg/Main.GO"), Some("go"));
        assert_eq!(language_for_path("lib/mod.rs"), Some("rust"));
        assert_eq!(language_for_path("README.md"), None);
        assert_eq!(language_for_path("a.b/Makefile"), None);
        assert_eq!(language_for_path("noext"), None);
    }

    #[test]
    fn test_extension_table_matches_configs() {
        let configs = LanguageConfig::get_all();
        for (ext, lang) in EXTENSION_TABLE {
            let config = configs.iter().find(|c| c.extensions.contains(ext)).unwrap();
            assert_eq!(config.name, *lang);
        }
        assert_eq!(
            supported_languages(),
            vec!["go", "javascript", "python", "rust", "typescript"]
        );
    }
}
