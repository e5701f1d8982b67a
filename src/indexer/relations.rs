//! Call, import and re-export references found in one parsed file.
use super::ChunkError;
use super::languages::LanguageConfig;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tree_sitter::{Node, Query, QueryCursor, StreamingIterator};

/// Plain identifier paths only: `foo`, `obj.method`, `pkg::Type::new`.
static CALLEE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][\w$]*(?:(?:\.|::)[A-Za-z_$][\w$]*)*$")
        .unwrap_or_else(|e| unreachable!("callee pattern is valid: {e}"))
});

/// A callee expression and where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub callee: String,
    pub start_byte: usize,
}

/// A re-export statement, already rendered as `* from M` / `name from M`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReExport {
    pub entries: Vec<String>,
    pub start_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct FileReferences {
    pub calls: Vec<CallSite>,
    pub imports: Vec<String>,
    pub reexports: Vec<ReExport>,
}

pub struct RelationExtractor {
    call_query: Query,
    import_query: Query,
    export_query: Option<Query>,
    language: &'static str,
}

impl RelationExtractor {
    pub fn new(config: &LanguageConfig) -> Result<Self, ChunkError> {
        let export_query = if config.export_query.is_empty() {
            None
        } else {
            Some(Query::new(&config.language, config.export_query)?)
        };
        Ok(Self {
            call_query: Query::new(&config.language, config.call_query)?,
            import_query: Query::new(&config.language, config.import_query)?,
            export_query,
            language: config.name,
        })
    }

    pub fn extract(&self, root: Node, source: &[u8]) -> FileReferences {
        FileReferences {
            calls: self.calls(root, source),
            imports: self.imports(root, source),
            reexports: self.reexports(root, source),
        }
    }

    fn calls(&self, root: Node, source: &[u8]) -> Vec<CallSite> {
        let mut cursor = QueryCursor::new();
        let mut calls = Vec::new();

        let mut matches = cursor.matches(&self.call_query, root, source);
        while let Some(m) = matches.next() {
            for cap in m.captures {
                let Ok(text) = cap.node.utf8_text(source) else {
                    continue;
                };
                if let Some(callee) = clean_callee(text) {
                    calls.push(CallSite {
                        callee,
                        start_byte: cap.node.start_byte(),
                    });
                }
            }
        }

        calls.sort_by_key(|c| c.start_byte);
        calls
    }

    fn imports(&self, root: Node, source: &[u8]) -> Vec<String> {
        let mut cursor = QueryCursor::new();
        let mut imports = Vec::new();
        let mut seen = HashSet::new();

        let mut matches = cursor.matches(&self.import_query, root, source);
        while let Some(m) = matches.next() {
            for cap in m.captures {
                let Ok(text) = cap.node.utf8_text(source) else {
                    continue;
                };
                let mut spec = strip_quotes(text).to_string();
                if self.language == "rust" {
                    spec = rust_module_path(&spec);
                }
                if !spec.is_empty() && seen.insert(spec.clone()) {
                    imports.push(spec);
                }
            }
        }

        imports
    }

    fn reexports(&self, root: Node, source: &[u8]) -> Vec<ReExport> {
        let Some(query) = &self.export_query else {
            return Vec::new();
        };
        let statement_idx = query.capture_index_for_name("reexport");
        let source_idx = query.capture_index_for_name("source");

        let mut cursor = QueryCursor::new();
        let mut reexports = Vec::new();

        let mut matches = cursor.matches(query, root, source);
        while let Some(m) = matches.next() {
            let statement = m
                .captures
                .iter()
                .find(|c| Some(c.index) == statement_idx)
                .map(|c| c.node);
            let module = m
                .captures
                .iter()
                .find(|c| Some(c.index) == source_idx)
                .map(|c| c.node);
            let (Some(statement), Some(module)) = (statement, module) else {
                continue;
            };
            let (Ok(text), Ok(module_text)) =
                (statement.utf8_text(source), module.utf8_text(source))
            else {
                continue;
            };

            let entries = if self.language == "rust" {
                rust_reexport_entries(module_text)
            } else {
                js_reexport_entries(statement, source, strip_quotes(module_text))
            };
            if entries.is_empty() {
                continue;
            }

            reexports.push(ReExport {
                entries,
                start_byte: statement.start_byte(),
                start_line: statement.start_position().row + 1,
                end_line: statement.end_position().row + 1,
                text: text.to_string(),
            });
        }

        if matches!(self.language, "typescript" | "javascript") {
            reexports.extend(js_local_reexports(root, source));
            reexports.sort_by_key(|r| r.start_byte);
        }
        reexports
    }
}

fn strip_quotes(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

/// `this.helper` / `self.helper` calls target the enclosing type's own members.
fn clean_callee(text: &str) -> Option<String> {
    let text = text.trim();
    let text = text
        .strip_prefix("this.")
        .or_else(|| text.strip_prefix("self."))
        .unwrap_or(text);
    if CALLEE_RE.is_match(text) {
        Some(text.to_string())
    } else {
        None
    }
}

/// `crate::db::models::{A, B}` and `crate::db::*` both name module `crate::db::models` / `crate::db`.
fn rust_module_path(spec: &str) -> String {
    let spec = spec.split('{').next().unwrap_or(spec);
    spec.trim_end_matches("::*")
        .trim_end_matches("::")
        .trim()
        .to_string()
}

fn rust_reexport_entries(argument: &str) -> Vec<String> {
    let argument = argument.trim();
    if let Some(module) = argument.strip_suffix("::*") {
        return vec![format!("* from {}", module.trim())];
    }
    if let Some((module, list)) = argument.split_once("::{") {
        let module = module.trim();
        return list
            .trim_end_matches('}')
            .split(',')
            .filter_map(|item| {
                let name = item.rsplit(" as ").next()?.trim();
                let name = name.rsplit("::").next()?.trim();
                (!name.is_empty() && name != "self").then(|| format!("{name} from {module}"))
            })
            .collect();
    }
    let argument = argument.split(" as ").next().unwrap_or(argument).trim();
    match argument.rsplit_once("::") {
        Some((module, name)) => vec![format!("{name} from {module}")],
        None => Vec::new(),
    }
}

fn js_reexport_entries(statement: Node, source: &[u8], module: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut stack = vec![statement];
    while let Some(node) = stack.pop() {
        if node.kind() == "export_specifier" {
            // The source module knows the binding by its original name
            let original = node
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(source).ok());
            if let Some(name) = original {
                entries.push(format!("{} from {module}", strip_quotes(name)));
            }
            continue;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }

    if entries.is_empty() {
        // `export * from` and `export * as ns from`
        let mut cursor = statement.walk();
        if statement.children(&mut cursor).any(|c| c.kind() == "*" || c.kind() == "namespace_export") {
            entries.push(format!("* from {module}"));
        }
    }

    entries.sort();
    entries
}

/// `import { x } from './a'; export { x };` re-exports `x` from `./a`.
fn js_local_reexports(root: Node, source: &[u8]) -> Vec<ReExport> {
    let mut bindings = HashMap::new();
    let mut local_exports = Vec::new();
    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        match statement.kind() {
            "import_statement" => collect_import_bindings(statement, source, &mut bindings),
            "export_statement" if statement.child_by_field_name("source").is_none() => {
                local_exports.push(statement)
            }
            _ => {}
        }
    }

    let mut reexports = Vec::new();
    for statement in local_exports {
        let mut entries = Vec::new();
        let mut cursor = statement.walk();
        for clause in statement
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "export_clause")
        {
            let mut inner = clause.walk();
            for specifier in clause
                .named_children(&mut inner)
                .filter(|c| c.kind() == "export_specifier")
            {
                let local = specifier
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(source).ok());
                if let Some((imported, module)) = local.and_then(|l| bindings.get(strip_quotes(l))) {
                    entries.push(format!("{imported} from {module}"));
                }
            }
        }
        if entries.is_empty() {
            continue;
        }
        entries.sort();
        entries.dedup();
        let Ok(text) = statement.utf8_text(source) else {
            continue;
        };
        reexports.push(ReExport {
            entries,
            start_byte: statement.start_byte(),
            start_line: statement.start_position().row + 1,
            end_line: statement.end_position().row + 1,
            text: text.to_string(),
        });
    }
    reexports
}

/// Local binding → (name in the source module, module specifier).
fn collect_import_bindings(
    statement: Node,
    source: &[u8],
    bindings: &mut HashMap<String, (String, String)>,
) {
    let Some(module) = statement
        .child_by_field_name("source")
        .and_then(|n| n.utf8_text(source).ok())
        .map(|m| strip_quotes(m).to_string())
    else {
        return;
    };
    let text = |n: Node| n.utf8_text(source).ok().map(str::to_string);

    let mut cursor = statement.walk();
    for clause in statement
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "import_clause")
    {
        let mut inner = clause.walk();
        for part in clause.named_children(&mut inner) {
            match part.kind() {
                "identifier" => {
                    if let Some(local) = text(part) {
                        bindings.insert(local, ("default".to_string(), module.clone()));
                    }
                }
                "namespace_import" => {
                    let mut ns = part.walk();
                    let local = part
                        .named_children(&mut ns)
                        .find(|c| c.kind() == "identifier")
                        .and_then(text);
                    if let Some(local) = local {
                        bindings.insert(local, ("*".to_string(), module.clone()));
                    }
                }
                "named_imports" => {
                    let mut specs = part.walk();
                    for specifier in part
                        .named_children(&mut specs)
                        .filter(|c| c.kind() == "import_specifier")
                    {
                        let Some(name) = specifier.child_by_field_name("name").and_then(text) else {
                            continue;
                        };
                        let local = specifier
                            .child_by_field_name("alias")
                            .and_then(text)
                            .unwrap_or_else(|| name.clone());
                        bindings.insert(local, (name, module.clone()));
                    }
                }
                _ => {}
            }
        }
    }
}
