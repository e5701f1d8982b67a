use super::complexity;
use super::languages::{LanguageConfig, language_for_path};
use super::relations::{FileReferences, RelationExtractor};
use super::{ChunkError, ChunkSource};
use crate::db::models::{ANONYMOUS_NAME, ChunkKind, ChunkMetadata, Complexity, SourceChunk};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

struct CompiledLanguage {
    config: LanguageConfig,
    symbols: Query,
    relations: RelationExtractor,
}

/// Declaration-level chunker over the tree-sitter grammars in [`LanguageConfig`].
pub struct TreeSitterChunkSource {
    languages: HashMap<&'static str, CompiledLanguage>,
}

/// A declaration captured by the symbol query.
struct Symbol<'t> {
    node: Node<'t>,
    kind: ChunkKind,
    name: Option<String>,
    anonymous: bool,
}

impl TreeSitterChunkSource {
    pub fn new() -> Result<Self, ChunkError> {
        let mut languages = HashMap::new();
        for config in LanguageConfig::get_all() {
            let symbols = Query::new(&config.language, config.query)?;
            let relations = RelationExtractor::new(&config)?;
            languages.insert(
                config.name,
                CompiledLanguage {
                    config,
                    symbols,
                    relations,
                },
            );
        }
        Ok(Self { languages })
    }

    /// Chunks `source` as language `lang`; `file_path` is only used for naming.
    pub fn chunk_code(
        &self,
        file_path: &str,
        source: &str,
        lang: &str,
    ) -> Result<Vec<SourceChunk>, ChunkError> {
        let compiled = self
            .languages
            .get(lang)
            .ok_or_else(|| ChunkError::Unsupported(format!("{file_path} ({lang})")))?;

        let mut parser = Parser::new();
        parser.set_language(&compiled.config.language)?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ChunkError::Extraction(format!("no syntax tree for {file_path}")))?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ChunkError::Syntax {
                file: file_path.to_string(),
                line: first_error_line(root),
            });
        }

        let bytes = source.as_bytes();
        let symbols = collect_symbols(&compiled.symbols, root, bytes);
        let refs = compiled.relations.extract(root, bytes);
        build_chunks(file_path, lang, &symbols, &refs, bytes)
    }
}

impl ChunkSource for TreeSitterChunkSource {
    fn chunk_file(&self, file_path: &str, source: &str) -> Result<Vec<SourceChunk>, ChunkError> {
        let lang = language_for_path(file_path)
            .ok_or_else(|| ChunkError::Unsupported(file_path.to_string()))?;
        self.chunk_code(file_path, source, lang)
    }
}

fn collect_symbols<'t>(query: &Query, root: Node<'t>, source: &[u8]) -> Vec<Symbol<'t>> {
    let mut cursor = QueryCursor::new();
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    let mut matches = cursor.matches(query, root, source);
    while let Some(m) = matches.next() {
        let mut main = None;
        let mut name = None;
        let mut anonymous = false;

        for cap in m.captures {
            let capture_name = query.capture_names()[cap.index as usize];
            let kind = match capture_name {
                "name" => {
                    name = cap.node.utf8_text(source).ok().map(str::to_string);
                    continue;
                }
                "function" => ChunkKind::Function,
                "anonymous" => {
                    anonymous = true;
                    ChunkKind::Function
                }
                "method" => ChunkKind::Method,
                "class" | "struct" => ChunkKind::Class,
                "interface" => ChunkKind::Interface,
                "module" => ChunkKind::Module,
                _ => continue,
            };
            main = Some((cap.node, kind));
        }

        if let Some((node, kind)) = main {
            if seen.insert((node.start_byte(), node.end_byte())) {
                symbols.push(Symbol {
                    node,
                    kind,
                    name,
                    anonymous,
                });
            }
        }
    }

    symbols.sort_by(|a, b| {
        a.node
            .start_byte()
            .cmp(&b.node.start_byte())
            .then(b.node.end_byte().cmp(&a.node.end_byte()))
    });
    symbols
}

fn build_chunks(
    file_path: &str,
    lang: &str,
    symbols: &[Symbol],
    refs: &FileReferences,
    source: &[u8],
) -> Result<Vec<SourceChunk>, ChunkError> {
    let by_range: HashMap<(usize, usize), usize> = symbols
        .iter()
        .enumerate()
        .map(|(i, s)| ((s.node.start_byte(), s.node.end_byte()), i))
        .collect();

    let mut calls: Vec<Vec<String>> = vec![Vec::new(); symbols.len()];
    for site in &refs.calls {
        if let Some(owner) = innermost_symbol(symbols, site.start_byte) {
            if !calls[owner].contains(&site.callee) {
                calls[owner].push(site.callee.clone());
            }
        }
    }

    let mut positioned = Vec::with_capacity(symbols.len() + 1);
    for (i, symbol) in symbols.iter().enumerate() {
        let node = symbol.node;
        let source_text = node
            .utf8_text(source)
            .map_err(|e| ChunkError::Extraction(format!("{file_path}: {e}")))?
            .to_string();
        let signature = extract_signature(node, &source_text, source, lang);
        let (parent, class_like_parent) = find_parent_symbol(node, i, symbols, &by_range, source, lang);

        let kind = if symbol.kind == ChunkKind::Function && class_like_parent {
            ChunkKind::Method
        } else {
            symbol.kind
        };

        let mut type_hints = BTreeMap::new();
        if let Some(ret) = node
            .child_by_field_name("return_type")
            .or_else(|| node.child_by_field_name("result"))
            .and_then(|n| n.utf8_text(source).ok())
        {
            let ret = ret.trim_start_matches([':', '-', '>', ' ']).trim();
            type_hints.insert("return".to_string(), Value::String(ret.to_string()));
        }

        let exports = match &symbol.name {
            Some(name) if is_exported(node, name, lang) => vec![name.clone()],
            _ => Vec::new(),
        };

        let name = if symbol.anonymous {
            Some(ANONYMOUS_NAME.to_string())
        } else {
            symbol.name.clone()
        };

        let metadata = ChunkMetadata {
            name,
            kind: None,
            imports: if parent.is_none() {
                refs.imports.clone()
            } else {
                Vec::new()
            },
            parent,
            is_async: signature.split_whitespace().any(|w| w == "async"),
            signature: Some(signature),
            calls: calls[i].clone(),
            exports,
            decorators: decorators(node, source),
            type_hints,
            complexity: Some(complexity::measure(node)),
        };

        positioned.push((
            node.start_byte(),
            SourceChunk {
                kind,
                language: lang.to_string(),
                source_text,
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
                metadata,
            },
        ));
    }

    if let Some(first) = refs.reexports.first() {
        positioned.push((first.start_byte, barrel_chunk(file_path, lang, refs)));
    }

    positioned.sort_by_key(|(start, _)| *start);
    Ok(positioned.into_iter().map(|(_, chunk)| chunk).collect())
}

/// One chunk standing for every re-export statement of the file.
fn barrel_chunk(file_path: &str, lang: &str, refs: &FileReferences) -> SourceChunk {
    let stem = file_path
        .rsplit('/')
        .next()
        .and_then(|f| f.split('.').next())
        .unwrap_or(file_path);

    let exports: Vec<String> = refs
        .reexports
        .iter()
        .flat_map(|r| r.entries.iter().cloned())
        .collect();
    let start_line = refs.reexports.iter().map(|r| r.start_line).min().unwrap_or(1);
    let end_line = refs.reexports.iter().map(|r| r.end_line).max().unwrap_or(start_line);
    let source_text = refs
        .reexports
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    SourceChunk {
        kind: ChunkKind::Barrel,
        language: lang.to_string(),
        source_text,
        start_line,
        end_line,
        metadata: ChunkMetadata {
            name: Some(stem.to_string()),
            imports: refs.imports.clone(),
            exports,
            complexity: Some(Complexity {
                cyclomatic: 1,
                loc: (end_line - start_line + 1) as u32,
            }),
            ..Default::default()
        },
    }
}

fn innermost_symbol(symbols: &[Symbol], byte: usize) -> Option<usize> {
    symbols
        .iter()
        .enumerate()
        .filter(|(_, s)| s.node.start_byte() <= byte && byte < s.node.end_byte())
        .max_by(|(_, a), (_, b)| {
            a.node
                .start_byte()
                .cmp(&b.node.start_byte())
                .then(b.node.end_byte().cmp(&a.node.end_byte()))
        })
        .map(|(i, _)| i)
}

fn is_exported(node: Node, name: &str, lang: &str) -> bool {
    if node.parent().is_some_and(|p| p.kind() == "export_statement") {
        return true;
    }
    match lang {
        "rust" => {
            let mut cursor = node.walk();
            node.children(&mut cursor)
                .any(|c| c.kind() == "visibility_modifier")
        }
        "go" => name.chars().next().is_some_and(char::is_uppercase),
        _ => false,
    }
}

fn decorators(node: Node, source: &[u8]) -> Vec<String> {
    let mut found = Vec::new();
    let mut collect = |n: Node| {
        if n.kind() == "decorator" {
            if let Ok(text) = n.utf8_text(source) {
                let name = text.trim().trim_start_matches('@');
                let name = name.split('(').next().unwrap_or(name).trim();
                if !name.is_empty() {
                    found.push(name.to_string());
                }
            }
        }
    };

    // Python wraps decorated definitions
    if let Some(parent) = node.parent() {
        if parent.kind() == "decorated_definition" {
            let mut cursor = parent.walk();
            for child in parent.children(&mut cursor) {
                collect(child);
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child);
    }

    // Class members in TypeScript carry decorators as preceding siblings
    let mut preceding = Vec::new();
    let mut prev = node.prev_named_sibling();
    while let Some(sibling) = prev {
        if sibling.kind() != "decorator" {
            break;
        }
        preceding.push(sibling);
        prev = sibling.prev_named_sibling();
    }
    for sibling in preceding.into_iter().rev() {
        collect(sibling);
    }

    found
}

fn first_error_line(root: Node) -> usize {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return node.start_position().row + 1;
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        // Reverse so the earliest child is visited first
        stack.extend(children.into_iter().rev());
    }
    root.start_position().row + 1
}

fn collapse(sig: &str) -> String {
    sig.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Start of the declaration's body, looking through `const f = () => ...`.
fn body_start(node: Node) -> Option<usize> {
    if let Some(body) = node.child_by_field_name("body") {
        return Some(body.start_byte());
    }
    let mut cursor = node.walk();
    let declared = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "variable_declarator")
        .find_map(|d| d.child_by_field_name("value"))
        .and_then(|value| value.child_by_field_name("body"))
        .map(|body| body.start_byte());
    declared
}

/// Everything in front of the body, on one line.
fn extract_signature(node: Node, content: &str, source: &[u8], lang: &str) -> String {
    let start = node.start_byte();
    let head = body_start(node)
        .filter(|&cut| cut > start)
        .and_then(|cut| source.get(start..cut))
        .and_then(|bytes| std::str::from_utf8(bytes).ok());
    if let Some(head) = head {
        let head = collapse(head);
        return match lang {
            "python" => head.trim_end_matches(':').trim_end().to_string(),
            _ => head,
        };
    }

    let content = content.trim();
    let first_line = content.lines().next().unwrap_or("").trim();
    match content.find('{') {
        Some(idx) => collapse(&content[..idx]),
        None => first_line.to_string(),
    }
}

/// Nearest enclosing named declaration, and whether it is a type (class,
/// struct, interface or Rust `impl` block).
fn find_parent_symbol(
    node: Node,
    own_index: usize,
    symbols: &[Symbol],
    by_range: &HashMap<(usize, usize), usize>,
    source: &[u8],
    lang: &str,
) -> (Option<String>, bool) {
    let mut parent = node.parent();
    while let Some(p) = parent {
        if let Some(&j) = by_range.get(&(p.start_byte(), p.end_byte())) {
            if j != own_index {
                if let Some(name) = &symbols[j].name {
                    let class_like =
                        matches!(symbols[j].kind, ChunkKind::Class | ChunkKind::Interface);
                    return (Some(name.clone()), class_like);
                }
            }
        }
        if lang == "rust" && p.kind() == "impl_item" {
            if let Some(name) = p
                .child_by_field_name("type")
                .and_then(|t| t.utf8_text(source).ok())
            {
                return (Some(name.to_string()), true);
            }
        }
        parent = p.parent();
    }
    (None, false)
}
