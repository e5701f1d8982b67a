//! Name, type and label resolution for graph nodes.
use crate::db::models::{ChunkKind, ChunkMetadata};
use regex::Regex;
use std::sync::LazyLock;

/// `function foo`, `def foo`, `fn foo`, `func (r *T) Foo`, `class Foo`, ...
static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)(?:function\*?|def|fn|func(?:\s*\([^)]*\))?|class|interface|struct|trait|enum|type|mod|module|const|let|var)\s+([A-Za-z_$][\w$]*)",
    )
    .unwrap_or_else(|e| unreachable!("declaration pattern is valid: {e}"))
});

/// Outcome of name resolution. A placeholder is a fallback, not a real name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedName {
    Resolved(String),
    Placeholder(String),
}

impl ResolvedName {
    pub fn as_str(&self) -> &str {
        match self {
            ResolvedName::Resolved(name) | ResolvedName::Placeholder(name) => name,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ResolvedName::Placeholder(_))
    }
}

/// Tries `metadata.name`, then a name read off the signature, then falls
/// back to `<kind>_<index>`.
pub fn resolve_name(metadata: &ChunkMetadata, kind: &str, chunk_index: usize) -> ResolvedName {
    if let Some(name) = metadata.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        return ResolvedName::Resolved(name.to_string());
    }
    if let Some(name) = metadata.signature.as_deref().and_then(name_from_signature) {
        return ResolvedName::Resolved(name);
    }
    let kind = kind.trim().to_ascii_lowercase();
    let kind = if kind.is_empty() { "chunk" } else { kind.as_str() };
    ResolvedName::Placeholder(format!("{kind}_{chunk_index}"))
}

/// The name a declaration keyword introduces. Identifiers that merely sit in
/// front of `(` are calls or parameter types, not names.
pub fn name_from_signature(signature: &str) -> Option<String> {
    DECLARATION_RE
        .captures(signature)
        .map(|caps| caps[1].to_string())
}

/// Declared type: `metadata.type` first, then the stored kind.
pub fn resolve_kind(metadata: &ChunkMetadata, stored_kind: &str) -> Option<ChunkKind> {
    metadata
        .kind
        .as_deref()
        .and_then(|k| k.parse().ok())
        .or_else(|| stored_kind.parse().ok())
}

/// Caps `name` at `max_len` characters, marking a cut with `...`.
pub fn make_label(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut label: String = name.chars().take(keep).collect();
    label.push_str("...");
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: Option<&str>, signature: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            name: name.map(String::from),
            signature: signature.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_name_order() {
        assert_eq!(
            resolve_name(&meta(Some("add"), Some("function other()")), "function", 0),
            ResolvedName::Resolved("add".into())
        );
        assert_eq!(
            resolve_name(&meta(None, Some("export async function load(id) {")), "function", 0),
            ResolvedName::Resolved("load".into())
        );
        assert_eq!(
            resolve_name(&meta(Some("  "), None), "Class", 7),
            ResolvedName::Placeholder("class_7".into())
        );
        // A closure body never lends its callee as a name
        assert_eq!(
            resolve_name(&meta(None, Some("lambda x: transform(x)")), "function", 4),
            ResolvedName::Placeholder("function_4".into())
        );
    }

    #[test]
    fn test_name_from_signature() {
        assert_eq!(name_from_signature("def build(cls, x):").as_deref(), Some("build"));
        assert_eq!(name_from_signature("pub fn open(path: &Path) -> Self").as_deref(), Some("open"));
        assert_eq!(name_from_signature("func (s *Server) Start() error").as_deref(), Some("Start"));
        assert_eq!(name_from_signature("export const load = async (id) =>").as_deref(), Some("load"));
        assert_eq!(name_from_signature("async fetchAll(ids) {"), None);
        assert_eq!(name_from_signature("(x) => x + 1"), None);
        assert_eq!(name_from_signature("function () {"), None);
        assert_eq!(name_from_signature("lambda x: transform(x)"), None);
        assert_eq!(name_from_signature("func(x int) int"), None);
        assert_eq!(name_from_signature("|c| c.to_string()"), None);
        assert_eq!(name_from_signature("(i: Array<string>) =>"), None);
    }

    #[test]
    fn test_resolve_kind() {
        let mut m = meta(None, None);
        assert_eq!(resolve_kind(&m, "function"), Some(ChunkKind::Function));
        m.kind = Some("Interface".into());
        assert_eq!(resolve_kind(&m, "function"), Some(ChunkKind::Interface));
        m.kind = Some("widget".into());
        assert_eq!(resolve_kind(&m, "class"), Some(ChunkKind::Class));
        assert_eq!(resolve_kind(&m, "gadget"), None);
    }

    #[test]
    fn test_make_label() {
        assert_eq!(make_label("short", 60), "short");
        let exact = "a".repeat(60);
        assert_eq!(make_label(&exact, 60), exact);

        let long = "b".repeat(61);
        let label = make_label(&long, 60);
        assert_eq!(label.chars().count(), 60);
        assert!(label.ends_with("..."));
        assert_eq!(&label[..57], &long[..57]);

        let wide = "é".repeat(70);
        let label = make_label(&wide, 60);
        assert_eq!(label.chars().count(), 60);
        assert!(label.starts_with(&"é".repeat(57)));
    }
}
