//! Resolves call, import and re-export references to node indices.
//!
//! Nodes are expected in `(file_path, chunk_index)` order, which makes the
//! node index itself the stable tie-break key.
use super::PlannedNode;
use super::noise::NoiseFilter;
use crate::indexer::languages::PROBE_EXTENSIONS;
use std::collections::{BTreeMap, HashMap};

/// Files that stand for their directory when a path names a package.
const PACKAGE_FILES: &[&str] = &["index", "__init__", "mod"];

fn dir_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn strip_extension(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => stem,
        _ => path,
    }
}

fn join(base: &str, tail: &str) -> String {
    if base.is_empty() {
        tail.to_string()
    } else {
        format!("{base}/{tail}")
    }
}

/// 0 for the same file, 1 for the same directory, 2 otherwise.
fn proximity(from: &str, candidate: &str) -> u8 {
    if from == candidate {
        0
    } else if dir_of(from) == dir_of(candidate) {
        1
    } else {
        2
    }
}

/// Applies a `./` or `../` specifier to `dir`. `None` when it climbs past the root.
fn normalize(dir: &str, relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Last segment of a dotted or `::` path.
fn last_segment(callee: &str) -> &str {
    let tail = callee.rsplit("::").next().unwrap_or(callee);
    tail.rsplit('.').next().unwrap_or(tail)
}

/// True when the extensionless `stem` is the module `path` names.
fn module_matches(stem: &str, path: &str) -> bool {
    let is_suffix = |target: &str| stem == target || stem.ends_with(&format!("/{target}"));
    is_suffix(path)
        || PACKAGE_FILES
            .iter()
            .any(|pkg| is_suffix(&format!("{path}/{pkg}")))
}

pub struct Resolver<'a> {
    nodes: &'a [PlannedNode],
    noise: &'a NoiseFilter,
    by_name: HashMap<&'a str, Vec<usize>>,
    by_file: BTreeMap<&'a str, Vec<usize>>,
}

impl<'a> Resolver<'a> {
    pub fn new(nodes: &'a [PlannedNode], noise: &'a NoiseFilter) -> Self {
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut by_file: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if !node.name.is_placeholder() {
                by_name.entry(node.name.as_str()).or_default().push(i);
            }
            by_file.entry(node.file_path.as_str()).or_default().push(i);
        }
        Self {
            nodes,
            noise,
            by_name,
            by_file,
        }
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Exact name first, then the last path segment. Noise names never resolve.
    pub fn resolve_call(&self, from: usize, callee: &str) -> Option<usize> {
        let callee = callee.trim();
        if callee.is_empty() || self.noise.is_noise(callee) {
            return None;
        }
        let candidates = match self.by_name.get(callee) {
            Some(found) => found,
            None => {
                let last = last_segment(callee);
                if last == callee || self.noise.is_noise(last) {
                    return None;
                }
                self.by_name.get(last)?
            }
        };
        self.closest(from, candidates)
    }

    fn closest(&self, from: usize, candidates: &[usize]) -> Option<usize> {
        let from_file = self.nodes[from].file_path.as_str();
        candidates
            .iter()
            .copied()
            .min_by_key(|&i| (proximity(from_file, &self.nodes[i].file_path), i))
    }

    /// Node a filtered chunk's calls are credited to: the smallest node of
    /// `file` whose lines contain the chunk, else the node named `parent`.
    pub fn enclosing_node(
        &self,
        file: &str,
        start_line: usize,
        end_line: usize,
        parent: Option<&str>,
    ) -> Option<usize> {
        let in_file = self.by_file.get(file)?;
        let enclosing = in_file
            .iter()
            .copied()
            .filter(|&i| {
                let node = &self.nodes[i];
                node.start_line <= start_line && node.end_line >= end_line
            })
            .min_by_key(|&i| (self.nodes[i].end_line - self.nodes[i].start_line, i));
        enclosing.or_else(|| {
            let parent = parent?;
            in_file
                .iter()
                .copied()
                .find(|&i| self.nodes[i].name.as_str() == parent)
        })
    }

    // ── Modules ──────────────────────────────────────────────────────

    /// Node standing for `file`: its module or barrel, else its first node.
    pub fn module_node(&self, file: &str) -> Option<usize> {
        let in_file = self.by_file.get(file)?;
        in_file
            .iter()
            .copied()
            .find(|&i| self.nodes[i].kind.is_module_like())
            .or_else(|| in_file.first().copied())
    }

    pub fn resolve_import(&self, from: usize, specifier: &str) -> Option<usize> {
        let file = self.resolve_module(from, specifier)?;
        self.module_node(file)
    }

    /// `* from M` targets M's module node; `name from M` the node called
    /// `name` in M, falling back to the module node when M declares no such
    /// node (`default`, say).
    pub fn resolve_reexport(&self, from: usize, entry: &str) -> Option<usize> {
        let (name, module) = entry.split_once(" from ")?;
        let file = self.resolve_module(from, module)?;
        let name = name.trim();
        if name != "*" {
            let named = self.by_file.get(file).and_then(|in_file| {
                in_file
                    .iter()
                    .copied()
                    .find(|&i| self.nodes[i].name.as_str() == name)
            });
            if named.is_some() {
                return named;
            }
        }
        self.module_node(file)
    }

    /// Repository file a module specifier refers to.
    pub fn resolve_module(&self, from: usize, specifier: &str) -> Option<&'a str> {
        let importer = &self.nodes[from];
        let dir = dir_of(&importer.file_path);
        let spec = specifier.trim();
        if spec.is_empty() {
            return None;
        }

        let found = if spec.starts_with("./") || spec.starts_with("../") {
            self.probe(&normalize(dir, spec)?)
        } else {
            match importer.language.as_str() {
                "python" => self.resolve_python(&importer.file_path, spec),
                "rust" => self.resolve_rust(&importer.file_path, spec),
                "go" => self.resolve_go(&importer.file_path, spec),
                _ => None,
            }
        };
        found.filter(|file| *file != importer.file_path)
    }

    fn file_key(&self, path: &str) -> Option<&'a str> {
        self.by_file.get_key_value(path).map(|(k, _)| *k)
    }

    /// The path as given, then with each known extension, then as a package.
    fn probe(&self, base: &str) -> Option<&'a str> {
        if !base.is_empty() {
            if let Some(file) = self.file_key(base) {
                return Some(file);
            }
            for ext in PROBE_EXTENSIONS {
                if let Some(file) = self.file_key(&format!("{base}.{ext}")) {
                    return Some(file);
                }
            }
        }
        for pkg in PACKAGE_FILES {
            for ext in PROBE_EXTENSIONS {
                if let Some(file) = self.file_key(&join(base, &format!("{pkg}.{ext}"))) {
                    return Some(file);
                }
            }
        }
        None
    }

    /// Closest file whose extensionless path ends with `path`.
    fn suffix_match(&self, from_file: &str, path: &str) -> Option<&'a str> {
        self.by_file
            .keys()
            .copied()
            .filter(|file| *file != from_file && module_matches(strip_extension(file), path))
            .min_by_key(|file| proximity(from_file, file))
    }

    fn resolve_python(&self, from_file: &str, spec: &str) -> Option<&'a str> {
        let dots = spec.chars().take_while(|c| *c == '.').count();
        let rest = &spec[dots..];
        if dots > 0 {
            let mut base: Vec<&str> = dir_of(from_file).split('/').filter(|s| !s.is_empty()).collect();
            for _ in 1..dots {
                base.pop()?;
            }
            base.extend(rest.split('.').filter(|s| !s.is_empty()));
            return self.probe(&base.join("/"));
        }

        // `a.b.c` may name module `a.b` with `c` imported from it
        let segments: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();
        (1..=segments.len())
            .rev()
            .find_map(|len| self.suffix_match(from_file, &segments[..len].join("/")))
    }

    fn resolve_rust(&self, from_file: &str, spec: &str) -> Option<&'a str> {
        let mut segments: Vec<&str> = spec.split("::").filter(|s| !s.is_empty()).collect();
        while matches!(segments.first(), Some(&("crate" | "self" | "super"))) {
            segments.remove(0);
        }
        (1..=segments.len())
            .rev()
            .find_map(|len| self.suffix_match(from_file, &segments[..len].join("/")))
    }

    /// Go imports name a package directory; the first file found there wins.
    fn resolve_go(&self, from_file: &str, spec: &str) -> Option<&'a str> {
        let segments: Vec<&str> = spec.split('/').filter(|s| !s.is_empty()).collect();
        (0..segments.len()).find_map(|start| {
            let suffix = segments[start..].join("/");
            self.by_file
                .keys()
                .copied()
                .filter(|file| {
                    let dir = dir_of(file);
                    dir_of(from_file) != dir && (dir == suffix || dir.ends_with(&format!("/{suffix}")))
                })
                .min_by_key(|file| proximity(from_file, file))
        })
    }
}
