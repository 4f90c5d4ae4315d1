//! Include resolution: the transitive closure of `source` statements.
//!
//! A line beginning with `.` or `source` followed by a path argument is an
//! include statement; only the portion before the first `;` is recorded.
//! Paths are resolved relative to the directory of the **top-level** script,
//! and anything outside that directory subtree is never followed, so a
//! script can only pull in files that travel with it.
//!
//! Traversal is depth-first preorder: each include record is emitted at the
//! position of its first discovery, and the included file is descended into
//! before the next statement of the current file is considered. A single
//! visited set is threaded through the whole traversal (the top-level call
//! owns it, recursive calls borrow it), so no path is ever re-scanned or
//! re-emitted, even under circular sourcing.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

static RE_INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:\.|source)\s+([^\s;]+)").unwrap());

/// One resolved include statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Include {
    /// 1-based line of the statement in the file containing it.
    pub line_number: usize,
    /// Statement text up to the first `;`.
    pub include_line: String,
    /// The path literal as written.
    pub include_path: String,
    /// Resolved absolute path.
    pub full_path: PathBuf,
    /// Absolute path of the file containing the statement.
    pub included_from: PathBuf,
}

/// Resolve every script transitively sourced by `top_level`.
pub fn resolve(top_level: &Path) -> Vec<Include> {
    let mut visited = HashSet::new();
    resolve_includes(top_level, top_level, &mut visited)
}

/// Resolve the includes of `current`, recursing depth-first.
///
/// Fails softly: an unreadable file ends that branch with a warning, the
/// rest of the traversal continues.
pub fn resolve_includes(
    top_level: &Path,
    current: &Path,
    visited: &mut HashSet<PathBuf>,
) -> Vec<Include> {
    let content = match fs::read_to_string(current) {
        Ok(content) => content,
        Err(err) => {
            warn!(file = %current.display(), %err, "skipping unreadable include");
            return Vec::new();
        }
    };

    let top_dir = top_level.parent().unwrap_or_else(|| Path::new("."));
    let top_dir = match top_dir.canonicalize() {
        Ok(dir) => dir,
        Err(_) => return Vec::new(),
    };

    let mut includes = Vec::new();
    for caps in RE_INCLUDE.captures_iter(&content) {
        let whole = caps.get(0).expect("match has group 0");
        let include_path = caps[1].to_string();

        // Candidates must exist and stay inside the top-level subtree.
        let full_path = match top_dir.join(&include_path).canonicalize() {
            Ok(path) => path,
            Err(_) => continue,
        };
        if !full_path.starts_with(&top_dir) {
            continue;
        }

        if visited.insert(full_path.clone()) {
            let include_line = whole
                .as_str()
                .trim()
                .split(';')
                .next()
                .unwrap_or_default()
                .to_string();
            includes.push(Include {
                line_number: content[..whole.start()].matches('\n').count() + 1,
                include_line,
                include_path,
                full_path: full_path.clone(),
                included_from: current.to_path_buf(),
            });
            includes.extend(resolve_includes(top_level, &full_path, visited));
        }
    }
    includes
}
