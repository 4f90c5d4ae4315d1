//! Script introspection: functions, annotations, and includes.
//!
//! Scans a shell script with three text patterns:
//!
//! - `#bcli: <key> <value>` anywhere in the file is a global annotation;
//!   the last occurrence in file order wins for a given key.
//! - `<identifier>() {` at the start of a line marks a function definition.
//! - `#bcli:func <key> <value>` on comment lines above a function definition
//!   carries per-function metadata.
//!
//! Per-function annotations are collected by walking **upward** from the
//! definition: blank lines and unrelated comments are skipped, the walk stops
//! at the first genuine code line. Assignment during the walk is
//! unconditional, so for a duplicated key the match farther from the function
//! wins. That order is preserved as-is.

use crate::error::{Error, Result};
use crate::includes::{self, Include};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static RE_GLOBAL_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#bcli:\s+(\w+)\s+(.*)").unwrap());

static RE_FUNC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\w+)\s*\(\s*\)\s*\{").unwrap());

static RE_FUNC_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#bcli:func\s+(\w+)\s+(.*)").unwrap());

/// A callable unit discovered in a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Function {
    pub name: String,
    /// Keys consumed by help and completion: `description`, `args`, `opts`.
    pub annotations: BTreeMap<String, String>,
}

/// Everything the scanner extracts from one script file.
///
/// Created fresh on every [`scan`] call; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptMetadata {
    pub file: PathBuf,
    pub global_annotations: BTreeMap<String, String>,
    pub functions: Vec<Function>,
    pub includes: Vec<Include>,
}

/// Scan a script file into [`ScriptMetadata`].
///
/// Fails only when the file itself is missing. Malformed content is not an
/// error; it simply yields partial or empty results.
pub fn scan(file_path: &Path) -> Result<ScriptMetadata> {
    if !file_path.exists() {
        return Err(Error::MissingFile {
            path: file_path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(file_path)?;

    let mut global_annotations = BTreeMap::new();
    for caps in RE_GLOBAL_ANNOTATION.captures_iter(&content) {
        // file-order last-wins
        global_annotations.insert(caps[1].to_string(), caps[2].to_string());
    }

    let mut functions = Vec::new();
    for caps in RE_FUNC.captures_iter(&content) {
        let start = caps.get(0).map_or(0, |m| m.start());
        functions.push(Function {
            name: caps[1].to_string(),
            annotations: annotations_above(&content[..start]),
        });
    }

    let includes = includes::resolve(file_path);

    Ok(ScriptMetadata {
        file: file_path.to_path_buf(),
        global_annotations,
        functions,
        includes,
    })
}

/// Walk upward through the lines preceding a function definition, collecting
/// `#bcli:func` annotations until the first non-blank, non-comment line.
fn annotations_above(preceding: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    for line in preceding.lines().rev() {
        if let Some(caps) = RE_FUNC_ANNOTATION.captures(line) {
            annotations.insert(caps[1].to_string(), caps[2].to_string());
        } else {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                break;
            }
        }
    }
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    const SIMPLE: &str = "#!/bin/bash\n\
        #bcli: description Sample script\n\
        \n\
        #bcli:func description First function\n\
        #bcli:func args arg1\n\
        function1() {\n  echo \"function1 here $1\"\n}\n\
        \n\
        function2() {\n  echo \"function2 here $1 $2\"\n}\n\
        \n\
        main() {\n  function1 \"$@\"\n}\n";

    #[test]
    fn functions_in_file_order() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "simple.sh", SIMPLE);
        let meta = scan(&path).unwrap();
        let names: Vec<&str> = meta.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["function1", "function2", "main"]);
    }

    #[test]
    fn scan_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "simple.sh", SIMPLE);
        let first = scan(&path).unwrap();
        let second = scan(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = scan(Path::new("/nonexistent/bcli/script.sh")).unwrap_err();
        assert!(matches!(err, Error::MissingFile { .. }));
    }

    #[test]
    fn global_annotations_last_wins() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "g.sh",
            "#bcli: description first\n#bcli: description second\n",
        );
        let meta = scan(&path).unwrap();
        assert_eq!(
            meta.global_annotations.get("description").map(String::as_str),
            Some("second")
        );
    }

    #[test]
    fn function_annotations_attached() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "simple.sh", SIMPLE);
        let meta = scan(&path).unwrap();
        let f1 = &meta.functions[0];
        assert_eq!(
            f1.annotations.get("description").map(String::as_str),
            Some("First function")
        );
        assert_eq!(f1.annotations.get("args").map(String::as_str), Some("arg1"));
        assert!(meta.functions[1].annotations.is_empty());
    }

    #[test]
    fn unrelated_comments_do_not_stop_the_walk() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "c.sh",
            "#bcli:func description found\n\
             # just a comment\n\
             \n\
             f() {\n  true\n}\n",
        );
        let meta = scan(&path).unwrap();
        assert_eq!(
            meta.functions[0].annotations.get("description").map(String::as_str),
            Some("found")
        );
    }

    #[test]
    fn code_line_stops_the_walk() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "c.sh",
            "#bcli:func description unreachable\n\
             x=1\n\
             f() {\n  true\n}\n",
        );
        let meta = scan(&path).unwrap();
        assert!(meta.functions[0].annotations.is_empty());
    }

    #[test]
    fn farther_annotation_wins_on_duplicate_key() {
        // Unconditional assignment during the upward walk: the match farther
        // from the function overwrites the nearer one.
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "d.sh",
            "#bcli:func description far\n\
             #bcli:func description near\n\
             f() {\n  true\n}\n",
        );
        let meta = scan(&path).unwrap();
        assert_eq!(
            meta.functions[0].annotations.get("description").map(String::as_str),
            Some("far")
        );
    }

    #[test]
    fn global_pattern_does_not_match_func_annotations() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "g.sh", "#bcli:func args a b\nf() {\n  true\n}\n");
        let meta = scan(&path).unwrap();
        assert!(meta.global_annotations.is_empty());
    }
}
