//! Two-scope script registry backed by YAML metadata files.
//!
//! Each scope (user and system) stores an independent
//! `namespace → script id → absolute path` mapping in a `metadata.yaml`
//! under its configured directory. Lookups merge the two with the system
//! scope winning on key collision within a namespace.
//!
//! The registry is read with a snapshot at invocation start and performs no
//! locking of its own; it is a single-user tool.

use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const METADATA_FILE: &str = "metadata.yaml";

/// One of the two registry storage tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Home,
    Sys,
}

/// Split a `home.ns` / `sys.ns` prefixed namespace argument into scope and
/// bare namespace. An unprefixed value targets the user scope.
pub fn split_scoped_namespace(raw: &str) -> (Scope, &str) {
    match raw.split_once('.') {
        Some(("sys", rest)) => (Scope::Sys, rest),
        Some((_, rest)) => (Scope::Home, rest),
        None => (Scope::Home, raw),
    }
}

/// namespace → script id → absolute path. BTreeMap keeps the on-disk YAML
/// deterministic.
pub type Metadata = BTreeMap<String, BTreeMap<String, PathBuf>>;

pub struct Registry {
    home_file: PathBuf,
    sys_file: PathBuf,
}

impl Registry {
    pub fn new(config: &Config) -> Self {
        Self {
            home_file: config.home_dir.join(METADATA_FILE),
            sys_file: config.sys_dir.join(METADATA_FILE),
        }
    }

    pub fn metadata_file(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Home => &self.home_file,
            Scope::Sys => &self.sys_file,
        }
    }

    /// Load one scope's metadata; a missing or empty file is an empty map.
    pub fn load(&self, scope: Scope) -> Result<Metadata> {
        let file = self.metadata_file(scope);
        if !file.exists() {
            return Ok(Metadata::new());
        }
        let contents = fs::read_to_string(file)?;
        let metadata: Option<Metadata> = serde_yaml::from_str(&contents)?;
        Ok(metadata.unwrap_or_default())
    }

    pub fn save(&self, scope: Scope, metadata: &Metadata) -> Result<()> {
        let file = self.metadata_file(scope);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(file, serde_yaml::to_string(metadata)?)?;
        Ok(())
    }

    /// Merge both scopes; the system scope wins on collision within a
    /// namespace.
    pub fn load_merged(&self) -> Result<Metadata> {
        let mut merged = self.load(Scope::Home)?;
        for (namespace, files) in self.load(Scope::Sys)? {
            merged.entry(namespace).or_default().extend(files);
        }
        Ok(merged)
    }

    /// Look up the absolute path registered for (namespace, script).
    pub fn resolve(&self, namespace: &str, script: &str) -> Result<PathBuf> {
        self.load_merged()?
            .get(namespace)
            .and_then(|files| files.get(script))
            .cloned()
            .ok_or_else(|| Error::ScriptNotFound {
                namespace: namespace.to_string(),
                script: script.to_string(),
            })
    }

    /// Import a script file, or every `*.sh` under a directory, into a
    /// namespace. Returns the resolved namespace and the imported
    /// (script id, absolute path) pairs.
    pub fn import(
        &self,
        path: &Path,
        scope: Scope,
        namespace: Option<&str>,
    ) -> Result<(String, Vec<(String, PathBuf)>)> {
        let namespace = resolve_namespace(path, namespace);
        let mut metadata = self.load(scope)?;
        let entries = metadata.entry(namespace.clone()).or_default();

        let mut imported = Vec::new();
        if path.is_dir() {
            let pattern = path.join("**/*.sh");
            let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
                .filter_map(|entry| entry.ok())
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            for file in files {
                imported.push(register(entries, &file)?);
            }
        } else {
            imported.push(register(entries, path)?);
        }

        self.save(scope, &metadata)?;
        debug!(namespace, count = imported.len(), "imported scripts");
        Ok((namespace, imported))
    }

    /// Remove a whole namespace, or one script from it, in one scope.
    /// Returns whether anything changed. An emptied namespace is dropped.
    pub fn remove_in(&self, scope: Scope, namespace: &str, script: Option<&str>) -> Result<bool> {
        let mut metadata = self.load(scope)?;
        let changed = match script {
            Some(script) => {
                let mut removed = false;
                if let Some(files) = metadata.get_mut(namespace) {
                    removed = files.remove(script).is_some();
                    if files.is_empty() {
                        metadata.remove(namespace);
                    }
                }
                removed
            }
            None => metadata.remove(namespace).is_some(),
        };
        if changed {
            self.save(scope, &metadata)?;
        }
        Ok(changed)
    }

    /// Drop every entry whose file no longer exists in one scope.
    /// Returns whether anything was dropped.
    pub fn purge_in(&self, scope: Scope) -> Result<bool> {
        let mut metadata = self.load(scope)?;
        let before: usize = metadata.values().map(BTreeMap::len).sum();
        for files in metadata.values_mut() {
            files.retain(|_, path| path.exists());
        }
        metadata.retain(|_, files| !files.is_empty());
        let after: usize = metadata.values().map(BTreeMap::len).sum();
        if after != before {
            self.save(scope, &metadata)?;
        }
        Ok(after != before)
    }
}

/// Script ids are file stems; a directory import defaults the namespace to
/// the directory's name, a file import to `default`.
fn resolve_namespace(path: &Path, namespace: Option<&str>) -> String {
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        return ns.to_string();
    }
    if path.is_dir() {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            return name.to_string();
        }
    }
    "default".to_string()
}

fn register(
    entries: &mut BTreeMap<String, PathBuf>,
    file: &Path,
) -> Result<(String, PathBuf)> {
    let absolute = absolutize(file)?;
    let stem = absolute
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    entries.insert(stem.clone(), absolute.clone());
    Ok((stem, absolute))
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(abs) => Ok(abs),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(home: &TempDir, sys: &TempDir) -> Registry {
        Registry::new(&Config::new(
            home.path().to_path_buf(),
            sys.path().to_path_buf(),
        ))
    }

    fn write_script(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "main() {\n  true\n}\n").unwrap();
        path
    }

    #[test]
    fn import_single_file() {
        let (home, sys, scripts) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        let script = write_script(scripts.path(), "simple.sh");

        let (namespace, imported) = registry.import(&script, Scope::Home, None).unwrap();
        assert_eq!(namespace, "default");
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].0, "simple");

        let resolved = registry.resolve("default", "simple").unwrap();
        assert_eq!(resolved, script.canonicalize().unwrap());
    }

    #[test]
    fn import_directory_recursively() {
        let (home, sys, scripts) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        write_script(scripts.path(), "a.sh");
        write_script(scripts.path(), "nested/b.sh");
        write_script(scripts.path(), "notes.txt");

        let (namespace, imported) = registry
            .import(scripts.path(), Scope::Home, Some("tools"))
            .unwrap();
        assert_eq!(namespace, "tools");
        let names: Vec<&str> = imported.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn directory_import_defaults_namespace_to_dir_name() {
        let (home, sys) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let scripts = TempDir::new().unwrap();
        let sub = scripts.path().join("mytools");
        write_script(&sub, "a.sh");

        let registry = registry(&home, &sys);
        let (namespace, _) = registry.import(&sub, Scope::Home, None).unwrap();
        assert_eq!(namespace, "mytools");
    }

    #[test]
    fn sys_scope_wins_on_collision() {
        let (home, sys, scripts) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        let p1 = write_script(scripts.path(), "user/f.sh");
        let p2 = write_script(scripts.path(), "system/f.sh");

        registry.import(&p1, Scope::Home, Some("ns")).unwrap();
        registry.import(&p2, Scope::Sys, Some("ns")).unwrap();

        let resolved = registry.resolve("ns", "f").unwrap();
        assert_eq!(resolved, p2.canonicalize().unwrap());
    }

    #[test]
    fn resolve_unknown_is_script_not_found() {
        let (home, sys) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        let err = registry.resolve("ns", "nope").unwrap_err();
        assert!(matches!(err, Error::ScriptNotFound { .. }));
    }

    #[test]
    fn remove_script_then_namespace() {
        let (home, sys, scripts) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        write_script(scripts.path(), "a.sh");
        write_script(scripts.path(), "b.sh");
        registry.import(scripts.path(), Scope::Home, Some("ns")).unwrap();

        assert!(registry.remove_in(Scope::Home, "ns", Some("a")).unwrap());
        assert!(registry.resolve("ns", "b").is_ok());
        assert!(registry.remove_in(Scope::Home, "ns", None).unwrap());
        assert!(registry.resolve("ns", "b").is_err());
        assert!(!registry.remove_in(Scope::Home, "ns", None).unwrap());
    }

    #[test]
    fn removing_last_script_drops_namespace() {
        let (home, sys, scripts) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        let script = write_script(scripts.path(), "only.sh");
        registry.import(&script, Scope::Home, Some("ns")).unwrap();

        assert!(registry.remove_in(Scope::Home, "ns", Some("only")).unwrap());
        assert!(!registry.load(Scope::Home).unwrap().contains_key("ns"));
    }

    #[test]
    fn purge_drops_missing_files() {
        let (home, sys, scripts) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        let keep = write_script(scripts.path(), "keep.sh");
        let gone = write_script(scripts.path(), "gone.sh");
        registry.import(&keep, Scope::Home, Some("ns")).unwrap();
        registry.import(&gone, Scope::Home, Some("ns")).unwrap();

        fs::remove_file(&gone).unwrap();
        assert!(registry.purge_in(Scope::Home).unwrap());
        assert!(registry.resolve("ns", "keep").is_ok());
        assert!(registry.resolve("ns", "gone").is_err());
        assert!(!registry.purge_in(Scope::Home).unwrap());
    }

    #[test]
    fn empty_metadata_file_loads_as_empty() {
        let (home, sys) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let registry = registry(&home, &sys);
        fs::write(registry.metadata_file(Scope::Home), "").unwrap();
        assert!(registry.load(Scope::Home).unwrap().is_empty());
    }

    #[test]
    fn scoped_namespace_parsing() {
        assert_eq!(split_scoped_namespace("sys.ns"), (Scope::Sys, "ns"));
        assert_eq!(split_scoped_namespace("home.ns"), (Scope::Home, "ns"));
        assert_eq!(split_scoped_namespace("other.ns"), (Scope::Home, "ns"));
        assert_eq!(split_scoped_namespace("plain"), (Scope::Home, "plain"));
    }
}
