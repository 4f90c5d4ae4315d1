//! Shell completion: candidate generation for the hidden `complete`
//! subcommand, plus installation of the bash hook that calls it.

use crate::config::Config;
use crate::error::Result;
use crate::registry::{Metadata, Registry, Scope};
use crate::scan;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const SUBCOMMANDS: &[&str] = &[
    "import",
    "remove",
    "exec",
    "info",
    "purge",
    "install-bash-completion",
];

/// Completion candidates for the word under the cursor.
///
/// `comp_cword`, `prev`, `curr` and `comp_words` mirror bash's
/// `COMP_CWORD`, the previous word, the current word prefix, and
/// `COMP_WORDS`. Returns an empty list rather than failing: completion
/// must never break the user's shell.
pub fn candidates(
    config: &Config,
    comp_cword: usize,
    prev: &str,
    curr: &str,
    comp_words: &[String],
) -> Vec<String> {
    match try_candidates(config, comp_cword, prev, curr, comp_words) {
        Ok(candidates) => candidates,
        Err(err) => {
            debug!(%err, "completion lookup failed");
            Vec::new()
        }
    }
}

fn try_candidates(
    config: &Config,
    comp_cword: usize,
    prev: &str,
    curr: &str,
    comp_words: &[String],
) -> Result<Vec<String>> {
    if comp_cword == 1 {
        return Ok(filtered(SUBCOMMANDS.iter().map(|s| s.to_string()), curr));
    }

    let registry = Registry::new(config);
    let command = comp_words.get(1).map(String::as_str).unwrap_or("");
    match command {
        "import" => {
            // The path argument itself is completed by the shell hook.
            if comp_cword > 3 || prev == "import" {
                return Ok(Vec::new());
            }
            let mut options: Vec<String> = registry
                .load(Scope::Home)?
                .keys()
                .map(|ns| format!("home.{ns}"))
                .collect();
            options.extend(
                registry
                    .load(Scope::Sys)?
                    .keys()
                    .map(|ns| format!("sys.{ns}")),
            );
            Ok(filtered(options.into_iter(), curr))
        }
        "exec" | "remove" | "info" => {
            // Splice out a `--ssh host` pair so positional indices line up.
            let mut comp_cword = comp_cword;
            let mut words = comp_words.to_vec();
            if let Some(idx) = words.iter().position(|w| w == "--ssh") {
                words.remove(idx);
                comp_cword = comp_cword.saturating_sub(1);
                if idx < words.len() {
                    words.remove(idx);
                    comp_cword = comp_cword.saturating_sub(1);
                }
            }

            let metadata = registry.load_merged()?;
            match comp_cword {
                2 => Ok(filtered(metadata.keys().cloned(), curr)),
                3 => {
                    let namespace = words.get(2).map(String::as_str).unwrap_or("");
                    Ok(metadata
                        .get(namespace)
                        .map(|files| filtered(files.keys().cloned(), curr))
                        .unwrap_or_default())
                }
                4 => {
                    let Some(script) = lookup(&metadata, &words) else {
                        return Ok(Vec::new());
                    };
                    let scanned = scan::scan(&script)?;
                    Ok(filtered(
                        scanned.functions.iter().map(|f| f.name.clone()),
                        curr,
                    ))
                }
                cword if cword > 4 => {
                    let Some(script) = lookup(&metadata, &words) else {
                        return Ok(Vec::new());
                    };
                    let function = words.get(4).map(String::as_str).unwrap_or("");
                    let scanned = scan::scan(&script)?;
                    let Some(function) = scanned.functions.iter().find(|f| f.name == function)
                    else {
                        return Ok(Vec::new());
                    };
                    if let Some(args) = function.annotations.get("args") {
                        let tokens: Vec<&str> = args.split_whitespace().collect();
                        if let Some(token) = tokens.get(cword - 5) {
                            return Ok(filtered([token.to_string()].into_iter(), curr));
                        }
                    }
                    if let Some(opts) = function.annotations.get("opts") {
                        return Ok(filtered(
                            opts.split_whitespace().map(str::to_string),
                            curr,
                        ));
                    }
                    Ok(Vec::new())
                }
                _ => Ok(Vec::new()),
            }
        }
        _ => Ok(Vec::new()),
    }
}

fn lookup(metadata: &Metadata, words: &[String]) -> Option<PathBuf> {
    let namespace = words.get(2)?;
    let script = words.get(3)?;
    metadata.get(namespace)?.get(script).cloned()
}

fn filtered(options: impl Iterator<Item = String>, prefix: &str) -> Vec<String> {
    options.filter(|o| o.starts_with(prefix)).collect()
}

/// The bash hook: fast cases are handled inline, everything else defers to
/// the hidden `complete` subcommand.
const COMPLETION_SCRIPT: &str = r#"_bcli_completion() {
    local cur prev words cword
    _get_comp_words_by_ref -n : cur prev words cword
    # import takes a path first; let the shell complete it
    [[ $cword -eq 2 ]] && [ "$prev" == "import" ] && {
        COMPREPLY=($(compgen -- "$cur"))
        return
    }
    [[ $cword -eq 2 ]] && [ "$prev" == "exec" ] && COMPREPLY=( $(compgen -W "--ssh" -- "$cur" ) )
    [[ $cword -eq 2 ]] && [ "$prev" == "exec" ] && [[ "$cur" == -* ]] && return
    [[ $cword -eq 3 ]] && [ "$prev" == "--ssh" ] && {
        COMPREPLY=($(compgen -A hostname -- "$cur"))
        return
    }
    COMPREPLY+=($(bcli complete "$cword" "$prev" "$cur" "${words[@]}"))
}
complete -o default -F _bcli_completion bcli
"#;

/// Write the completion hook, returning the installed path.
///
/// System-wide installs land in `/etc/bash_completion.d`; per-user installs
/// in `~/.local/share/bash-completion/completions`.
pub fn install_bash_completion(system_wide: bool) -> Result<PathBuf> {
    let dir = if system_wide {
        PathBuf::from("/etc/bash_completion.d")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local/share/bash-completion/completions")
    };
    fs::create_dir_all(&dir)?;
    let file = dir.join("bcli");
    fs::write(&file, COMPLETION_SCRIPT)?;
    Ok(file)
}
