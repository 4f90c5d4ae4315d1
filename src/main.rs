//! `bcli`: import shell scripts into a namespaced registry and execute
//! their functions locally or over SSH.

use anyhow::Result;
use bcli::config::Config;
use bcli::registry::{split_scoped_namespace, Registry, Scope};
use bcli::stream::{CancelToken, StdoutSink};
use bcli::{complete, local, remote, scan};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bcli", about = "Registry and dispatcher for shell-script functions")]
struct Cli {
    /// User-scope registry directory
    #[arg(long, env = "BCLI_HOME", global = true)]
    home_dir: Option<PathBuf>,

    /// System-scope registry directory
    #[arg(long, env = "BCLI_SYS", global = true)]
    sys_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a file or directory into a namespace
    Import {
        /// The file or directory to import
        path: PathBuf,
        /// Target namespace, optionally prefixed `home.` or `sys.`
        namespace: Option<String>,
    },

    /// Execute a function from a script in a namespace
    #[command(disable_help_flag = true)]
    Exec {
        /// Execute the function on a remote host over SSH
        #[arg(long)]
        ssh: Option<String>,
        /// The namespace of the script
        namespace: String,
        /// The script containing the function
        script: String,
        /// The function to execute
        function: String,
        /// Arguments forwarded to the function
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Display registry contents
    Info {
        /// Increase verbosity (repeatable)
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,
        namespace: Option<String>,
        script: Option<String>,
        function: Option<String>,
    },

    /// Drop registry entries whose files no longer exist
    Purge,

    /// Remove a namespace or a single script from it
    Remove {
        namespace: String,
        script: Option<String>,
    },

    /// Emit completion candidates (called by the bash hook)
    #[command(hide = true)]
    Complete {
        comp_cword: usize,
        #[arg(allow_hyphen_values = true)]
        prev: String,
        #[arg(allow_hyphen_values = true)]
        curr: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        comp_words: Vec<String>,
    },

    /// Install the bash completion hook
    InstallBashCompletion,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_overrides(cli.home_dir.clone(), cli.sys_dir.clone());
    let registry = Registry::new(&config);

    match cli.command {
        Command::Import { path, namespace } => handle_import(&registry, &path, namespace),
        Command::Exec {
            ssh,
            namespace,
            script,
            function,
            args,
        } => {
            let status = handle_exec(&registry, ssh.as_deref(), &namespace, &script, &function, &args)?;
            std::process::exit(status);
        }
        Command::Info {
            verbose,
            namespace,
            script,
            function,
        } => handle_info(
            &registry,
            verbose,
            namespace.as_deref(),
            script.as_deref(),
            function.as_deref(),
        ),
        Command::Purge => handle_purge(&registry),
        Command::Remove { namespace, script } => {
            handle_remove(&registry, &namespace, script.as_deref())
        }
        Command::Complete {
            comp_cword,
            prev,
            curr,
            comp_words,
        } => {
            for candidate in complete::candidates(&config, comp_cword, &prev, &curr, &comp_words) {
                println!("{candidate}");
            }
            Ok(())
        }
        Command::InstallBashCompletion => {
            let file = complete::install_bash_completion(is_root())?;
            println!("Bash completion script installed to {}", file.display());
            Ok(())
        }
    }
}

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn handle_import(registry: &Registry, path: &Path, namespace: Option<String>) -> Result<()> {
    let (scope, namespace) = match namespace.as_deref() {
        Some(raw) => {
            let (scope, ns) = split_scoped_namespace(raw);
            (scope, Some(ns.to_string()))
        }
        None => (Scope::Home, None),
    };

    let (namespace, imported) = registry.import(path, scope, namespace.as_deref())?;
    for (name, file) in &imported {
        println!(
            "File '{}' has been successfully imported into namespace '{namespace}/{name}'",
            file.display()
        );
    }
    println!(
        "Metadata updated for namespace '{namespace}' at '{}'",
        registry.metadata_file(scope).display()
    );
    Ok(())
}

fn handle_exec(
    registry: &Registry,
    ssh: Option<&str>,
    namespace: &str,
    script: &str,
    function: &str,
    args: &[String],
) -> Result<i32> {
    let path = registry.resolve(namespace, script)?;

    // `--help` as the first argument prints the annotated usage line. A
    // function without an `args` annotation gets the flag forwarded instead.
    if args.first().is_some_and(|a| a == "--help") {
        let metadata = scan::scan(&path)?;
        if let Some(function) = metadata.functions.iter().find(|f| f.name == function) {
            if let Some(usage) = function.annotations.get("args") {
                let description = function
                    .annotations
                    .get("description")
                    .map(String::as_str)
                    .unwrap_or("");
                println!("usage: {} {usage} // {description}", function.name);
                if let Some(opts) = function.annotations.get("opts") {
                    println!("options: {opts}");
                }
                return Ok(0);
            }
        }
    }

    bcli::stream::install_sigint_handler()?;
    let mut sink = StdoutSink;
    let cancel = CancelToken::new();
    let result = match ssh {
        Some(remote) => remote::run_remote(remote, &path, function, args, &mut sink, &cancel)?,
        None => local::run_local(&path, function, args, &mut sink, &cancel)?,
    };
    Ok(result.status)
}

fn handle_info(
    registry: &Registry,
    verbosity: u8,
    namespace: Option<&str>,
    script: Option<&str>,
    function: Option<&str>,
) -> Result<()> {
    for scope in [Scope::Home, Scope::Sys] {
        let label = match scope {
            Scope::Home => "HOME",
            Scope::Sys => "SYS",
        };
        println!("--- {label} CONFIG ---");
        for (ns, files) in registry.load(scope)? {
            if namespace.is_some_and(|want| want != ns) {
                continue;
            }
            println!("Namespace: {ns}");
            for (name, path) in files {
                if script.is_some_and(|want| want != name) {
                    continue;
                }
                println!("  {name}: {}", path.display());
                if verbosity == 0 {
                    continue;
                }
                let metadata = match scan::scan(&path) {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        eprintln!("{err}");
                        continue;
                    }
                };
                if verbosity == 2 {
                    for f in &metadata.functions {
                        if function.is_some_and(|want| want != f.name) {
                            continue;
                        }
                        let description = f
                            .annotations
                            .get("description")
                            .map(String::as_str)
                            .unwrap_or("");
                        println!("    - {:<25} {description}", f.name);
                    }
                } else if verbosity >= 3 {
                    println!("    Metadata:");
                    println!("{}", serde_json::to_string_pretty(&metadata)?);
                }
            }
        }
    }
    Ok(())
}

fn handle_purge(registry: &Registry) -> Result<()> {
    if registry.purge_in(Scope::Home)? {
        println!(
            "Purged home metadata at '{}'",
            registry.metadata_file(Scope::Home).display()
        );
    }
    let sys_stale = registry.load(Scope::Sys)?.values().any(|files| {
        files.values().any(|path| !path.exists())
    });
    if sys_stale {
        if !is_root() {
            println!("You need to be root to purge sys metadata");
            return Ok(());
        }
        if registry.purge_in(Scope::Sys)? {
            println!(
                "Purged sys metadata at '{}'",
                registry.metadata_file(Scope::Sys).display()
            );
        }
    }
    Ok(())
}

fn handle_remove(registry: &Registry, namespace: &str, script: Option<&str>) -> Result<()> {
    let home_updated = registry.remove_in(Scope::Home, namespace, script)?;
    if home_updated {
        println!(
            "Updated home metadata at '{}'",
            registry.metadata_file(Scope::Home).display()
        );
    }

    let in_sys = registry
        .load(Scope::Sys)?
        .get(namespace)
        .is_some_and(|files| script.is_none_or(|s| files.contains_key(s)));
    let mut sys_updated = false;
    if in_sys {
        if !is_root() {
            println!("You need to be root to modify sys metadata");
            return Ok(());
        }
        sys_updated = registry.remove_in(Scope::Sys, namespace, script)?;
        if sys_updated {
            println!(
                "Updated sys metadata at '{}'",
                registry.metadata_file(Scope::Sys).display()
            );
        }
    }

    if !home_updated && !sys_updated {
        println!(
            "Namespace '{namespace}' or file '{}' not found in metadata",
            script.unwrap_or("")
        );
    }
    Ok(())
}
