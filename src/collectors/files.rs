use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use glob::MatchOptions;
use walkdir::WalkDir;

use crate::collectors::run_log::RunLog;
use crate::collectors::workspace::Workspace;

/// Shell-like matching: `*` stops at `/` and does not pick up dotfiles.
pub(crate) const SHELL_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Split a `files` entry into glob patterns the way `sh` does.
///
/// Whitespace separates patterns; a leading `~`, `$NAME` and `${NAME}` are
/// taken from the environment, unset variables expand to nothing.
pub fn expand_wildcard_entry(entry: &str) -> Vec<String> {
    entry
        .split_whitespace()
        .map(expand_word)
        .filter(|word| !word.is_empty())
        .collect()
}

fn expand_word(word: &str) -> String {
    let word = match word.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{}", env::var("HOME").unwrap_or_default(), rest)
        }
        _ => word.to_string(),
    };

    let mut expanded = String::with_capacity(word.len());
    let mut chars = word.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            expanded.push(c);
            continue;
        }

        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            chars.by_ref().take_while(|c| *c != '}').collect()
        } else {
            let mut name = String::new();
            while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
                name.push(c);
            }
            name
        };

        if name.is_empty() {
            expanded.push('$');
        } else {
            expanded.push_str(&env::var(&name).unwrap_or_default());
        }
    }
    expanded
}

/// Expand a `files` entry into regular files and symbolic links.
///
/// Matched directories are walked recursively without following links,
/// like `find <entry> -type f,l`. The walk stops early once `cancel`
/// is set.
pub fn find_matching_files(wildcard: &str, cancel: &AtomicBool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for pattern in expand_wildcard_entry(wildcard) {
        find_pattern(&pattern, cancel, &mut found)?;
    }
    Ok(found)
}

fn find_pattern(wildcard: &str, cancel: &AtomicBool, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = glob::glob_with(wildcard, SHELL_MATCH_OPTIONS)
        .with_context(|| format!("Invalid wildcard {}", wildcard))?;

    for entry in entries {
        if cancel.load(Ordering::Relaxed) {
            bail!("Search for {} was cancelled", wildcard);
        }

        let path = match entry {
            Ok(path) => path,
            Err(_) => continue,
        };
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        let file_type = metadata.file_type();
        if file_type.is_file() || file_type.is_symlink() {
            found.push(path);
        } else if file_type.is_dir() {
            for entry in WalkDir::new(&path).follow_links(false) {
                if cancel.load(Ordering::Relaxed) {
                    bail!("Search for {} was cancelled", wildcard);
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(_) => continue,
                };
                let file_type = entry.file_type();
                if file_type.is_file() || file_type.is_symlink() {
                    found.push(entry.into_path());
                }
            }
        }
    }

    Ok(())
}

/// Resolve a wildcard within `budget`.
///
/// Returns `None` when the budget ran out; the search thread is told to stop.
pub async fn resolve_wildcard(wildcard: &str, budget: Duration) -> Option<Result<Vec<PathBuf>>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let search = {
        let cancel = Arc::clone(&cancel);
        let wildcard = wildcard.to_string();
        tokio::task::spawn_blocking(move || find_matching_files(&wildcard, &cancel))
    };

    match tokio::time::timeout(budget, search).await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(join_error)) => Some(Err(anyhow::anyhow!("Search task failed: {}", join_error))),
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            None
        }
    }
}

/// Copy every file matched by `wildcards` into the workspace, mirroring the
/// source path. Returns the number of files copied.
pub async fn copy_files(
    workspace: &Workspace,
    wildcards: &[String],
    wildcard_budget: Duration,
    run_log: &RunLog,
) -> usize {
    let mut copied = 0;

    for wildcard in wildcards {
        let paths = match resolve_wildcard(wildcard, wildcard_budget).await {
            None => {
                run_log.warn(format_args!("Timeout was expired for wildcard {}", wildcard));
                continue;
            }
            Some(Err(e)) => {
                run_log.debug(format_args!("No files for wildcard {}: {:#}", wildcard, e));
                continue;
            }
            Some(Ok(paths)) if paths.is_empty() => {
                run_log.debug(format_args!("No files for wildcard {}", wildcard));
                continue;
            }
            Some(Ok(paths)) => paths,
        };

        for path in paths {
            let dest = match workspace.mirror(&path) {
                Ok(dest) => dest,
                Err(e) => {
                    run_log.warn(format_args!("Skipping {}: {:#}", path.display(), e));
                    continue;
                }
            };

            if let Some(parent) = dest.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    run_log.warn(format_args!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ));
                    continue;
                }
            }

            match tokio::fs::copy(&path, &dest).await {
                Ok(_) => copied += 1,
                Err(e) => {
                    run_log.warn(format_args!("Failed to copy {}: {}", path.display(), e));
                }
            }
        }
    }

    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    /// Enough files that walking them outlasts a zero budget
    fn populate(base: &std::path::Path) {
        for dir in 0..100 {
            let nested = base.join(format!("dir-{}/nested", dir));
            fs::create_dir_all(&nested).unwrap();
            for file in 0..100 {
                fs::write(nested.join(format!("{}.log", file)), b"line\n").unwrap();
            }
        }
    }

    #[test]
    fn test_find_files_and_recurse_into_directories() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::create_dir_all(base.join("conf.d/nested")).unwrap();
        fs::write(base.join("a.conf"), b"a").unwrap();
        fs::write(base.join("conf.d/b.conf"), b"b").unwrap();
        fs::write(base.join("conf.d/nested/c.conf"), b"c").unwrap();

        let mut found = find_matching_files(&format!("{}/*", base.display()), &no_cancel()).unwrap();
        found.sort();

        assert_eq!(
            found,
            vec![
                base.join("a.conf"),
                base.join("conf.d/b.conf"),
                base.join("conf.d/nested/c.conf"),
            ]
        );
    }

    #[test]
    fn test_find_includes_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("target.txt"), b"t").unwrap();
        std::os::unix::fs::symlink(base.join("target.txt"), base.join("link.txt")).unwrap();

        let found = find_matching_files(&format!("{}/link.*", base.display()), &no_cancel()).unwrap();
        assert_eq!(found, vec![base.join("link.txt")]);
    }

    #[test]
    fn test_find_no_match_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let found =
            find_matching_files(&format!("{}/missing-*.log", temp_dir.path().display()), &no_cancel())
                .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_find_invalid_pattern_is_error() {
        assert!(find_matching_files("/etc/[", &no_cancel()).is_err());
    }

    #[test]
    fn test_find_stops_when_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("x"), b"x").unwrap();
        let cancel = AtomicBool::new(true);
        assert!(find_matching_files(&format!("{}/*", temp_dir.path().display()), &cancel).is_err());
    }

    #[test]
    fn test_entry_splits_and_expands_like_sh() {
        env::set_var("WB_DIAG_FILES_TEST_DIR", "/var/log");
        assert_eq!(
            expand_wildcard_entry("$WB_DIAG_FILES_TEST_DIR/syslog*  ${WB_DIAG_FILES_TEST_DIR}/dmesg"),
            vec!["/var/log/syslog*", "/var/log/dmesg"]
        );
        assert_eq!(expand_wildcard_entry("/etc/$WB_DIAG_FILES_TEST_UNSET"), vec!["/etc/"]);
        assert_eq!(expand_wildcard_entry("/tmp/$"), vec!["/tmp/$"]);
        assert!(expand_wildcard_entry("   ").is_empty());

        let home = env::var("HOME").unwrap_or_default();
        assert_eq!(expand_wildcard_entry("~/.bashrc"), vec![format!("{}/.bashrc", home)]);
        assert_eq!(expand_wildcard_entry("/a~b"), vec!["/a~b"]);
    }

    #[test]
    fn test_find_several_patterns_in_one_entry() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("a.conf"), b"a").unwrap();
        fs::write(base.join("b.log"), b"b").unwrap();
        fs::write(base.join("c.txt"), b"c").unwrap();

        let entry = format!("{0}/*.conf {0}/*.log", base.display());
        let found = find_matching_files(&entry, &no_cancel()).unwrap();
        assert_eq!(found, vec![base.join("a.conf"), base.join("b.log")]);
    }

    #[tokio::test]
    async fn test_resolve_gives_up_when_budget_expires() {
        let source = TempDir::new().unwrap();
        populate(source.path());

        let resolved = resolve_wildcard(&format!("{}/*", source.path().display()), Duration::ZERO).await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_expired_wildcard_is_warned_and_next_one_tried() {
        let source = TempDir::new().unwrap();
        populate(source.path());
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();

        let first = format!("{}/dir-*", source.path().display());
        let second = format!("{}/dir-*/nested", source.path().display());
        let copied = copy_files(&workspace, &[first.clone(), second.clone()], Duration::ZERO, &run_log).await;

        assert_eq!(copied, 0);
        assert_eq!(fs::read_dir(workspace.path()).unwrap().count(), 0);
        let contents = run_log.contents();
        assert!(contents.contains(&format!("[WARN] Timeout was expired for wildcard {}", first)));
        assert!(contents.contains(&format!("[WARN] Timeout was expired for wildcard {}", second)));
    }

    #[tokio::test]
    async fn test_copy_files_mirrors_source_path() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("wb-mqtt-serial.conf"), b"{\"ports\": []}").unwrap();
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();

        let copied = copy_files(
            &workspace,
            &[format!("{}/*.conf", source.path().display())],
            Duration::from_secs(1),
            &run_log,
        )
        .await;

        assert_eq!(copied, 1);
        let mirrored = workspace.mirror(&source.path().join("wb-mqtt-serial.conf")).unwrap();
        assert_eq!(fs::read(mirrored).unwrap(), b"{\"ports\": []}");
    }

    #[tokio::test]
    async fn test_zero_match_wildcard_leaves_workspace_empty() {
        let source = TempDir::new().unwrap();
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();

        let copied = copy_files(
            &workspace,
            &[format!("{}/nothing-here-*", source.path().display())],
            Duration::from_secs(1),
            &run_log,
        )
        .await;

        assert_eq!(copied, 0);
        assert_eq!(fs::read_dir(workspace.path()).unwrap().count(), 0);
        assert!(run_log.contents().contains("[DEBUG] No files for wildcard"));
    }

    #[tokio::test]
    async fn test_dangling_symlink_does_not_stop_other_files() {
        let source = TempDir::new().unwrap();
        std::os::unix::fs::symlink(source.path().join("gone"), source.path().join("a-dangling")).unwrap();
        fs::write(source.path().join("b-present"), b"ok").unwrap();
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();

        let copied = copy_files(
            &workspace,
            &[format!("{}/*", source.path().display())],
            Duration::from_secs(1),
            &run_log,
        )
        .await;

        assert_eq!(copied, 1);
        assert!(run_log.contents().contains("[WARN] Failed to copy"));
    }
}
