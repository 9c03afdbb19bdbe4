use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::{bail, Result};
use glob::Pattern;
use regex::bytes::Regex;

use crate::collectors::files::SHELL_MATCH_OPTIONS;
use crate::collectors::run_log::RunLog;
use crate::config::FilterSpec;

/// Group reference by number or by name.
fn group_reference(regex: &Regex, group: &str) -> Result<String> {
    let known = match group.parse::<usize>() {
        Ok(index) => index < regex.captures_len(),
        Err(_) => regex.capture_names().flatten().any(|name| name == group),
    };
    if !known {
        bail!("invalid group reference {}", group);
    }
    Ok(format!("${{{}}}", group))
}

/// Convert a Python-style replacement (`\1`, `\g<name>`, `\n`) into the
/// `$`-template understood by [`Regex::replace_all`].
///
/// A literal `$` stays literal. Unknown letter escapes and references to
/// groups the pattern does not have are errors.
pub fn translate_replacement(replacement: &str, regex: &Regex) -> Result<String> {
    let mut template = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '$' => template.push_str("$$"),
            '\\' => {
                let Some(escaped) = chars.next() else {
                    bail!("bad escape at end of replacement {:?}", replacement);
                };
                match escaped {
                    'g' => {
                        if chars.next() != Some('<') {
                            bail!("missing group name in {:?}", replacement);
                        }
                        let mut group = String::new();
                        loop {
                            match chars.next() {
                                Some('>') => break,
                                Some(c) => group.push(c),
                                None => bail!("unterminated group name in {:?}", replacement),
                            }
                        }
                        template.push_str(&group_reference(regex, &group)?);
                    }
                    '0' => {
                        let mut value = 0u32;
                        for _ in 0..2 {
                            match chars.peek().and_then(|c| c.to_digit(8)) {
                                Some(digit) => {
                                    value = value * 8 + digit;
                                    chars.next();
                                }
                                None => break,
                            }
                        }
                        push_literal(&mut template, value);
                    }
                    '1'..='9' => {
                        let mut group = escaped.to_string();
                        if let Some(second) = chars.peek().copied().filter(char::is_ascii_digit) {
                            chars.next();
                            let third = chars.peek().and_then(|c| c.to_digit(8));
                            match (escaped.to_digit(8), second.to_digit(8), third) {
                                (Some(a), Some(b), Some(c)) => {
                                    chars.next();
                                    let value = a * 64 + b * 8 + c;
                                    if value > 0o377 {
                                        bail!("octal escape out of range in {:?}", replacement);
                                    }
                                    push_literal(&mut template, value);
                                    continue;
                                }
                                _ => group.push(second),
                            }
                        }
                        template.push_str(&group_reference(regex, &group)?);
                    }
                    'n' => template.push('\n'),
                    't' => template.push('\t'),
                    'r' => template.push('\r'),
                    'f' => template.push('\x0c'),
                    'v' => template.push('\x0b'),
                    'a' => template.push('\x07'),
                    'b' => template.push('\x08'),
                    '\\' => template.push('\\'),
                    c if c.is_ascii_alphabetic() => bail!("bad escape \\{} in {:?}", c, replacement),
                    c => {
                        template.push('\\');
                        push_literal(&mut template, u32::from(c));
                    }
                }
            }
            c => template.push(c),
        }
    }

    Ok(template)
}

fn push_literal(template: &mut String, value: u32) {
    match char::from_u32(value) {
        Some('$') => template.push_str("$$"),
        Some(c) => template.push(c),
        None => {}
    }
}

/// Replace every match of `regex` in the file at `path`, in place.
///
/// `template` uses `$`-syntax, see [`translate_replacement`]. Returns
/// `false` without touching the file when nothing matched.
pub fn apply_filter(path: &Path, regex: &Regex, template: &str) -> io::Result<bool> {
    let content = fs::read(path)?;
    match regex.replace_all(&content, template.as_bytes()) {
        Cow::Borrowed(_) => Ok(false),
        Cow::Owned(filtered) => {
            fs::write(path, filtered)?;
            Ok(true)
        }
    }
}

/// Apply redaction filters to files already copied into `workspace`.
///
/// Globs are evaluated relative to the workspace root, the original files
/// are never touched. Returns the number of files rewritten.
pub fn filter_files(workspace: &Path, filters: &[FilterSpec], run_log: &RunLog) -> usize {
    let mut rewritten = 0;
    let root = Pattern::escape(&workspace.to_string_lossy());

    for filter in filters {
        let regex = match Regex::new(&filter.match_pattern) {
            Ok(regex) => regex,
            Err(e) => {
                run_log.warn(format_args!(
                    "Invalid filter pattern {}: {}",
                    filter.match_pattern, e
                ));
                continue;
            }
        };
        let template = match translate_replacement(&filter.replacement, &regex) {
            Ok(template) => template,
            Err(e) => {
                run_log.warn(format_args!("Invalid filter replacement {}: {}", filter.replacement, e));
                continue;
            }
        };

        let pattern = format!("{}/{}", root, filter.glob_pattern.trim_start_matches('/'));
        let paths = match glob::glob_with(&pattern, SHELL_MATCH_OPTIONS) {
            Ok(paths) => paths,
            Err(e) => {
                run_log.warn(format_args!("Invalid filter glob {}: {}", filter.glob_pattern, e));
                continue;
            }
        };

        for path in paths.flatten().filter(|path| path.is_file()) {
            match apply_filter(&path, &regex, &template) {
                Ok(true) => {
                    rewritten += 1;
                    run_log.debug(format_args!(
                        "Filtered {} with {}",
                        path.strip_prefix(workspace).unwrap_or(&path).display(),
                        filter.match_pattern
                    ));
                }
                Ok(false) => {}
                Err(e) => {
                    run_log.warn(format_args!("Failed to filter {}: {}", path.display(), e));
                }
            }
        }
    }

    rewritten
}
