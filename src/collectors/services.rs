use std::process::{Command as StdCommand, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use tokio::process::Command;

use crate::collectors::commands::{run_to_file, CommandOutcome};
use crate::collectors::run_log::RunLog;
use crate::collectors::workspace::Workspace;
use crate::constants::{LOCALE_ENV, OUTPUT_LOG_SUFFIX, SERVICE_LOG_DIR};
use crate::error::DiagError;

/// Access to the host service manager and its journal.
#[async_trait]
pub trait ServiceJournal: Send + Sync {
    /// Names of the loaded services, e.g. `wb-mqtt-serial.service`.
    async fn list_services(&self, timeout: Duration) -> Result<Vec<String>>;

    /// Command printing the last `lines` journal lines of `service`.
    fn journal_command(&self, service: &str, lines: u32) -> StdCommand;
}

/// systemd backend: `systemctl` for the listing, `journalctl` for the tails.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdJournal;

#[async_trait]
impl ServiceJournal for SystemdJournal {
    async fn list_services(&self, timeout: Duration) -> Result<Vec<String>> {
        let mut command = Command::new("systemctl");
        command
            .args(["list-units", "--type=service", "--state=loaded", "--no-pager", "--plain"])
            .env(LOCALE_ENV.0, LOCALE_ENV.1)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .with_context(|| format!("systemctl didn't finish in {:?}", timeout))?
            .context("Failed to run systemctl")?;

        if !output.status.success() {
            bail!(
                "systemctl exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(parse_unit_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn journal_command(&self, service: &str, lines: u32) -> StdCommand {
        let mut command = StdCommand::new("journalctl");
        command
            .arg("-u")
            .arg(service)
            .arg("--no-pager")
            .arg("-n")
            .arg(lines.to_string());
        command
    }
}

/// Extract service names from `systemctl list-units --plain` output.
///
/// The first column is the unit name; header, legend and non-service lines
/// are dropped.
pub fn parse_unit_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            line.split_whitespace()
                .find(|token| *token != "●" && *token != "*")
        })
        .filter(|unit| unit.ends_with(".service"))
        .map(str::to_string)
        .collect()
}

/// Rewrite an `fnmatch` wildcard into glob syntax.
///
/// Every `[` that does not open a complete class is escaped, and runs of
/// `*` collapse into one. A class may start with `!`, and a `]` right after
/// the opening bracket (or after `!`) is part of the set.
fn fnmatch_to_glob(wildcard: &str) -> String {
    let chars: Vec<char> = wildcard.chars().collect();
    let mut escaped = String::with_capacity(wildcard.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '*' {
            if !escaped.ends_with('*') {
                escaped.push('*');
            }
            i += 1;
            continue;
        }
        if chars[i] != '[' {
            escaped.push(chars[i]);
            i += 1;
            continue;
        }

        let mut j = i + 1;
        if chars.get(j) == Some(&'!') {
            j += 1;
        }
        if chars.get(j) == Some(&']') {
            j += 1;
        }
        match chars[j.min(chars.len())..].iter().position(|c| *c == ']') {
            Some(offset) => {
                let end = j + offset;
                escaped.extend(&chars[i..=end]);
                i = end + 1;
            }
            None => {
                escaped.push_str("[[]");
                i += 1;
            }
        }
    }

    escaped
}

/// Compile a service wildcard with shell `fnmatch` rules.
///
/// An unclosed `[` matches itself; anything the glob syntax still rejects
/// is matched literally.
pub fn service_pattern(wildcard: &str, run_log: &RunLog) -> Pattern {
    match Pattern::new(&fnmatch_to_glob(wildcard)) {
        Ok(pattern) => pattern,
        Err(e) => {
            run_log.warn(format_args!(
                "Service wildcard {} is matched literally: {}",
                wildcard, e
            ));
            Pattern::new(&Pattern::escape(wildcard)).unwrap_or_default()
        }
    }
}

/// Keep the services matching at least one wildcard, in listing order.
pub fn select_services(services: &[String], wildcards: &[String], run_log: &RunLog) -> Vec<String> {
    let patterns: Vec<Pattern> = wildcards
        .iter()
        .map(|wildcard| service_pattern(wildcard, run_log))
        .collect();

    services
        .iter()
        .filter(|service| patterns.iter().any(|pattern| pattern.matches(service)))
        .cloned()
        .collect()
}

/// Store the journal tail of every selected service under `service/`.
///
/// A `lines` count of zero skips the phase entirely. Returns the number of
/// services whose journal command completed.
pub async fn harvest_service_logs(
    workspace: &Workspace,
    journal: &dyn ServiceJournal,
    wildcards: &[String],
    lines: u32,
    timeout: Duration,
    run_log: &RunLog,
) -> Result<usize, DiagError> {
    if lines == 0 {
        run_log.debug(format_args!("Service log collection is disabled"));
        return Ok(0);
    }

    let services = match journal.list_services(timeout).await {
        Ok(services) => services,
        Err(e) => {
            run_log.warn(format_args!("Failed to list services: {:#}", e));
            Vec::new()
        }
    };
    let selected = select_services(&services, wildcards, run_log);
    run_log.debug(format_args!("Selected {} of {} services", selected.len(), services.len()));

    let service_dir = workspace.ensure_dir(SERVICE_LOG_DIR)?;

    let mut harvested = 0;
    for service in selected {
        if service.contains('/') {
            run_log.warn(format_args!("Skipping service with unusable name {}", service));
            continue;
        }

        let log_path = service_dir.join(format!("{}.{}", service, OUTPUT_LOG_SUFFIX));
        let description = format!("Journalctl reading {}", service);
        let outcome = run_to_file(
            journal.journal_command(&service, lines),
            &description,
            &log_path,
            timeout,
            run_log,
        )
        .await;

        if let CommandOutcome::Completed(_) = outcome {
            harvested += 1;
        }
    }

    Ok(harvested)
}
