use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::time::Duration;

use log::debug;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::collectors::run_log::RunLog;
use crate::collectors::workspace::Workspace;
use crate::config::CommandSpec;
use crate::constants::{LOCALE_ENV, OUTPUT_LOG_SUFFIX, SHELL};

/// How a single subprocess run ended.
#[derive(Debug)]
pub enum CommandOutcome {
    Completed(ExitStatus),
    TimedOut,
    Failed,
}

/// Build `sh -c <command>`.
pub fn shell_command(command: &str) -> StdCommand {
    let mut cmd = StdCommand::new(SHELL);
    cmd.arg("-c").arg(command);
    cmd
}

/// `<relative>.log`, keeping any dots already in the name.
pub fn log_file_name(relative: &Path) -> PathBuf {
    let mut name = OsString::from(relative.as_os_str());
    name.push(".");
    name.push(OUTPUT_LOG_SUFFIX);
    PathBuf::from(name)
}

/// Kill the child together with everything it spawned.
///
/// The child leads its own process group, so shell pipelines die as a whole.
async fn kill_process_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("Failed to kill process group {}: {}", pid, e);
        }
    }
    let _ = child.kill().await;
}

/// Run `command` with stdout and stderr redirected into `log_path`.
///
/// The log is created or truncated first. When the command is still
/// running after `timeout` it is killed, a warning naming `description`
/// is logged and a trailer line is appended to the log; output written
/// before the kill is kept.
pub async fn run_to_file(
    mut command: StdCommand,
    description: &str,
    log_path: &Path,
    timeout: Duration,
    run_log: &RunLog,
) -> CommandOutcome {
    let spawned = File::create(log_path).and_then(|stdout| {
        let stderr = stdout.try_clone()?;
        command
            .env(LOCALE_ENV.0, LOCALE_ENV.1)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);
        let mut command = Command::from(command);
        command.kill_on_drop(true);
        command.spawn()
    });

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            run_log.warn(format_args!("Failed to run {}: {}", description, e));
            return CommandOutcome::Failed;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            run_log.debug(format_args!("{} finished with {}", description, status));
            CommandOutcome::Completed(status)
        }
        Ok(Err(e)) => {
            run_log.warn(format_args!("Failed to wait for {}: {}", description, e));
            kill_process_group(&mut child).await;
            CommandOutcome::Failed
        }
        Err(_) => {
            kill_process_group(&mut child).await;
            let message = format!("{} didn't finish in {:?}", description, timeout);
            run_log.warn(format_args!("{}", message));

            if let Err(e) = OpenOptions::new()
                .append(true)
                .open(log_path)
                .and_then(|mut log| writeln!(log, "\n{}", message))
            {
                run_log.debug(format_args!("Failed to note timeout in {}: {}", log_path.display(), e));
            }
            CommandOutcome::TimedOut
        }
    }
}

/// Run every configured command, one log file each.
///
/// A failing, slow or misconfigured command is logged and skipped; the
/// remaining commands still run.
pub async fn execute_commands(
    workspace: &Workspace,
    commands: &[CommandSpec],
    timeout: Duration,
    run_log: &RunLog,
) -> Vec<CommandOutcome> {
    let mut outcomes = Vec::with_capacity(commands.len());

    for spec in commands {
        let log_path = match workspace.resolve(&log_file_name(&spec.relative_output_path)) {
            Ok(path) => path,
            Err(e) => {
                run_log.warn(format_args!(
                    "Skipping command {}: bad output path {}: {:#}",
                    spec.shell_command,
                    spec.relative_output_path.display(),
                    e
                ));
                outcomes.push(CommandOutcome::Failed);
                continue;
            }
        };

        if let Some(parent) = log_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                run_log.warn(format_args!(
                    "Failed to create directory {} for command {}: {}",
                    parent.display(),
                    spec.shell_command,
                    e
                ));
                outcomes.push(CommandOutcome::Failed);
                continue;
            }
        }

        let description = format!("Command {}", spec.shell_command);
        let outcome = run_to_file(
            shell_command(&spec.shell_command),
            &description,
            &log_path,
            timeout,
            run_log,
        )
        .await;
        outcomes.push(outcome);
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn spec(command: &str, filename: &str) -> CommandSpec {
        CommandSpec {
            shell_command: command.to_string(),
            relative_output_path: PathBuf::from(filename),
        }
    }

    #[test]
    fn test_log_file_name_appends_suffix() {
        assert_eq!(log_file_name(Path::new("network/ip.addr")), PathBuf::from("network/ip.addr.log"));
        assert_eq!(log_file_name(Path::new("dmesg")), PathBuf::from("dmesg.log"));
    }

    #[tokio::test]
    async fn test_stdout_and_stderr_are_merged() {
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();

        let outcomes = execute_commands(
            &workspace,
            &[spec("echo out; echo err 1>&2", "diag/both")],
            Duration::from_secs(5),
            &run_log,
        )
        .await;

        assert!(matches!(outcomes[0], CommandOutcome::Completed(status) if status.success()));
        let log = fs::read_to_string(workspace.path().join("diag/both.log")).unwrap();
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[tokio::test]
    async fn test_locale_is_forced() {
        let workspace = Workspace::create().unwrap();
        execute_commands(
            &workspace,
            &[spec("echo \"$LC_ALL\"", "locale")],
            Duration::from_secs(5),
            &RunLog::new(),
        )
        .await;

        let log = fs::read_to_string(workspace.path().join("locale.log")).unwrap();
        assert_eq!(log.trim(), "C");
    }

    #[tokio::test]
    async fn test_timeout_kills_and_keeps_partial_output() {
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();
        let started = Instant::now();

        let outcomes = execute_commands(
            &workspace,
            &[spec("echo started; sleep 30; echo late", "slow")],
            Duration::from_millis(300),
            &run_log,
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(outcomes[0], CommandOutcome::TimedOut));

        let log = fs::read_to_string(workspace.path().join("slow.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.first(), Some(&"started"));
        assert!(!lines.contains(&"late"));
        assert!(log.ends_with("didn't finish in 300ms\n"));
        assert!(run_log
            .contents()
            .contains("[WARN] Command echo started; sleep 30; echo late didn't finish in 300ms"));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let workspace = Workspace::create().unwrap();
        let marker = workspace.path().join("marker");
        let command = format!("(sleep 1; echo late > {}) & sleep 30", marker.display());

        let outcomes = execute_commands(
            &workspace,
            &[spec(&command, "group")],
            Duration::from_millis(200),
            &RunLog::new(),
        )
        .await;
        assert!(matches!(outcomes[0], CommandOutcome::TimedOut));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_failing_command_does_not_stop_the_rest() {
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();

        let outcomes = execute_commands(
            &workspace,
            &[
                spec("exit 3", "first"),
                spec("sleep 30", "second"),
                spec("echo third", "third"),
            ],
            Duration::from_millis(300),
            &run_log,
        )
        .await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], CommandOutcome::Completed(status) if status.code() == Some(3)));
        assert!(matches!(outcomes[1], CommandOutcome::TimedOut));
        assert!(matches!(outcomes[2], CommandOutcome::Completed(_)));
        assert_eq!(
            fs::read_to_string(workspace.path().join("third.log")).unwrap(),
            "third\n"
        );
    }

    #[tokio::test]
    async fn test_escaping_output_path_is_skipped() {
        let workspace = Workspace::create().unwrap();
        let run_log = RunLog::new();

        let outcomes = execute_commands(
            &workspace,
            &[spec("echo x", "../outside")],
            Duration::from_secs(1),
            &run_log,
        )
        .await;

        assert!(matches!(outcomes[0], CommandOutcome::Failed));
        assert!(run_log.contents().contains("bad output path"));
    }
}
