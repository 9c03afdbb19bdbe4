use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use log::{debug, info, warn};

use crate::collectors::commands::execute_commands;
use crate::collectors::files::copy_files;
use crate::collectors::filters::filter_files;
use crate::collectors::run_log::RunLog;
use crate::collectors::services::{harvest_service_logs, ServiceJournal, SystemdJournal};
use crate::collectors::workspace::Workspace;
use crate::config::CollectionOptions;
use crate::constants::{
    ARCHIVE_TIMESTAMP_FORMAT, RUN_LOG_FILENAME, SERIAL_NUMBER_PATH, WILDCARD_TIMEOUT,
};
use crate::error::{DiagError, Result};
use crate::utils::compress::compress_directory;

/// Runs a collection and packs the result into one archive.
///
/// A `Collector` holds no per-run state; every call to [`Collector::collect`]
/// gets its own workspace and run log, so one instance can be shared.
#[derive(Clone)]
pub struct Collector {
    serial_number_path: PathBuf,
    journal: Arc<dyn ServiceJournal>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        Self {
            serial_number_path: PathBuf::from(SERIAL_NUMBER_PATH),
            journal: Arc::new(SystemdJournal),
        }
    }

    pub fn with_serial_number_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.serial_number_path = path.into();
        self
    }

    pub fn with_service_journal(mut self, journal: Arc<dyn ServiceJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Collect everything `options` asks for and zip it.
    ///
    /// The archive is written to
    /// `<output_directory><output_filename>_<serial>_<timestamp>.zip`;
    /// `output_directory` is used as a plain prefix, so it normally ends
    /// with `/`. Returns the absolute archive path.
    ///
    /// Failures of single files, commands or services are recorded in the
    /// run log and do not fail the run.
    ///
    /// # Errors
    ///
    /// - `DiagError::NotFound` when the serial number file is missing
    /// - `DiagError::Io` when the workspace or the archive cannot be written
    pub async fn collect(
        &self,
        options: &CollectionOptions,
        output_directory: &str,
        output_filename: &str,
    ) -> Result<PathBuf> {
        let workspace = Workspace::create()?;
        let run_log = RunLog::new();
        debug!("Collecting into {}", workspace.path().display());

        let phases = self.run_phases(&workspace, options, &run_log).await;
        if let Err(e) = &phases {
            run_log.error(format_args!("{}", e));
        }

        let run_log_path = workspace.path().join(RUN_LOG_FILENAME);
        let flushed = run_log
            .write_to(&run_log_path)
            .map_err(|e| DiagError::io(&run_log_path, e));
        phases?;
        flushed?;

        let archive = self.finalize(&workspace, output_directory, output_filename);

        if let Err(e) = workspace.close() {
            warn!("Failed to remove temporary directory: {}", e);
        }
        archive
    }

    async fn run_phases(
        &self,
        workspace: &Workspace,
        options: &CollectionOptions,
        run_log: &RunLog,
    ) -> Result<()> {
        let copied = copy_files(workspace, &options.file_wildcards, WILDCARD_TIMEOUT, run_log).await;
        run_log.debug(format_args!("Copied {} files", copied));

        let filtered = filter_files(workspace.path(), &options.filters, run_log);
        run_log.debug(format_args!("Filtered {} files", filtered));

        let outcomes =
            execute_commands(workspace, &options.commands, options.command_timeout, run_log).await;
        run_log.debug(format_args!("Ran {} commands", outcomes.len()));

        let harvested = harvest_service_logs(
            workspace,
            self.journal.as_ref(),
            &options.service_wildcards,
            options.service_log_line_count,
            options.command_timeout,
            run_log,
        )
        .await?;
        run_log.debug(format_args!("Collected logs of {} services", harvested));

        Ok(())
    }

    fn finalize(
        &self,
        workspace: &Workspace,
        output_directory: &str,
        output_filename: &str,
    ) -> Result<PathBuf> {
        let serial_number = read_serial_number(&self.serial_number_path)?;
        let timestamp = Local::now().format(ARCHIVE_TIMESTAMP_FORMAT);
        let zip_path = PathBuf::from(format!(
            "{}{}_{}_{}.zip",
            output_directory, output_filename, serial_number, timestamp
        ));

        compress_directory(workspace.path(), &zip_path).map_err(|e| DiagError::Io {
            path: zip_path.clone(),
            source: io::Error::new(io::ErrorKind::Other, format!("{:#}", e)),
        })?;

        let zip_path = absolute(zip_path)?;
        info!("Archive created at {}", zip_path.display());
        Ok(zip_path)
    }
}

/// First line of the serial number file, trimmed.
pub fn read_serial_number(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|e| DiagError::io(path, e))?;
    Ok(content.lines().next().unwrap_or_default().trim().to_string())
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().map_err(|e| DiagError::io(".", e))?;
    Ok(cwd.join(path))
}
