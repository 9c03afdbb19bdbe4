//! Collection phases and the orchestrator that runs them.
//!
//! ```text
//! workspace ─▶ copy files ─▶ filter files ─▶ run commands ─▶ service logs ─▶ zip
//!                    └──────────── run log (wb-diag-collect.log) ───────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```no_run
//! use wb_diag_collect::collectors::collector::Collector;
//! use wb_diag_collect::config::load_config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let options = load_config(None)?.to_options(None)?;
//! let archive = Collector::new().collect(&options, "/tmp/", "diag_output").await?;
//! println!("{}", archive.display());
//! # Ok(())
//! # }
//! ```

/// Orchestrator: workspace, phases, archive
pub mod collector;

/// Shell command execution with deadlines
pub mod commands;

/// Wildcard expansion and file copying
pub mod files;

/// In-place redaction of collected files
pub mod filters;

/// Per-run log sink
pub mod run_log;

/// Journal tails of selected services
pub mod services;

/// Temporary per-run directory
pub mod workspace;
