//! # wb-diag-collect
//!
//! One-click diagnostic data collector for Wiren Board controllers.
//!
//! ## Overview
//!
//! A collection copies configured files, redacts secrets in the copies,
//! runs diagnostic shell commands, grabs journal tails of selected services
//! and zips the lot together with its own run log. The archive is named
//! after the controller's serial number and the local time.
//!
//! Collections are started from the command line or remotely through the
//! `diag` RPC method served over MQTT.
//!
//! ## Usage
//!
//! ```no_run
//! use wb_diag_collect::collectors::collector::Collector;
//! use wb_diag_collect::config::DiagConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DiagConfig::from_yaml_str(
//!     "files: [/etc/wb-*.conf]\ntimeout: 10\njournald_logs: {lines_number: 100, names: [wb-*]}\n",
//! )?;
//! let options = config.to_options(None)?;
//!
//! let archive = Collector::new().collect(&options, "/tmp/", "diag_output").await?;
//! println!("Created {}", archive.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: YAML configuration and validated run options
//! - [`collectors`]: The collection phases and their orchestrator
//! - [`server`]: JSON-RPC over MQTT
//! - [`utils`]: Archive creation
//! - [`security`]: Workspace path validation
//! - [`error`]: Error type and process exit codes
//! - [`constants`]: Application-wide constants
//!
//! ## Safety
//!
//! The only `unsafe` block sends SIGKILL to the process group of a timed
//! out command.

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Collection phases and the orchestrator
pub mod collectors;

/// Configuration loading and validation
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Error type and exit codes
pub mod error;

/// Path validation for workspace writes
pub mod security;

/// MQTT RPC server
pub mod server;

/// Archive helpers
pub mod utils;
