//! Global constants for wb-diag-collect.
//!
//! Well-known device paths, archive layout names and MQTT topic pieces live
//! here so the collector, the CLI and the RPC server agree on them.

use std::time::Duration;

// Device paths
/// Configuration used when `-c` is not given
pub const DEFAULT_CONF_PATH: &str = "/usr/share/wb-diag-collect/wb-diag-collect.conf";

/// One-line file holding the controller's short serial number
pub const SERIAL_NUMBER_PATH: &str = "/var/lib/wirenboard/short_sn.conf";

/// Directory served by the web UI where RPC-triggered archives are placed
pub const SERVER_OUTPUT_DIR: &str = "/var/www/diag/";

/// Archive stem used for RPC-triggered collections
pub const SERVER_OUTPUT_FILENAME: &str = "diag_output";

// Archive layout
/// Name of the run log inside the archive
pub const RUN_LOG_FILENAME: &str = "wb-diag-collect.log";

/// Subdirectory holding per-service journal tails
pub const SERVICE_LOG_DIR: &str = "service";

/// Suffix appended to command and service output files
pub const OUTPUT_LOG_SUFFIX: &str = "log";

/// Archive timestamp format (local time)
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H.%M.%S";

/// Timestamp format of run log lines
pub const RUN_LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

// Subprocess execution
/// Time budget for resolving a single file wildcard
pub const WILDCARD_TIMEOUT: Duration = Duration::from_secs(1);

/// Locale forced on every command so output stays parseable
pub const LOCALE_ENV: (&str, &str) = ("LC_ALL", "C");

/// Shell used to run configured commands
pub const SHELL: &str = "sh";

// Compression
/// Chunk size for compression reads (512KB)
pub const COMPRESSION_CHUNK_SIZE: usize = 512 * 1024;

/// Large file threshold for compression decisions (100MB)
pub const LARGE_FILE_COMPRESSION_THRESHOLD: u64 = 100 * 1024 * 1024;

pub const COMPRESSED_EXTENSIONS: &[&str] = &[
    "zip", "gz", "xz", "bz2", "7z", "rar", "jpg", "jpeg", "png", "gif", "mp3", "mp4", "avi", "mov",
    "mpg", "mpeg",
];

// MQTT
/// Client identifier presented to the broker
pub const MQTT_CLIENT_ID: &str = "wb-diag-collect";

/// Default broker port
pub const MQTT_DEFAULT_PORT: u16 = 1883;

/// Keep-alive interval for the broker connection
pub const MQTT_KEEP_ALIVE_SECS: u64 = 30;

/// Driver id, the third segment of every RPC topic
pub const RPC_DRIVER_ID: &str = "diag";

/// Service name the RPC methods are registered under
pub const RPC_SERVICE: &str = "diag";

/// Side-channel topic receiving every collection result
pub const DIAG_ARTIFACT_TOPIC: &str = "/wb-diag-collect/artifact";

// Error messages
pub const ERROR_STILL_RUNNING: &str = "Diagnostic collection is still running";
