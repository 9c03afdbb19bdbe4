//! Archive helpers.
//!
//! ```no_run
//! use std::path::Path;
//! use wb_diag_collect::utils::compress::compress_directory;
//!
//! # fn example() -> anyhow::Result<()> {
//! let zip_path = compress_directory(Path::new("/tmp/collected"), Path::new("/tmp/out.zip"))?;
//! println!("Created archive: {}", zip_path.display());
//! # Ok(())
//! # }
//! ```

/// ZIP archive creation
pub mod compress;
