use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use log::{debug, info};
use zip::{write::FileOptions, ZipWriter};

use crate::constants::{
    COMPRESSED_EXTENSIONS, COMPRESSION_CHUNK_SIZE as CHUNK_SIZE, LARGE_FILE_COMPRESSION_THRESHOLD,
};

/// File entry with its compression options
struct FileEntry {
    rel_path: String,
    abs_path: PathBuf,
    options: FileOptions,
}

/// Pick the deflate level for a file.
///
/// Files that are already compressed (by extension) or larger than
/// `LARGE_FILE_COMPRESSION_THRESHOLD` get the fastest level, everything else
/// the default one.
///
/// # Arguments
///
/// * `path` - Path to the file to analyze
///
/// # Returns
///
/// `FileOptions` configured with the compression method and level
pub fn get_compression_options(path: &Path) -> FileOptions {
    let low_compression = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => COMPRESSED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    };

    let large_file = matches!(
        fs::metadata(path),
        Ok(metadata) if metadata.len() > LARGE_FILE_COMPRESSION_THRESHOLD
    );

    FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(compression_level(low_compression, large_file)))
        .unix_permissions(0o644)
}

fn compression_level(low_compression: bool, large_file: bool) -> i32 {
    if low_compression || large_file {
        1
    } else {
        6
    }
}

/// Worker function for compression threads
fn compression_worker(
    receiver: Receiver<Option<FileEntry>>,
    zip: Arc<Mutex<ZipWriter<fs::File>>>,
) -> Result<()> {
    let mut buffer = vec![0u8; CHUNK_SIZE];

    while let Ok(Some(entry)) = receiver.recv() {
        let start = Instant::now();

        let file = fs::File::open(&entry.abs_path)
            .with_context(|| format!("Failed to open {}", entry.abs_path.display()))?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        {
            let mut zip = zip
                .lock()
                .map_err(|_| anyhow!("Zip writer lock poisoned"))?;

            zip.start_file(entry.rel_path.clone(), entry.options)
                .with_context(|| format!("Failed to start file entry for {}", entry.rel_path))?;

            loop {
                let bytes_read = reader
                    .read(&mut buffer)
                    .with_context(|| format!("Failed to read from {}", entry.abs_path.display()))?;
                if bytes_read == 0 {
                    break;
                }
                zip.write_all(&buffer[..bytes_read])
                    .with_context(|| format!("Failed to write to zip for {}", entry.rel_path))?;
            }
        }

        debug!("Compressed {} ({} bytes) in {:?}", entry.rel_path, file_size, start.elapsed());
    }

    Ok(())
}

/// Zip the whole of `source_dir` into `zip_path`.
///
/// Entries are named relative to `source_dir`, directories get their own
/// entries. Missing parent directories of `zip_path` are created.
///
/// # Example
///
/// ```no_run
/// # use std::path::Path;
/// # use wb_diag_collect::utils::compress::compress_directory;
/// let zip_path = compress_directory(
///     Path::new("/tmp/wb-diag-collect.abc123"),
///     Path::new("/var/www/diag/diag_output_A1B2C3_2024-01-15-14.30.52.zip"),
/// )?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn compress_directory(source_dir: &Path, zip_path: &Path) -> Result<PathBuf> {
    let start = Instant::now();
    info!("Compressing {} into {}", source_dir.display(), zip_path.display());

    if let Some(parent) = zip_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let zip_file = fs::File::create(zip_path)
        .with_context(|| format!("Failed to create zip file {}", zip_path.display()))?;
    let zip = Arc::new(Mutex::new(ZipWriter::new(zip_file)));

    let (sender, receiver) = bounded::<Option<FileEntry>>(1000);

    let thread_count = std::cmp::min(num_cpus::get(), 8);
    let mut workers = Vec::with_capacity(thread_count);
    for i in 0..thread_count {
        let worker_receiver = receiver.clone();
        let worker_zip = Arc::clone(&zip);
        let worker = std::thread::Builder::new()
            .name(format!("compression-{}", i))
            .spawn(move || compression_worker(worker_receiver, worker_zip))
            .context("Failed to spawn compression worker")?;
        workers.push(worker);
    }
    // Only workers hold receivers now, so sends fail if they all stop early
    drop(receiver);

    let mut dirs = Vec::new();
    let scanned = scan_directory(source_dir, source_dir, &mut dirs, &sender);

    for _ in 0..thread_count {
        if sender.send(None).is_err() {
            break;
        }
    }
    drop(sender);

    let mut worker_error = None;
    for worker in workers {
        let result = worker
            .join()
            .map_err(|_| anyhow!("Compression worker panicked"))
            .and_then(|result| result);
        if let Err(e) = result {
            worker_error.get_or_insert(e);
        }
    }
    if let Some(e) = worker_error {
        return Err(e);
    }
    scanned?;

    let mut zip = Arc::try_unwrap(zip)
        .map_err(|_| anyhow!("Zip writer is still shared"))?
        .into_inner()
        .map_err(|_| anyhow!("Zip writer lock poisoned"))?;

    for dir in dirs {
        zip.add_directory(dir, FileOptions::default())?;
    }
    zip.finish().context("Failed to finalize zip file")?;

    info!("Compressed archive {} in {:?}", zip_path.display(), start.elapsed());
    Ok(zip_path.to_path_buf())
}

/// Scan directory and queue files for compression
fn scan_directory(
    base_path: &Path,
    dir_path: &Path,
    dirs: &mut Vec<String>,
    sender: &Sender<Option<FileEntry>>,
) -> Result<()> {
    let entries = fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read directory {}", dir_path.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let rel_path = path
            .strip_prefix(base_path)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();

        if entry.file_type()?.is_dir() {
            dirs.push(format!("{}/", rel_path));
            scan_directory(base_path, &path, dirs, sender)?;
        } else {
            let options = get_compression_options(&path);
            sender
                .send(Some(FileEntry {
                    rel_path,
                    abs_path: path,
                    options,
                }))
                .map_err(|_| anyhow!("All compression workers stopped"))?;
        }
    }

    Ok(())
}
