use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the per-project data directory searched for by walking up from
/// the current directory.
const DATA_DIR_NAME: &str = ".tempo";

/// Task document file name inside the data directory.
const TASKS_FILE_NAME: &str = "tasks.json";

/// Gratitude journal file name inside the data directory.
const GRATITUDE_FILE_NAME: &str = "gratitude.json";

/// Resolve the data directory: an explicit override wins, then a local
/// `.tempo` found by walking up from the current directory, then the
/// global `~/.tempo`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }

    let current_dir = env::current_dir().context("Could not determine current directory")?;
    if let Some(local_dir) = find_local_data_dir(&current_dir) {
        return Ok(local_dir);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(DATA_DIR_NAME))
}

/// Find a local `.tempo` directory by walking up the directory tree.
fn find_local_data_dir(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let data_dir = current.join(DATA_DIR_NAME);
        if data_dir.is_dir() {
            return Some(data_dir);
        }
        current = current.parent()?;
    }
}

/// Resolve the data directory and make sure it exists on disk.
pub fn ensure_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let dir = resolve_data_dir(explicit)?;
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(dir)
}

/// Initialize a local `.tempo` directory in the current directory.
pub fn init_local_data_dir() -> Result<PathBuf> {
    let current_dir = env::current_dir().context("Could not determine current directory")?;
    let data_dir = current_dir.join(DATA_DIR_NAME);

    if data_dir.exists() {
        anyhow::bail!("Tempo directory already exists: {}", data_dir.display());
    }

    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create directory: {}", data_dir.display()))?;

    Ok(data_dir)
}

/// Path to the task document inside the data directory.
pub fn tasks_file(data_dir: &Path) -> PathBuf {
    data_dir.join(TASKS_FILE_NAME)
}

/// Path to the gratitude journal inside the data directory.
pub fn gratitude_file(data_dir: &Path) -> PathBuf {
    data_dir.join(GRATITUDE_FILE_NAME)
}

/// Atomically write content to a file using temp file + rename.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .context("File path has no parent directory")?;

    // Temp file in the same directory so the rename stays on one filesystem.
    let mut temp_file = NamedTempFile::new_in(dir)
        .context("Failed to create temporary file")?;

    temp_file
        .write_all(content.as_bytes())
        .context("Failed to write to temporary file")?;

    temp_file
        .as_file()
        .sync_all()
        .context("Failed to sync temporary file")?;

    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist file: {}", path.display()))?;

    Ok(())
}

/// Read file content, returning an empty string if the file doesn't exist.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
}
