use anyhow::{Result, bail};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use udpsync_transfer::plain_file_name;

/// Manages the directory received files are stored in.
///
/// Every transfer lands as a single flat file at `{storage_dir}/{file_name}`;
/// names are reduced to their last path component, so nothing can be
/// written or deleted outside the directory.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        info!("File storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to the stored file with the given name.
    pub fn file_path(&self, file_name: &str) -> Result<PathBuf> {
        Ok(self.dir.join(plain_file_name(file_name)?))
    }

    /// Delete a stored file. A file that is not there is an error.
    pub fn delete_file(&self, file_name: &str) -> Result<()> {
        let path = self.file_path(file_name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                bail!("{} does not exist in storage", file_name)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all files currently stored.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
