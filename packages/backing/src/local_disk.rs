use std::{fs, io, path};

use bytes::Bytes;

use crate::{BackingError, BackingStore};

/// A backing store rooted at a directory on the local disk.
///
/// Locations are interpreted relative to the root; `..` and `.` components
/// are rejected so a location can never escape it.
pub struct LocalDiskBackingStore {
    root: path::PathBuf,
}

impl LocalDiskBackingStore {
    pub fn new(root: path::PathBuf) -> Result<LocalDiskBackingStore, BackingError> {
        let attr = fs::metadata(&root).map_err(|error| BackingError::InvalidLocation {
            location: root.display().to_string(),
            message: format!("root path is not accessible: {}", error),
        })?;

        if !attr.is_dir() {
            return Err(BackingError::InvalidLocation {
                location: root.display().to_string(),
                message: "root path must be a directory".to_string(),
            });
        }

        if attr.permissions().readonly() {
            return Err(BackingError::InvalidLocation {
                location: root.display().to_string(),
                message: "root directory must be writable".to_string(),
            });
        }

        let root = root.canonicalize()?;
        Ok(LocalDiskBackingStore { root })
    }

    pub fn root(&self) -> &path::Path {
        &self.root
    }

    fn location_to_file_path(&self, location: &str) -> Result<path::PathBuf, BackingError> {
        let mut file_path = self.root.clone();
        for component in location.split('/').filter(|c| !c.is_empty()) {
            if component == "." || component == ".." {
                return Err(BackingError::InvalidLocation {
                    location: location.to_string(),
                    message: "relative components are not allowed".to_string(),
                });
            }
            file_path.push(component);
        }
        Ok(file_path)
    }
}

impl BackingStore for LocalDiskBackingStore {
    fn read_bytes(&self, location: &str) -> Result<Option<Bytes>, BackingError> {
        let file_path = self.location_to_file_path(location)?;
        log::debug!("Reading {}...", file_path.display());
        match fs::read(&file_path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&self, location: &str, data: Bytes) -> Result<(), BackingError> {
        let file_path = self.location_to_file_path(location)?;
        log::debug!("Writing {}...", file_path.display());
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file_path, &data)?;
        Ok(())
    }

    fn delete(&self, location: &str) -> Result<bool, BackingError> {
        let file_path = self.location_to_file_path(location)?;
        log::debug!("Deleting {}...", file_path.display());
        match fs::remove_file(&file_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_children(&self, location: &str) -> Result<Vec<String>, BackingError> {
        let dir_path = self.location_to_file_path(location)?;
        let entries = match fs::read_dir(&dir_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => log::warn!(
                    "Skipping non UTF-8 entry {:?} in {}",
                    name,
                    dir_path.display()
                ),
            }
        }
        names.sort();
        Ok(names)
    }

    fn line_separator(&self, location: &str) -> String {
        let existing = self
            .location_to_file_path(location)
            .ok()
            .and_then(|p| fs::read(p).ok());
        match existing {
            Some(data) if data.windows(2).any(|w| w == b"\r\n") => "\r\n".to_string(),
            _ => "\n".to_string(),
        }
    }
}
