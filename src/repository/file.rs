//! 文件系统仓库

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use super::{Repository, Resource};

/// Milliseconds since the epoch of a path's modification time, 0 if unavailable.
fn modified_millis(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Canonical form of a path. Falls back to the path itself when it does not exist yet.
fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileRepository {
    dir: PathBuf,
    path: String,
}

impl FileRepository {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = canonical(dir.as_ref());
        let mut path = dir.to_string_lossy().replace('\\', "/");
        if !path.ends_with('/') {
            path.push('/');
        }
        Self { dir, path }
    }

    /// The directory this repository reads from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Repository for FileRepository {
    fn path(&self) -> &str {
        &self.path
    }

    fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    fn last_modified(&self) -> u64 {
        modified_millis(&self.dir)
    }

    fn get_resource(
        &self,
        name: &str,
    ) -> Arc<dyn Resource> {
        Arc::new(FileResource::new(self.dir.join(name)))
    }

    fn child(
        &self,
        name: &str,
    ) -> Arc<dyn Repository> {
        Arc::new(FileRepository::new(self.dir.join(name)))
    }

    fn parent(&self) -> Option<Arc<dyn Repository>> {
        self.dir
            .parent()
            .map(|p| Arc::new(FileRepository::new(p)) as Arc<dyn Repository>)
    }

    fn resources(
        &self,
        recursive: bool,
    ) -> io::Result<Vec<Arc<dyn Resource>>> {
        let mut walker = WalkDir::new(&self.dir).min_depth(1).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }
        let mut resources: Vec<Arc<dyn Resource>> = Vec::new();
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                resources.push(Arc::new(FileResource::new(entry.into_path())));
            }
        }
        Ok(resources)
    }
}

/// A single file.
#[derive(Debug, Clone)]
pub struct FileResource {
    file: PathBuf,
    name: String,
    path: String,
}

impl FileResource {
    pub fn new(file: impl AsRef<Path>) -> Self {
        let file = canonical(file.as_ref());
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = file.to_string_lossy().replace('\\', "/");
        Self { file, name, path }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl Resource for FileResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn exists(&self) -> bool {
        self.file.is_file()
    }

    fn last_modified(&self) -> u64 {
        modified_millis(&self.file)
    }

    fn length(&self) -> u64 {
        fs::metadata(&self.file).map(|m| m.len()).unwrap_or(0)
    }

    fn open_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.file)?))
    }

    fn url(&self) -> Option<String> {
        self.exists().then(|| format!("file://{}", self.path))
    }

    fn repository(&self) -> Arc<dyn Repository> {
        let dir = self.file.parent().unwrap_or_else(|| Path::new("/"));
        Arc::new(FileRepository::new(dir))
    }
}
