// ABOUTME: Build-context file sources for sandbox runs
// ABOUTME: Defines the FileSet capability interface plus in-memory and directory-walk backings

use std::fs;
use std::io::{Cursor, ErrorKind, Read};
use std::path::PathBuf;

use crate::error::Result;

/// A relative path paired with an open byte stream.
///
/// The build-context assembler reads the stream exactly once; dropping the
/// `File` releases the underlying handle, including on early-error paths.
pub struct File {
    pub path: String,
    pub reader: Box<dyn Read + Send>,
}

impl File {
    pub fn new(path: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            path: path.into(),
            reader: Box::new(reader),
        }
    }
}

/// An ordered, randomly-indexable collection of files backing a build
/// context.
///
/// Implementations must hand back the same file for the same index across
/// repeated calls within a single run. The assembler walks indices
/// `0..len()` once per execution; backings may be in-memory arrays, lazy
/// directory walks, or anything else that can open a reader on demand.
pub trait FileSet {
    /// Open the file at index `i`.
    fn at(&self, i: usize) -> Result<File>;

    /// Number of files in the set.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory file set backed by ordered `(path, bytes)` pairs.
#[derive(Debug, Default)]
pub struct MemoryFileSet {
    entries: Vec<(String, Vec<u8>)>,
}

impl MemoryFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a file; entries keep insertion order.
    pub fn push(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.push((path.into(), contents.into()));
        self
    }
}

impl FileSet for MemoryFileSet {
    fn at(&self, i: usize) -> Result<File> {
        let (path, contents) = self.entries.get(i).ok_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, format!("no file at index {i}"))
        })?;
        Ok(File::new(path.clone(), Cursor::new(contents.clone())))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// File set backed by a directory tree.
///
/// Relative paths are recorded up front in a stable order; file handles
/// are opened lazily, one per `at` call.
#[derive(Debug)]
pub struct DirFileSet {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl DirFileSet {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                let relative = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                paths.push(relative);
            }
        }
        Ok(Self { root, paths })
    }
}

impl FileSet for DirFileSet {
    fn at(&self, i: usize) -> Result<File> {
        let relative = self.paths.get(i).ok_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, format!("no file at index {i}"))
        })?;
        let reader = fs::File::open(self.root.join(relative))?;
        Ok(File::new(relative.to_string_lossy().into_owned(), reader))
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}
