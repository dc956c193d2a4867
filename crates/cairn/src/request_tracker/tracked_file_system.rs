use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use cairn_core::hash::content_hash;
use cairn_filesystem::FileSystem;
use cairn_filesystem::FileSystemRef;
use parking_lot::Mutex;

/// Content hash of each file as one execution first saw it. `None` means it did not exist.
pub(crate) type FileReads = HashMap<PathBuf, Option<String>>;

/// The file system handed to a single execution.
///
/// Remembers the hash of the bytes the handler actually read, so the recorded input matches the
/// result even when the file changes again before the execution completes.
#[derive(Debug)]
pub(crate) struct TrackedFileSystem {
  inner: FileSystemRef,
  reads: Mutex<FileReads>,
}

impl TrackedFileSystem {
  pub fn new(inner: FileSystemRef) -> Self {
    Self {
      inner,
      reads: Mutex::new(HashMap::new()),
    }
  }

  pub fn take_reads(&self) -> FileReads {
    std::mem::take(&mut *self.reads.lock())
  }

  fn record(&self, path: &Path, content_hash: Option<String>) {
    self
      .reads
      .lock()
      .entry(path.to_path_buf())
      .or_insert(content_hash);
  }

  fn record_result<T: AsRef<[u8]>>(&self, path: &Path, result: &io::Result<T>) {
    match result {
      Ok(contents) => self.record(path, Some(content_hash(contents.as_ref()))),
      Err(error) if error.kind() == io::ErrorKind::NotFound => self.record(path, None),
      Err(_) => {}
    }
  }
}

impl FileSystem for TrackedFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    self.inner.cwd()
  }

  fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
    self.inner.canonicalize(path)
  }

  fn create_dir_all(&self, path: &Path) -> io::Result<()> {
    self.inner.create_dir_all(path)
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    let result = self.inner.read(path);
    self.record_result(path, &result);
    result
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    let result = self.inner.read_to_string(path);
    self.record_result(path, &result);
    result
  }

  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
    self.inner.write(path, contents)
  }

  fn is_file(&self, path: &Path) -> bool {
    let is_file = self.inner.is_file(path);
    if !is_file && !self.inner.is_dir(path) {
      self.record(path, None);
    }
    is_file
  }

  fn is_dir(&self, path: &Path) -> bool {
    self.inner.is_dir(path)
  }
}
