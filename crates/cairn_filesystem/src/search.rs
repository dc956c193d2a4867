use std::path::Path;
use std::path::PathBuf;

use crate::FileSystem;

/// Outcome of walking up the directory tree looking for one of a set of file names
#[derive(Debug, Default, PartialEq)]
pub struct AncestorSearch {
  /// The first matching file, closest to the starting directory
  pub found: Option<PathBuf>,
  /// Every candidate path that was checked and did not exist, in search order
  pub checked: Vec<PathBuf>,
}

/// Search for the first of `filenames` in `from` and each of its ancestors, stopping at `root`.
///
/// When `from` is a file the search starts in its parent directory. Directories outside of
/// `root` are never searched.
pub fn search_ancestors<F: AsRef<str>>(
  fs: &dyn FileSystem,
  filenames: &[F],
  from: &Path,
  root: &Path,
) -> AncestorSearch {
  let mut search = AncestorSearch::default();

  let start = if fs.is_file(from) {
    from.parent()
  } else {
    Some(from)
  };

  let mut dir = start;
  while let Some(current) = dir {
    if !current.starts_with(root) {
      break;
    }

    for filename in filenames {
      let candidate = current.join(filename.as_ref());
      if fs.is_file(&candidate) {
        search.found = Some(candidate);
        return search;
      }

      search.checked.push(candidate);
    }

    if current == root {
      break;
    }

    dir = current.parent();
  }

  search
}

/// Find the closest ancestor file matching one of `filenames`, see [`search_ancestors`]
pub fn find_ancestor_file<F: AsRef<str>>(
  fs: &dyn FileSystem,
  filenames: &[F],
  from: &Path,
  root: &Path,
) -> Option<PathBuf> {
  search_ancestors(fs, filenames, from, root).found
}
