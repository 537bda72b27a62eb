//! Discovery of the snapshot governing a directory
//!
//! A directory is governed by the closest state file found in it or in one
//! of its ancestors, the same way version control tools find their
//! repository.

use crate::error::{HashsnapError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Find the state file named `state_name` governing `dir`
///
/// Looks in `dir` first, then in each ancestor up to the filesystem root.
///
/// # Arguments
///
/// * `dir` - Absolute directory to start from
/// * `state_name` - File name of the state file, usually `.hsnap`
///
/// # Returns
///
/// Path of the closest state file, or `None` if no ancestor has one.
///
/// # Errors
///
/// - [`HashsnapError::RootNotAbsolute`] if `dir` is relative
/// - [`HashsnapError::Io`] if a candidate cannot be inspected for any
///   reason other than not existing
///
/// # Example
///
/// ```rust,no_run
/// use hashsnap::locator::lookup_from;
/// use std::path::Path;
///
/// # fn main() -> hashsnap::Result<()> {
/// match lookup_from(Path::new("/home/me/photos/2024"), ".hsnap")? {
///     Some(state) => println!("governed by {}", state.display()),
///     None => println!("no snapshot yet"),
/// }
/// # Ok(())
/// # }
/// ```
pub fn lookup_from(dir: &Path, state_name: &str) -> Result<Option<PathBuf>> {
    if !dir.is_absolute() {
        return Err(HashsnapError::RootNotAbsolute(dir.to_path_buf()));
    }

    for candidate_dir in dir.ancestors() {
        let candidate = candidate_dir.join(state_name);
        trace!("Looking for state file at {:?}", candidate);
        match fs::metadata(&candidate) {
            Ok(_) => return Ok(Some(candidate)),
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
