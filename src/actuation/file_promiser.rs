//! `LocateFilePromiserGroup` (§4.H): expand a file promiser containing
//! regex path components against the filesystem, one component at a time.
//! Non-regex components are joined verbatim (so a path that doesn't exist
//! yet can still be the target of a `create=true` promise).

use crate::expr::regex_engine::CompiledRegex;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File-promiser expansion errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Regex(#[from] crate::expr::Error),

    #[error("I/O error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::Resource
    }
}

const REGEX_METACHARS: &[char] = &['*', '?', '[', ']', '(', ')', '+', '{', '}', '^', '$', '|', '\\'];

fn is_regex_component(component: &str) -> bool {
    component.chars().any(|c| REGEX_METACHARS.contains(&c))
}

/// Walk `wildpath` one path component at a time, expanding regex
/// components against the filesystem and invoking `visit` once per
/// concrete match. Non-regex components are joined verbatim.
///
/// Edge cases (§4.H):
/// - a component matching zero directory entries still invokes `visit`
///   once on the *original, unexpanded* `wildpath` if `create` is set;
/// - an intermediate component (not the last) that matches a non-directory
///   entry is skipped rather than descended into;
/// - a directory owned by another unprivileged user is not descended into
///   (logged as a warning), matching the source's refusal to traverse
///   other users' directories without flagging it.
pub fn locate_file_promiser_group(
    wildpath: &Path,
    create: bool,
    mut visit: impl FnMut(&Path),
) -> Result<(), Error> {
    let components: Vec<std::path::Component> = wildpath.components().collect();
    let mut results = Vec::new();
    expand(PathBuf::new(), &components, 0, &mut results)?;

    if results.is_empty() {
        if create {
            visit(wildpath);
        }
        return Ok(());
    }
    for path in &results {
        visit(path);
    }
    Ok(())
}

fn expand(
    base: PathBuf,
    components: &[std::path::Component],
    idx: usize,
    out: &mut Vec<PathBuf>,
) -> Result<(), Error> {
    if idx == components.len() {
        out.push(base);
        return Ok(());
    }

    let component = components[idx];
    let is_last = idx + 1 == components.len();
    let component_str = component.as_os_str().to_string_lossy();

    if !is_regex_component(&component_str) {
        return expand(base.join(component), components, idx + 1, out);
    }

    if !base.is_dir() {
        return Ok(());
    }
    if owned_by_other_unprivileged_user(&base) {
        tracing::warn!(dir = %base.display(), "refusing to descend into directory owned by another unprivileged user");
        return Ok(());
    }

    let regex = CompiledRegex::compile(&component_str)?;
    let mut entries: Vec<_> = std::fs::read_dir(&base)
        .map_err(|e| Error::Io { path: base.clone(), source: e })?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if !regex.full_match(&name_str) {
            continue;
        }
        let path = entry.path();
        if !is_last && !path.is_dir() {
            continue;
        }
        expand(path, components, idx + 1, out)?;
    }
    Ok(())
}

#[cfg(unix)]
fn owned_by_other_unprivileged_user(dir: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let Ok(meta) = std::fs::metadata(dir) else { return false };
    // SAFETY: `geteuid` takes no arguments and cannot fail.
    let euid = unsafe { libc::geteuid() };
    euid != 0 && meta.uid() != euid
}

#[cfg(not(unix))]
fn owned_by_other_unprivileged_user(_dir: &Path) -> bool {
    false
}
