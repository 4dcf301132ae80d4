//! Path containment
//!
//! Every filesystem path handed to the tool executor runs through
//! [`contain`]: home expansion, joining relative paths onto the executor's
//! working directory, canonicalisation (symlinks and `..` resolved), then a
//! prefix check against the canonicalised allowed directories. An empty
//! allowed list means "nothing outside the working directory".

use std::path::{Component, Path, PathBuf};

/// Rejection message, matched verbatim by callers and tests.
pub const NOT_ALLOWED: &str = "not in allowed directories";

/// Resolve and validate a path that must already exist.
///
/// Containment is judged before existence: a path outside the sandbox is
/// rejected as such whether or not anything lives there.
pub fn contain(path: &str, working_dir: &Path, allowed: &[PathBuf]) -> Result<PathBuf, String> {
    let resolved = resolve(path, working_dir);
    match resolved.canonicalize() {
        Ok(canonical) => {
            check_prefix(&canonical, working_dir, allowed)?;
            Ok(canonical)
        }
        Err(_) => {
            contain_new(path, working_dir, allowed)?;
            Err("file does not exist".to_string())
        }
    }
}

/// Resolve and validate a path that may not exist yet (write targets).
///
/// The nearest existing ancestor is canonicalised and checked; the
/// remaining components are re-appended after rejecting any `..`
/// traversal, so a not-yet-created file cannot smuggle the final path out
/// of the sandbox.
pub fn contain_new(path: &str, working_dir: &Path, allowed: &[PathBuf]) -> Result<PathBuf, String> {
    let resolved = resolve(path, working_dir);

    if resolved.exists() {
        let canonical = resolved
            .canonicalize()
            .map_err(|e| format!("cannot resolve path: {e}"))?;
        check_prefix(&canonical, working_dir, allowed)?;
        return Ok(canonical);
    }

    for component in resolved.components() {
        if matches!(component, Component::ParentDir) {
            return Err(NOT_ALLOWED.to_string());
        }
    }

    let mut check = resolved.clone();
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();
    while !check.exists() {
        if let Some(name) = check.file_name() {
            suffix.push(name.to_owned());
        }
        if !check.pop() {
            break;
        }
    }

    let canonical_base = if check.as_os_str().is_empty() || !check.exists() {
        working_dir.to_path_buf()
    } else {
        check
            .canonicalize()
            .map_err(|e| format!("cannot resolve path: {e}"))?
    };
    check_prefix(&canonical_base, working_dir, allowed)?;

    let mut final_path = canonical_base;
    for component in suffix.into_iter().rev() {
        final_path.push(component);
    }
    Ok(final_path)
}

fn resolve(path: &str, working_dir: &Path) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        working_dir.join(expanded)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn check_prefix(canonical: &Path, working_dir: &Path, allowed: &[PathBuf]) -> Result<(), String> {
    // The allowed list is canonicalised on every check so that directories
    // created after startup still resolve; a configured directory that does
    // not exist cannot grant access.
    let mut roots: Vec<PathBuf> = allowed
        .iter()
        .filter_map(|dir| dir.canonicalize().ok())
        .collect();
    if roots.is_empty() {
        roots = working_dir.canonicalize().into_iter().collect();
    }

    if roots.iter().any(|root| canonical.starts_with(root)) {
        Ok(())
    } else {
        Err(NOT_ALLOWED.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, Vec<PathBuf>) {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("a.txt"), "hello").unwrap();
        let allowed = vec![work.clone()];
        (tmp, work, allowed)
    }

    #[test]
    fn allows_file_inside_sandbox() {
        let (_tmp, work, allowed) = setup();
        let path = contain("a.txt", &work, &allowed).unwrap();
        assert!(path.ends_with("a.txt"));
    }

    #[test]
    fn rejects_traversal_out_of_sandbox() {
        let (_tmp, work, allowed) = setup();
        let err = contain("../../etc/passwd", &work, &allowed).unwrap_err();
        assert_eq!(err, NOT_ALLOWED);

        std::fs::write(work.parent().unwrap().join("secret.txt"), "x").unwrap();
        let err = contain("../secret.txt", &work, &allowed).unwrap_err();
        assert_eq!(err, NOT_ALLOWED);
    }

    #[test]
    fn rejects_absolute_path_outside_even_when_missing() {
        let (_tmp, work, allowed) = setup();
        assert_eq!(
            contain("/etc/hostname", &work, &allowed).unwrap_err(),
            NOT_ALLOWED
        );
        assert_eq!(
            contain("/nonexistent/nowhere.txt", &work, &allowed).unwrap_err(),
            NOT_ALLOWED
        );
    }

    #[test]
    fn missing_file_inside_sandbox_reports_absence() {
        let (_tmp, work, allowed) = setup();
        let err = contain("missing.txt", &work, &allowed).unwrap_err();
        assert_eq!(err, "file does not exist");
    }

    #[test]
    fn empty_allowed_list_means_cwd_only() {
        let (_tmp, work, _) = setup();
        assert!(contain("a.txt", &work, &[]).is_ok());

        let outside = work.parent().unwrap().join("outside.txt");
        std::fs::write(&outside, "x").unwrap();
        let err = contain(outside.to_str().unwrap(), &work, &[]).unwrap_err();
        assert_eq!(err, NOT_ALLOWED);
    }

    #[test]
    fn new_path_in_sandbox_is_allowed() {
        let (_tmp, work, allowed) = setup();
        let path = contain_new("sub/dir/new.txt", &work, &allowed).unwrap();
        assert!(path.starts_with(&work));
    }

    #[test]
    fn new_path_with_traversal_is_rejected() {
        let (_tmp, work, allowed) = setup();
        let err = contain_new("sub/../../escape.txt", &work, &allowed).unwrap_err();
        assert_eq!(err, NOT_ALLOWED);
    }

    #[test]
    fn symlink_escape_is_rejected() {
        #[cfg(unix)]
        {
            let (tmp, work, allowed) = setup();
            let outside = tmp.path().join("outside");
            std::fs::create_dir_all(&outside).unwrap();
            std::fs::write(outside.join("data.txt"), "x").unwrap();
            std::os::unix::fs::symlink(&outside, work.join("link")).unwrap();

            let err = contain("link/data.txt", &work, &allowed).unwrap_err();
            assert_eq!(err, NOT_ALLOWED);
        }
    }
}
