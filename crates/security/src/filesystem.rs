//! Mount validation and filesystem access rules

use std::path::{Component, Path, PathBuf};

use sandcheck_errors::AssessmentError;
use sandcheck_runtime::TmpfsMount;
use sandcheck_types::FilesystemAccess;

/// Container paths that may never be mounted over or made writable
pub const SENSITIVE_CONTAINER_PATHS: &[&str] = &["/etc", "/usr", "/bin", "/sbin", "/root"];

/// Whether `path` is one of, or lies under, the sensitive system paths.
#[must_use]
pub fn is_sensitive_container_path(path: &Path) -> bool {
    let normalized = normalize(path);
    SENSITIVE_CONTAINER_PATHS
        .iter()
        .any(|sensitive| normalized.starts_with(sensitive))
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Check a mount target inside the container.
///
/// # Errors
///
/// Returns a filesystem security violation for relative paths, traversal
/// and sensitive system locations.
pub fn validate_container_path(path: &Path) -> Result<(), AssessmentError> {
    let violation = |reason: &str| {
        AssessmentError::filesystem_violation(format!(
            "container path {} {reason}",
            path.display()
        ))
        .with_context("containerPath", path.display().to_string())
    };
    if !path.is_absolute() {
        return Err(violation("is not absolute"));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(violation("contains parent traversal"));
    }
    if is_sensitive_container_path(path) {
        return Err(violation("targets a protected system directory"));
    }
    Ok(())
}

/// Check the read-only/writable partition.
///
/// # Errors
///
/// Returns a configuration error when a path is in both sets and a
/// filesystem violation when a writable mount targets a sensitive path.
pub fn validate_filesystem_access(access: &FilesystemAccess) -> Result<(), AssessmentError> {
    if let Some(both) = access
        .writable_mounts
        .iter()
        .find(|p| access.read_only_mounts.contains(*p))
    {
        return Err(AssessmentError::configuration(format!(
            "{} is both read-only and writable",
            both.display()
        ))
        .with_context("field", "filesystemAccess"));
    }
    for writable in &access.writable_mounts {
        if !writable.is_absolute() || is_sensitive_container_path(writable) {
            return Err(AssessmentError::filesystem_violation(format!(
                "writable mount {} is not allowed",
                writable.display()
            ))
            .with_context("containerPath", writable.display().to_string()));
        }
    }
    Ok(())
}

/// Tmpfs mounts for an otherwise read-only root: `/tmp` plus every
/// writable mount, all `noexec,nosuid`.
#[must_use]
pub fn default_tmpfs(access: &FilesystemAccess, size: &str) -> Vec<TmpfsMount> {
    let mut mounts = vec![TmpfsMount {
        path: PathBuf::from("/tmp"),
        options: format!("rw,noexec,nosuid,nodev,size={size}"),
    }];
    for writable in &access.writable_mounts {
        if writable != Path::new("/tmp") {
            mounts.push(TmpfsMount {
                path: writable.clone(),
                options: format!("rw,noexec,nosuid,nodev,size={size}"),
            });
        }
    }
    mounts
}

fn outside_roots(source: &Path) -> AssessmentError {
    AssessmentError::filesystem_violation(format!(
        "mount source {} is outside the allowed roots",
        source.display()
    ))
    .with_context("sourcePath", source.display().to_string())
}

/// Resolve a host mount source and require it to sit under one of `roots`,
/// both lexically and after following symlinks.
///
/// # Errors
///
/// Returns a filesystem security violation when the source escapes the
/// roots, and a validation error when it does not exist.
pub fn resolve_mount_source(source: &Path, roots: &[PathBuf]) -> Result<PathBuf, AssessmentError> {
    let absolute = if source.is_absolute() {
        source.to_path_buf()
    } else {
        std::env::current_dir()?.join(source)
    };
    let lexical = normalize(&absolute);
    let lexical_roots: Vec<PathBuf> = roots.iter().map(|r| normalize(r)).collect();
    if !lexical_roots.iter().any(|root| lexical.starts_with(root)) {
        return Err(outside_roots(source));
    }

    let canonical = lexical.canonicalize().map_err(|e| {
        AssessmentError::validation(format!(
            "mount source {} cannot be resolved",
            source.display()
        ))
        .with_context("sourcePath", source.display().to_string())
        .with_cause(e)
    })?;
    let canonical_roots: Vec<PathBuf> = roots.iter().filter_map(|r| r.canonicalize().ok()).collect();
    if !canonical_roots.iter().any(|root| canonical.starts_with(root)) {
        return Err(outside_roots(source));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcheck_errors::ErrorFamily;
    use std::collections::BTreeSet;

    #[test]
    fn sensitive_paths_are_component_prefixes() {
        assert!(is_sensitive_container_path(Path::new("/etc")));
        assert!(is_sensitive_container_path(Path::new("/usr/local/bin")));
        assert!(is_sensitive_container_path(Path::new("/workspace/../etc")));
        assert!(!is_sensitive_container_path(Path::new("/etcetera")));
        assert!(!is_sensitive_container_path(Path::new("/workspace")));
    }

    #[test]
    fn container_paths_are_checked() {
        validate_container_path(Path::new("/workspace/src")).unwrap();
        for bad in ["relative", "/workspace/../etc", "/root/.ssh", "/bin"] {
            let err = validate_container_path(Path::new(bad)).unwrap_err();
            assert!(err.is_security_violation(), "{bad}");
        }
    }

    #[test]
    fn partition_must_be_disjoint() {
        let both = FilesystemAccess {
            read_only_mounts: BTreeSet::from([PathBuf::from("/data")]),
            writable_mounts: BTreeSet::from([PathBuf::from("/data")]),
        };
        assert_eq!(
            validate_filesystem_access(&both).unwrap_err().family(),
            ErrorFamily::Configuration
        );

        let sensitive = FilesystemAccess {
            read_only_mounts: BTreeSet::new(),
            writable_mounts: BTreeSet::from([PathBuf::from("/usr/lib")]),
        };
        assert!(validate_filesystem_access(&sensitive)
            .unwrap_err()
            .is_security_violation());
    }

    #[test]
    fn tmpfs_is_noexec() {
        let access = FilesystemAccess {
            read_only_mounts: BTreeSet::new(),
            writable_mounts: BTreeSet::from([PathBuf::from("/workspace/out")]),
        };
        let mounts = default_tmpfs(&access, "64m");
        assert_eq!(mounts.len(), 2);
        assert!(mounts.iter().all(|m| m.options.contains("noexec,nosuid")));
    }

    #[test]
    fn mount_sources_must_stay_under_roots() {
        let root = tempfile::tempdir().unwrap();
        let inner = root.path().join("project");
        std::fs::create_dir(&inner).unwrap();
        let roots = vec![root.path().to_path_buf()];

        assert!(resolve_mount_source(&inner, &roots).is_ok());
        let escape = inner.join("../../..");
        assert!(resolve_mount_source(&escape, &roots).unwrap_err().is_security_violation());
        let missing = root.path().join("missing");
        assert_eq!(
            resolve_mount_source(&missing, &roots).unwrap_err().family(),
            ErrorFamily::Validation
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_caught() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = root.path().join("link");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        let err = resolve_mount_source(&link, &[root.path().to_path_buf()]).unwrap_err();
        assert!(err.is_security_violation());
    }
}
