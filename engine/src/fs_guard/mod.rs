use sdk::errors::EngineError;
use std::path::{Path, PathBuf};

/// FileSystemGuard confines every file access made on behalf of the model or
/// a context loader to the workspace checkout.
///
/// It maintains a deny list of sensitive paths and performs double
/// canonicalization checks so that symlinks cannot be used to escape.
///
/// # Validation Gates
///
/// 1. Check deny list before canonicalization
/// 2. Canonicalize path to resolve symlinks and .. patterns
/// 3. Check deny list after canonicalization
/// 4. Verify path is within workspace
#[derive(Debug, Clone)]
pub struct FileSystemGuard {
    workspace: PathBuf,
    deny_list: Vec<PathBuf>,
}

impl FileSystemGuard {
    /// Creates a guard rooted at `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::WorkspaceNotInitialized` if the workspace cannot
    /// be canonicalized (it does not exist or is inaccessible). This is fatal
    /// for any session that needs file access.
    pub fn new(workspace: PathBuf) -> Result<Self, EngineError> {
        // Canonicalize workspace to handle symlinks (e.g., /var -> /private/var on macOS)
        let workspace = workspace
            .canonicalize()
            .map_err(|_| EngineError::WorkspaceNotInitialized(workspace.clone()))?;

        let deny_list = vec![
            PathBuf::from(".ssh"),
            PathBuf::from(".env"),
            PathBuf::from(".git/config"),
            PathBuf::from(".aws/credentials"),
            PathBuf::from(".config/gcloud"),
            PathBuf::from("id_rsa"),
            PathBuf::from("id_ed25519"),
            PathBuf::from(".gnupg"),
            PathBuf::from("credentials"),
            PathBuf::from(".npmrc"),
            PathBuf::from(".pypirc"),
        ];

        Ok(Self {
            workspace,
            deny_list,
        })
    }

    /// Resolve a user-supplied path against the workspace and validate it.
    ///
    /// Relative paths are joined onto the workspace root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EngineError> {
        self.validate_path(&self.absolute(path))
    }

    /// Join a relative path onto the workspace without touching the disk.
    pub fn absolute(&self, path: &str) -> PathBuf {
        let target = Path::new(path);
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.workspace.join(target)
        }
    }

    /// Validates an existing path through the four gates.
    ///
    /// # Errors
    ///
    /// - `EngineError::PathDenied` if the path matches the deny list
    /// - `EngineError::NotFound` if the path cannot be canonicalized
    /// - `EngineError::PathOutsideWorkspace` if it resolves outside the workspace
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        // Gate 1
        if self.is_denied(path) {
            return Err(EngineError::PathDenied(path.to_path_buf()));
        }

        // Gate 2
        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::NotFound(format!("{}: {}", path.display(), e)))?;

        // Gate 3: catches symlink bypasses
        if self.is_denied(&canonical) {
            return Err(EngineError::PathDenied(canonical));
        }

        // Gate 4
        if !canonical.starts_with(&self.workspace) {
            return Err(EngineError::PathOutsideWorkspace(canonical));
        }

        Ok(canonical)
    }

    /// Validate a path that may not exist yet, for writes.
    ///
    /// The nearest existing ancestor must canonicalize into the workspace and
    /// no component of the requested path may be on the deny list.
    pub fn validate_new_path(&self, path: &str) -> Result<PathBuf, EngineError> {
        let abs = self.absolute(path);
        if abs.exists() {
            return self.validate_path(&abs);
        }
        if self.is_denied(&abs) {
            return Err(EngineError::PathDenied(abs));
        }
        if abs
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(EngineError::PathOutsideWorkspace(abs));
        }

        let mut ancestor = abs.parent();
        while let Some(dir) = ancestor {
            if dir.exists() {
                let canonical = self.validate_path(dir)?;
                let rest = abs.strip_prefix(dir).map_err(|_| {
                    EngineError::PathOutsideWorkspace(abs.clone())
                })?;
                return Ok(canonical.join(rest));
            }
            ancestor = dir.parent();
        }

        Err(EngineError::PathOutsideWorkspace(abs))
    }

    /// Checks if any component of `path` matches an entry in the deny list.
    fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .is_some_and(|s| denied.as_os_str().to_str() == Some(s))
                })
        })
    }

    /// Returns a reference to the workspace path.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_workspace_is_fatal() {
        let temp = TempDir::new().unwrap();
        let result = FileSystemGuard::new(temp.path().join("never-created"));
        assert!(matches!(
            result,
            Err(EngineError::WorkspaceNotInitialized(_))
        ));
    }

    #[test]
    fn test_deny_list_before_canonicalization() {
        let temp = TempDir::new().unwrap();
        let guard = FileSystemGuard::new(temp.path().to_path_buf()).unwrap();

        let result = guard.validate_path(&temp.path().join(".ssh"));
        assert!(matches!(result, Err(EngineError::PathDenied(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_deny_list_after_canonicalization() {
        let temp = TempDir::new().unwrap();
        let ssh_dir = temp.path().join(".ssh");
        fs::create_dir(&ssh_dir).unwrap();

        let guard = FileSystemGuard::new(temp.path().to_path_buf()).unwrap();
        let symlink_path = temp.path().join("safe_link");
        std::os::unix::fs::symlink(&ssh_dir, &symlink_path).unwrap();

        let result = guard.validate_path(&symlink_path);
        assert!(matches!(result, Err(EngineError::PathDenied(_))));
    }

    #[test]
    fn test_path_traversal_attempt() {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("workspace");
        fs::create_dir(&workspace).unwrap();
        fs::write(temp.path().join("secret.txt"), "secret").unwrap();

        let guard = FileSystemGuard::new(workspace).unwrap();
        let result = guard.resolve("../secret.txt");
        assert!(matches!(result, Err(EngineError::PathOutsideWorkspace(_))));
    }

    #[test]
    fn test_relative_path_resolves_into_workspace() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("prompt.md"), "hi").unwrap();

        let guard = FileSystemGuard::new(temp.path().to_path_buf()).unwrap();
        let resolved = guard.resolve("prompt.md").unwrap();
        assert_eq!(resolved, temp.path().join("prompt.md").canonicalize().unwrap());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let guard = FileSystemGuard::new(temp.path().to_path_buf()).unwrap();
        assert!(matches!(
            guard.resolve("nope.md"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_new_path_inside_workspace() {
        let temp = TempDir::new().unwrap();
        let guard = FileSystemGuard::new(temp.path().to_path_buf()).unwrap();

        let target = guard.validate_new_path("a/b/new.md").unwrap();
        assert!(target.starts_with(guard.workspace()));
        assert!(target.ends_with("a/b/new.md"));

        assert!(guard.validate_new_path("../escape.md").is_err());
        assert!(matches!(
            guard.validate_new_path("config/.env"),
            Err(EngineError::PathDenied(_))
        ));
    }
}
