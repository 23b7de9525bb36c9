//! Confinement of user-supplied paths to a single root directory.
//!
//! Paths are normalized lexically: repeated and trailing separators are
//! collapsed, `.` is dropped and `..` pops the previous segment. A `..` with
//! nothing left to pop is rejected outright, and the result must then sit at
//! or below the root, so `/workspace-evil` never passes for `/workspace`.

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGuard {
    root: String,
}

impl PathGuard {
    pub fn new(root: impl AsRef<str>) -> Self {
        let root = normalize(root.as_ref()).unwrap_or_else(|| "/".to_string());
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_path_safe(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Normalized absolute form of `path`, or `None` if it leaves the root.
    /// Relative paths are taken relative to the root.
    pub fn resolve(&self, path: &str) -> Option<String> {
        if path.is_empty() || path.contains('\0') {
            return None;
        }
        let absolute = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.root, path)
        };
        let normalized = normalize(&absolute)?;
        self.contains(&normalized).then_some(normalized)
    }

    /// Like [`resolve`](Self::resolve), but as a client error naming the root.
    pub fn check(&self, path: &str) -> Result<String, GatewayError> {
        self.resolve(path).ok_or_else(|| {
            GatewayError::validation(format!("Path is outside {}", self.root))
                .with_context("path", path)
                .with_context("root", self.root.as_str())
        })
    }

    fn contains(&self, path: &str) -> bool {
        self.root == "/"
            || path == self.root
            || path
                .strip_prefix(self.root.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn normalize(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(format!("/{}", segments.join("/")))
}
