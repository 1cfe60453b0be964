//! Rewriting of source paths between the editor's machine and the debugger's

/// Maps paths under a local root onto a remote root and back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    local_root: String,
    remote_root: String,
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn replace_prefix(path: &str, from: &str, to: &str) -> Option<String> {
    let rest = path.strip_prefix(from)?;
    // Only whole path components match: "/src" must not map "/srcs/x"
    if !rest.is_empty() && !rest.starts_with('/') && !from.ends_with('/') {
        return None;
    }
    Some(format!("{to}{rest}"))
}

impl PathMapper {
    pub fn new(local_root: &str, remote_root: &str) -> Self {
        Self {
            local_root: normalize(local_root),
            remote_root: normalize(remote_root),
        }
    }

    /// Path the debugger should use for a local `path`
    pub fn to_remote(&self, path: &str) -> String {
        let path = normalize(path);
        replace_prefix(&path, &self.local_root, &self.remote_root).unwrap_or(path)
    }

    /// Path the editor should use for a debugger `path`
    pub fn to_local(&self, path: &str) -> String {
        let path = normalize(path);
        replace_prefix(&path, &self.remote_root, &self.local_root).unwrap_or(path)
    }
}
