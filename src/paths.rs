//! Path translation between the caller's file system and the one PHPUnit runs in.
//!
//! With no mappings every operation is the identity. Mappings are tried in order and the first whose prefix matches
//! wins. A prefix only matches at a path boundary: `/app` matches `/app` and `/app/tests`, not `/application`.

use crate::config::PathMapping;

const SEPARATORS: [char; 2] = ['/', '\\'];

/// Translates paths between local and remote addressing and expands `${...}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct PathReplacer {
    cwd: String,
    workspace_folder: String,
    mappings: Vec<PathMapping>,
}

impl PathReplacer {
    /// `mappings` may reference placeholders; they are expanded once here.
    pub fn new(cwd: impl Into<String>, workspace_folder: Option<String>, mappings: &[PathMapping]) -> Self {
        let cwd = cwd.into();
        let workspace_folder = workspace_folder.unwrap_or_else(|| cwd.clone());
        let mut replacer = Self {
            cwd,
            workspace_folder,
            mappings: Vec::new(),
        };
        replacer.mappings = mappings
            .iter()
            .map(|m| PathMapping::new(replacer.replace_path_variables(&m.local), replacer.replace_path_variables(&m.remote)))
            .collect();
        replacer
    }

    /// Expand `${PWD}`, `${cwd}` and `${workspaceFolder}`.
    pub fn replace_path_variables(&self, input: &str) -> String {
        if !input.contains("${") {
            return input.to_string();
        }
        input
            .replace("${PWD}", &self.cwd)
            .replace("${cwd}", &self.cwd)
            .replace("${workspaceFolder}", &self.workspace_folder)
    }

    /// Local → remote. Placeholders are expanded first.
    pub fn to_remote(&self, path: &str) -> String {
        let path = self.replace_path_variables(path);
        for mapping in &self.mappings {
            if let Some(rest) = strip_path_prefix(&path, &mapping.local) {
                let rest = if mapping.local.contains('\\') {
                    rest.replace('\\', "/")
                } else {
                    rest.to_string()
                };
                return join(&mapping.remote, &rest);
            }
        }
        path
    }

    /// Remote → local.
    pub fn to_local(&self, path: &str) -> String {
        for mapping in &self.mappings {
            if let Some(rest) = strip_path_prefix(path, &mapping.remote) {
                let rest = if mapping.local.contains('\\') {
                    rest.replace('/', "\\")
                } else {
                    rest.to_string()
                };
                return join(&mapping.local, &rest);
            }
        }
        path.to_string()
    }
}

/// Remainder of `path` after `prefix`, if `prefix` ends at a separator or at the end of `path`.
fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(prefix.trim_end_matches(SEPARATORS))?;
    (rest.is_empty() || rest.starts_with(SEPARATORS)).then_some(rest)
}

fn join(base: &str, rest: &str) -> String {
    let trimmed = base.trim_end_matches(SEPARATORS);
    if rest.is_empty() {
        return if trimmed.is_empty() { base.to_string() } else { trimmed.to_string() };
    }
    format!("{trimmed}{rest}")
}
