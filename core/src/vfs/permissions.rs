//! Permission Management
//!
//! An access is granted only when the operating system allows it and the
//! configured rules do not forbid it. Rules are regular expressions over the
//! root-relative path (`/docs/a.txt`); the first rule that matches and sets a
//! value for the requested access decides, otherwise the defaults apply.

use crate::error::{ConnectorError, ConnectorResult};
use elfport_shared::{AccessDefaults, PermRule};
use regex::Regex;
use std::path::Path;

/// File access types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    /// Remove or rename the entry itself
    Remove,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Remove => "rm",
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Regex,
    read: Option<bool>,
    write: Option<bool>,
    rm: Option<bool>,
}

impl CompiledRule {
    fn get(&self, access: Access) -> Option<bool> {
        match access {
            Access::Read => self.read,
            Access::Write => self.write,
            Access::Remove => self.rm,
        }
    }
}

/// Permission manager
#[derive(Debug, Clone)]
pub struct PermissionManager {
    rules: Vec<CompiledRule>,
    defaults: AccessDefaults,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            defaults: AccessDefaults::default(),
        }
    }

    /// Build from configuration, failing on the first invalid pattern
    pub fn from_config(defaults: AccessDefaults, rules: &[PermRule]) -> ConnectorResult<Self> {
        let mut manager = Self {
            rules: Vec::with_capacity(rules.len()),
            defaults,
        };
        for rule in rules {
            manager.add_rule(&rule.pattern, rule.read, rule.write, rule.rm)?;
        }
        Ok(manager)
    }

    pub fn add_rule(
        &mut self,
        pattern: &str,
        read: Option<bool>,
        write: Option<bool>,
        rm: Option<bool>,
    ) -> ConnectorResult<()> {
        let pattern = Regex::new(pattern).map_err(|e| {
            ConnectorError::Internal(format!("Invalid permission pattern {}: {}", pattern, e))
        })?;
        self.rules.push(CompiledRule {
            pattern,
            read,
            write,
            rm,
        });
        Ok(())
    }

    /// Check an access against both the OS and the configured rules
    pub fn is_allowed(&self, path: &Path, rel: &str, access: Access) -> bool {
        self.rule_allows(rel, access) && os_allows(path, access)
    }

    /// Check an access against the configured rules only
    pub fn rule_allows(&self, rel: &str, access: Access) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(rel))
            .find_map(|rule| rule.get(access))
            .unwrap_or(match access {
                Access::Read => self.defaults.read,
                Access::Write => self.defaults.write,
                Access::Remove => self.defaults.rm,
            })
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Removing an entry needs write access on its parent directory
#[cfg(unix)]
fn os_allows(path: &Path, access: Access) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let (target, mode) = match access {
        Access::Read => (path, libc::R_OK),
        Access::Write => (path, libc::W_OK),
        Access::Remove => match path.parent() {
            Some(parent) => (parent, libc::W_OK | libc::X_OK),
            None => return false,
        },
    };

    let c_path = match CString::new(target.as_os_str().as_bytes()) {
        Ok(c_path) => c_path,
        Err(_) => return false,
    };

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(not(unix))]
fn os_allows(path: &Path, access: Access) -> bool {
    let target = match access {
        Access::Remove => match path.parent() {
            Some(parent) => parent,
            None => return false,
        },
        _ => path,
    };
    match std::fs::metadata(target) {
        Ok(meta) => access == Access::Read || !meta.permissions().readonly(),
        Err(_) => false,
    }
}
