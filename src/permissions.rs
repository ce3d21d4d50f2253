//! The flat `user:rights` permission table (spec.md §6).

use std::collections::HashMap;
use std::path::Path;

use crate::error::PermissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rights {
    Read,
    ReadWrite,
}

impl Rights {
    fn parse(token: &str) -> Result<Self, PermissionError> {
        match token {
            "r" => Ok(Rights::Read),
            "rw" => Ok(Rights::ReadWrite),
            other => Err(PermissionError::InvalidRights(other.to_string())),
        }
    }

    fn as_token(self) -> &'static str {
        match self {
            Rights::Read => "r",
            Rights::ReadWrite => "rw",
        }
    }

    pub fn can_write(self) -> bool {
        matches!(self, Rights::ReadWrite)
    }
}

#[derive(Debug, Default)]
pub struct PermissionTable {
    entries: HashMap<String, Rights>,
}

impl PermissionTable {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let mut entries = HashMap::new();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    if let Some((user, rights)) = line.split_once(':') {
                        if let Ok(rights) = Rights::parse(rights) {
                            entries.insert(user.to_string(), rights);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Err(e) => return Err(e),
        }
        Ok(PermissionTable { entries })
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = String::new();
        for (user, rights) in &self.entries {
            contents.push_str(&format!("{user}:{}\n", rights.as_token()));
        }
        std::fs::write(path, contents)
    }

    pub fn get(&self, user: &str) -> Option<Rights> {
        self.entries.get(user).copied()
    }

    pub fn list(&self) -> Vec<(String, Rights)> {
        let mut out: Vec<_> = self.entries.iter().map(|(u, r)| (u.clone(), *r)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// `+rw`/`+r`/`-rw`/`-r` style grant/revoke, per spec.md §6's `-P` mode.
    /// A `+r` grant never downgrades an existing `rw` entry.
    pub fn manage(&mut self, user: &str, spec: &str) -> Result<(), PermissionError> {
        let (sign, rights_token) = spec.split_at(1);
        let rights = Rights::parse(rights_token)?;
        match sign {
            "+" => {
                let should_set = match self.entries.get(user) {
                    Some(Rights::ReadWrite) => rights == Rights::ReadWrite,
                    _ => true,
                };
                if should_set {
                    self.entries.insert(user.to_string(), rights);
                }
            }
            "-" => {
                self.entries.remove(user);
            }
            _ => return Err(PermissionError::InvalidRights(spec.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_yields_empty_table_and_creates_parent_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/permissions");
        let table = PermissionTable::load(&path).unwrap();
        assert!(table.list().is_empty());
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn grant_rw_then_r_does_not_downgrade() {
        let mut table = PermissionTable::default();
        table.manage("alice", "+rw").unwrap();
        table.manage("alice", "+r").unwrap();
        assert_eq!(table.get("alice"), Some(Rights::ReadWrite));
    }

    #[test]
    fn revoke_removes_entry() {
        let mut table = PermissionTable::default();
        table.manage("alice", "+rw").unwrap();
        table.manage("alice", "-rw").unwrap();
        assert_eq!(table.get("alice"), None);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("permissions");
        let mut table = PermissionTable::default();
        table.manage("alice", "+rw").unwrap();
        table.manage("bob", "+r").unwrap();
        table.save(&path).unwrap();
        let reloaded = PermissionTable::load(&path).unwrap();
        assert_eq!(reloaded.get("alice"), Some(Rights::ReadWrite));
        assert_eq!(reloaded.get("bob"), Some(Rights::Read));
    }
}
