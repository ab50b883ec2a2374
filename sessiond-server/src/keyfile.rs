//! Keyfile reader/writer
//!
//! The session file is a plain text format: `[Group]` headers followed
//! by `Key=Value` lines. List values are comma-separated with
//! backslash escaping. Unknown groups and keys are carried through a
//! read/write cycle untouched, which keeps the file forward
//! compatible.

use std::path::Path;

use sessiond_utils::{Result, SessiondError};

/// An in-memory keyfile: ordered groups of ordered key/value entries
#[derive(Debug, Clone, Default)]
pub struct KeyFile {
    groups: Vec<Group>,
}

#[derive(Debug, Clone)]
struct Group {
    name: String,
    entries: Vec<(String, String)>,
}

impl KeyFile {
    /// Create an empty keyfile
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a keyfile from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SessiondError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::parse(&content))
    }

    /// Parse keyfile text
    ///
    /// Lines before the first group header and malformed lines are
    /// skipped.
    pub fn parse(content: &str) -> Self {
        let mut file = Self::new();
        let mut current: Option<usize> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                file.groups.push(Group {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                current = Some(file.groups.len() - 1);
                continue;
            }

            if let (Some(idx), Some((key, value))) = (current, line.split_once('=')) {
                file.groups[idx]
                    .entries
                    .push((key.trim().to_string(), value.to_string()));
            }
        }

        file
    }

    /// Serialize back to keyfile text
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&group.name);
            out.push_str("]\n");
            for (key, value) in &group.entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    /// Write the keyfile to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessiondError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, self.to_text()).map_err(|e| SessiondError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Names of all groups, in file order
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    /// Remove a group and all its entries
    pub fn delete_group(&mut self, name: &str) {
        self.groups.retain(|g| g.name != name);
    }

    fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn group_mut(&mut self, name: &str) -> &mut Group {
        if let Some(idx) = self.groups.iter().position(|g| g.name == name) {
            &mut self.groups[idx]
        } else {
            self.groups.push(Group {
                name: name.to_string(),
                entries: Vec::new(),
            });
            self.groups.last_mut().unwrap()
        }
    }

    /// Raw string entry
    pub fn get(&self, group: &str, key: &str) -> Option<&str> {
        self.group(group)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, group: &str, key: &str) -> Option<i64> {
        self.get(group, key)?.trim().parse().ok()
    }

    pub fn get_bool(&self, group: &str, key: &str) -> Option<bool> {
        match self.get(group, key)?.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    /// Comma-separated list entry with backslash unescaping
    pub fn get_list(&self, group: &str, key: &str) -> Option<Vec<String>> {
        Some(split_list(self.get(group, key)?))
    }

    pub fn set(&mut self, group: &str, key: &str, value: &str) {
        let group = self.group_mut(group);
        if let Some(entry) = group.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            group.entries.push((key.to_string(), value.to_string()));
        }
    }

    pub fn set_int(&mut self, group: &str, key: &str, value: i64) {
        self.set(group, key, &value.to_string());
    }

    pub fn set_bool(&mut self, group: &str, key: &str, value: bool) {
        self.set(group, key, if value { "true" } else { "false" });
    }

    pub fn set_list(&mut self, group: &str, key: &str, value: &[String]) {
        let joined = value
            .iter()
            .map(|item| escape_item(item))
            .collect::<Vec<_>>()
            .join(",");
        self.set(group, key, &joined);
    }
}

fn escape_item(item: &str) -> String {
    let mut out = String::with_capacity(item.len());
    for c in item.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some(other) => current.push(other),
                None => current.push('\\'),
            },
            ',' => {
                items.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if !value.is_empty() {
        items.push(current);
    }

    items
}
