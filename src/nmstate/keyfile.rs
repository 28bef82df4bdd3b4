//! NetworkManager keyfile (INI) handling.
//!
//! Only what the compiler output needs: `[section]` headers, `key=value` entries and full-line
//! `#`/`;` comments. A `#` inside a value is part of the value.

use crate::error::PipelineError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    /// `None` holds entries that appear before the first header.
    name: Option<String>,
    entries: Vec<(String, String)>,
}

impl Section {
    fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyfile {
    sections: Vec<Section>,
}

impl Keyfile {
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let mut keyfile = Keyfile::default();
        let mut current: Option<usize> = None;
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = Some(keyfile.section_index(Some(name.trim())));
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(PipelineError::Serialization(format!(
                    "keyfile line {} is neither a section nor a key: {raw:?}",
                    number + 1
                )));
            };
            let index = match current {
                Some(index) => index,
                None => keyfile.section_index(None),
            };
            keyfile.sections[index].set(key.trim(), value.trim());
        }
        Ok(keyfile)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name.as_deref() == Some(section))
            .and_then(|s| s.entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    /// Set `key` in `section`, replacing an existing value in place. A missing section is
    /// appended.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let index = self.section_index(Some(section));
        self.sections[index].set(key, value);
    }

    pub fn render(&self) -> String {
        let mut blocks = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            if section.name.is_none() && section.entries.is_empty() {
                continue;
            }
            let mut block = String::new();
            if let Some(name) = &section.name {
                block.push_str(&format!("[{name}]\n"));
            }
            for (key, value) in &section.entries {
                block.push_str(&format!("{key}={value}\n"));
            }
            blocks.push(block);
        }
        blocks.join("\n")
    }

    fn section_index(&mut self, name: Option<&str>) -> usize {
        if let Some(index) = self
            .sections
            .iter()
            .position(|s| s.name.as_deref() == name)
        {
            return index;
        }
        // Header-less entries always render first.
        let section = Section {
            name: name.map(str::to_string),
            entries: Vec::new(),
        };
        if name.is_none() {
            self.sections.insert(0, section);
            0
        } else {
            self.sections.push(section);
            self.sections.len() - 1
        }
    }
}

/// Canonical form of a compiled connection profile: comments dropped, unpadded `key=value`
/// lines, and the connection forced to come up on its own.
pub fn canonicalize(text: &str) -> Result<String, PipelineError> {
    let mut keyfile = Keyfile::parse(text)?;
    keyfile.set("connection", "autoconnect", "true");
    keyfile.set("connection", "autoconnect-priority", "1");
    Ok(keyfile.render())
}
