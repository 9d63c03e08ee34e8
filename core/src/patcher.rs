// SPDX-License-Identifier: MIT
use anyhow::{Context, Result};
use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{error::ImageError, output::write_atomic};

/// A single substitution applied to a config file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubstitutionRule {
    /// Replace every `key=...` line by `key=value`.
    Field { key: String, value: String },
    /// Replace the value of the first `field=` line within `[section]`.
    SectionField {
        section: String,
        field: String,
        value: u32,
    },
}

impl SubstitutionRule {
    pub fn field<K: Into<String>, V: ToString>(key: K, value: V) -> Self {
        Self::Field {
            key: key.into(),
            value: value.to_string(),
        }
    }

    pub fn section_field<S: Into<String>, F: Into<String>>(section: S, field: F, value: u32) -> Self {
        Self::SectionField {
            section: section.into(),
            field: field.into(),
            value,
        }
    }

    /// Apply the rule to the given text.
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Field { key, value } => apply_field_substitution(text, key, value),
            Self::SectionField {
                section,
                field,
                value,
            } => apply_section_substitution(text, section, field, *value),
        }
    }
}

impl fmt::Display for SubstitutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { key, value } => write!(f, "{key}={value}"),
            Self::SectionField {
                section,
                field,
                value,
            } => write!(f, "[{section}] {field}={value}"),
        }
    }
}

/// Splits a line into its content and its line ending.
fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Returns the name of a `[section]` header line.
fn section_name(body: &str) -> Option<&str> {
    body.trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
}

/// Replace all lines starting with `key=` by `key=value`.
///
/// Matching is case-sensitive and anchored at the start of the line,
/// all other lines and all line endings are kept as they are.
pub fn apply_field_substitution(text: &str, key: &str, value: &str) -> String {
    let prefix = format!("{key}=");
    let mut patched = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);

        if body.starts_with(&prefix) {
            patched.push_str(&prefix);
            patched.push_str(value);
            patched.push_str(ending);
        } else {
            patched.push_str(line);
        }
    }

    patched
}

/// Replace the value of the first `field=` line within a bracketed section.
///
/// The section reaches from its `[section]` header up to the next header or
/// the end of the text. Fields of the same name in other sections are never
/// touched.
pub fn apply_section_substitution(text: &str, section: &str, field: &str, value: u32) -> String {
    let prefix = format!("{field}=");
    let mut patched = String::with_capacity(text.len());
    let mut in_section = false;
    let mut replaced = false;

    for line in text.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);

        if let Some(name) = section_name(body) {
            in_section = name == section;
            replaced = false;
            patched.push_str(line);
            continue;
        }

        let indent_len = body.len() - body.trim_start().len();
        let (indent, content) = body.split_at(indent_len);

        if in_section && !replaced && content.starts_with(&prefix) {
            patched.push_str(indent);
            patched.push_str(&prefix);
            patched.push_str(&value.to_string());
            patched.push_str(ending);
            replaced = true;
        } else {
            patched.push_str(line);
        }
    }

    patched
}

/// Text config file of the firmware tree.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigDocument {
    pub path: PathBuf,
    pub raw_text: String,
}

impl ConfigDocument {
    /// Load a config file.
    ///
    /// Returns None if the file does not exist, as firmware trees
    /// lack certain config files depending on the build variant.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.is_file() {
            return Ok(None);
        }

        let raw_text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}.", path.display()))?;

        Ok(Some(Self {
            path: path.to_path_buf(),
            raw_text,
        }))
    }

    /// Apply the rules strictly in the given order.
    pub fn apply_rules(&mut self, rules: &[SubstitutionRule]) {
        for rule in rules {
            log::debug!("  {}: {rule}", self.path.display());
            self.raw_text = rule.apply(&self.raw_text);
        }
    }

    /// Write the document back to its file.
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, |writer: &mut dyn Write| {
            Ok(writer.write_all(self.raw_text.as_bytes())?)
        })
        .with_context(|| format!("Failed to write config file {}.", self.path.display()))
    }
}

/// Patch a config file in place.
///
/// Returns false without touching anything if the file does not exist.
///
/// # Error
///
/// Returns an error variant if reading or writing an existing file fails.
pub fn patch_file<P: AsRef<Path>>(path: P, rules: &[SubstitutionRule]) -> Result<bool> {
    let mut document = match ConfigDocument::load(path.as_ref())? {
        Some(document) => document,
        None => {
            log::info!(
                "{} Skipping.",
                ImageError::ConfigFileAbsent {
                    path: path.as_ref().to_path_buf()
                }
            );
            return Ok(false);
        }
    };

    log::info!("Updating {}.", path.as_ref().display());

    let original = document.raw_text.clone();
    document.apply_rules(rules);

    if document.raw_text != original {
        document.save()?;
    }

    Ok(true)
}
