//! INI-style configuration reader and writer.
//!
//! Group order, item order, and comments survive a parse/serialise round
//! trip. Typed reads go through [`Keyfile::get_value`] and
//! [`Keyfile::get_list_value`], which enforce the [`Priority`] policy;
//! the line parser itself is policy-free.
//!
//! All value decoding uses C-locale forms: decimal integers, booleans
//! spelled `true`/`false`/`yes`/`no`/`1`/`0` (case-insensitive), and a
//! single configurable list separator which is not escapable.

use crate::types::KeyfileError;
use log::warn;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Parameter priority, enforced when a typed value is read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Priority {
    /// The parameter may be present or absent.
    Optional,
    /// The parameter must be present.
    Required,
    /// The parameter must not be present in this context.
    Disallowed,
    /// The parameter is deprecated but still functional.
    Deprecated,
    /// The parameter no longer has any effect; its value is discarded.
    Obsolete,
}

/// Decode a keyfile value string into a typed value.
pub trait FromKeyfileValue: Sized {
    fn from_keyfile_value(value: &str) -> Option<Self>;
}

impl FromKeyfileValue for String {
    fn from_keyfile_value(value: &str) -> Option<Self> {
        Some(value.to_owned())
    }
}

impl FromKeyfileValue for bool {
    fn from_keyfile_value(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl FromKeyfileValue for u32 {
    fn from_keyfile_value(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromKeyfileValue for i32 {
    fn from_keyfile_value(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromKeyfileValue for PathBuf {
    fn from_keyfile_value(value: &str) -> Option<Self> {
        Some(PathBuf::from(value))
    }
}

/// Encode a typed value as a keyfile value string.
pub trait ToKeyfileValue {
    fn to_keyfile_value(&self) -> String;
}

impl ToKeyfileValue for str {
    fn to_keyfile_value(&self) -> String {
        self.to_owned()
    }
}

impl ToKeyfileValue for String {
    fn to_keyfile_value(&self) -> String {
        self.clone()
    }
}

impl ToKeyfileValue for bool {
    fn to_keyfile_value(&self) -> String {
        if *self { "true".into() } else { "false".into() }
    }
}

impl ToKeyfileValue for u32 {
    fn to_keyfile_value(&self) -> String {
        self.to_string()
    }
}

impl ToKeyfileValue for i32 {
    fn to_keyfile_value(&self) -> String {
        self.to_string()
    }
}

impl ToKeyfileValue for Path {
    fn to_keyfile_value(&self) -> String {
        self.to_string_lossy().into_owned()
    }
}

impl ToKeyfileValue for PathBuf {
    fn to_keyfile_value(&self) -> String {
        self.to_string_lossy().into_owned()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Item {
    key: String,
    value: String,
    comment: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Group {
    name: String,
    comment: String,
    items: Vec<Item>,
}

/// An ordered, comment-preserving INI document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Keyfile {
    groups: Vec<Group>,
    /// Comment lines with no following group or key.
    trailing_comment: String,
    separator: char,
}

impl Default for Keyfile {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyfile {
    pub fn new() -> Self {
        Self::with_separator(',')
    }

    pub fn with_separator(separator: char) -> Self {
        Keyfile {
            groups: Vec::new(),
            trailing_comment: String::new(),
            separator,
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Load and parse a keyfile from disk.
    pub fn load(path: &Path) -> Result<Self, KeyfileError> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Parse a keyfile from a byte stream.
    ///
    /// `#` lines accumulate as a comment attached to the next group or
    /// key; a blank line ends a comment block. Duplicate groups and
    /// duplicate keys warn and keep the first occurrence.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, KeyfileError> {
        let mut kf = Keyfile::new();
        let mut comment = String::new();
        let mut current_group: Option<String> = None;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = index + 1;

            if let Some(rest) = line.strip_prefix('#') {
                if !comment.is_empty() {
                    comment.push('\n');
                }
                comment.push_str(rest);
            } else if line.is_empty() {
                comment.clear();
            } else if line.starts_with('[') {
                let close = line.find(']');
                let name = match close {
                    Some(pos) if pos == line.len() - 1 && pos > 1 => &line[1..pos],
                    _ => {
                        return Err(KeyfileError::InvalidGroup {
                            line: lineno,
                            text: line,
                        })
                    }
                };
                if kf.has_group(name) {
                    warn!("line {lineno}: duplicate group entry: {name}");
                } else {
                    kf.groups.push(Group {
                        name: name.to_owned(),
                        comment: std::mem::take(&mut comment),
                        items: Vec::new(),
                    });
                }
                current_group = Some(name.to_owned());
                comment.clear();
            } else if let Some(eq) = line.find('=') {
                if eq == 0 {
                    return Err(KeyfileError::MissingKey {
                        line: lineno,
                        text: line,
                    });
                }
                let group = match &current_group {
                    Some(group) => group.clone(),
                    None => {
                        return Err(KeyfileError::InvalidLine {
                            line: lineno,
                            text: line,
                        })
                    }
                };
                let key = &line[..eq];
                let value = &line[eq + 1..];
                if kf.has_key(&group, key) {
                    warn!("line {lineno}: group {group}: duplicate key entry: {key}");
                } else if let Some(found) = kf.find_group_mut(&group) {
                    found.items.push(Item {
                        key: key.to_owned(),
                        value: value.to_owned(),
                        comment: std::mem::take(&mut comment),
                    });
                }
                comment.clear();
            } else {
                return Err(KeyfileError::InvalidLine {
                    line: lineno,
                    text: line,
                });
            }
        }

        kf.trailing_comment = comment;
        Ok(kf)
    }

    pub fn groups(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn keys(&self, group: &str) -> Vec<&str> {
        self.find_group(group)
            .map(|g| g.items.iter().map(|i| i.key.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.find_group(group).is_some()
    }

    pub fn has_key(&self, group: &str, key: &str) -> bool {
        self.find_item(group, key).is_some()
    }

    pub fn group_comment(&self, group: &str) -> Option<&str> {
        self.find_group(group).map(|g| g.comment.as_str())
    }

    pub fn key_comment(&self, group: &str, key: &str) -> Option<&str> {
        self.find_item(group, key).map(|i| i.comment.as_str())
    }

    /// The raw string value of a key, if present.
    pub fn get_raw(&self, group: &str, key: &str) -> Option<&str> {
        self.find_item(group, key).map(|i| i.value.as_str())
    }

    /// Read a typed value, enforcing the priority policy.
    pub fn get_value<T: FromKeyfileValue>(
        &self,
        group: &str,
        key: &str,
        priority: Priority,
    ) -> Result<Option<T>, KeyfileError> {
        let raw = match self.check_priority(group, key, priority)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match T::from_keyfile_value(raw) {
            Some(value) => Ok(Some(value)),
            None => Err(KeyfileError::InvalidValue {
                group: group.to_owned(),
                key: key.to_owned(),
                value: raw.to_owned(),
            }),
        }
    }

    /// Read a typed list value, enforcing the priority policy. The list
    /// separator is not escapable; an element that fails to decode fails
    /// the whole read.
    pub fn get_list_value<T: FromKeyfileValue>(
        &self,
        group: &str,
        key: &str,
        priority: Priority,
    ) -> Result<Option<Vec<T>>, KeyfileError> {
        let raw = match self.check_priority(group, key, priority)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let mut values = Vec::new();
        if !raw.is_empty() {
            for part in raw.split(self.separator) {
                match T::from_keyfile_value(part) {
                    Some(value) => values.push(value),
                    None => {
                        return Err(KeyfileError::InvalidValue {
                            group: group.to_owned(),
                            key: key.to_owned(),
                            value: part.to_owned(),
                        })
                    }
                }
            }
        }
        Ok(Some(values))
    }

    /// Apply the priority policy to a key, returning its raw value when
    /// the read should proceed.
    fn check_priority(
        &self,
        group: &str,
        key: &str,
        priority: Priority,
    ) -> Result<Option<&str>, KeyfileError> {
        let raw = self.get_raw(group, key);
        match (priority, raw) {
            (Priority::Required, None) => Err(KeyfileError::MissingRequired {
                group: group.to_owned(),
                key: key.to_owned(),
            }),
            (Priority::Disallowed, Some(_)) => Err(KeyfileError::Disallowed {
                group: group.to_owned(),
                key: key.to_owned(),
            }),
            (Priority::Deprecated, Some(raw)) => {
                warn!("{group} chroot: a deprecated parameter \"{key}\" has been specified");
                Ok(Some(raw))
            }
            (Priority::Obsolete, Some(_)) => {
                warn!(
                    "{group} chroot: an obsolete parameter \"{key}\" has been specified; \
                     it no longer has any effect"
                );
                Ok(None)
            }
            (_, raw) => Ok(raw),
        }
    }

    /// Create a group if it does not exist. The comment is only set at
    /// creation time.
    pub fn set_group(&mut self, group: &str, comment: &str) {
        if !self.has_group(group) {
            self.groups.push(Group {
                name: group.to_owned(),
                comment: comment.to_owned(),
                items: Vec::new(),
            });
        }
    }

    pub fn set_value<T: ToKeyfileValue + ?Sized>(&mut self, group: &str, key: &str, value: &T) {
        self.set_value_with_comment(group, key, value, "");
    }

    pub fn set_value_with_comment<T: ToKeyfileValue + ?Sized>(
        &mut self,
        group: &str,
        key: &str,
        value: &T,
        comment: &str,
    ) {
        let encoded = value.to_keyfile_value();
        let group = self.ensure_group(group);
        match group.items.iter_mut().find(|i| i.key == key) {
            Some(item) => {
                item.value = encoded;
                item.comment = comment.to_owned();
            }
            None => group.items.push(Item {
                key: key.to_owned(),
                value: encoded,
                comment: comment.to_owned(),
            }),
        }
    }

    pub fn set_list_value<T: ToKeyfileValue>(&mut self, group: &str, key: &str, values: &[T]) {
        let encoded = values
            .iter()
            .map(|v| v.to_keyfile_value())
            .collect::<Vec<_>>()
            .join(&self.separator.to_string());
        self.set_value(group, key, encoded.as_str());
    }

    pub fn remove_group(&mut self, group: &str) {
        self.groups.retain(|g| g.name != group);
    }

    pub fn remove_key(&mut self, group: &str, key: &str) {
        if let Some(group) = self.find_group_mut(group) {
            group.items.retain(|i| i.key != key);
        }
    }

    /// Serialise, reproducing group order, item order, and comments.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for (index, group) in self.groups.iter().enumerate() {
            if index > 0 {
                writeln!(writer)?;
            }
            write_comment(writer, &group.comment)?;
            writeln!(writer, "[{}]", group.name)?;
            for item in &group.items {
                write_comment(writer, &item.comment)?;
                writeln!(writer, "{}={}", item.key, item.value)?;
            }
        }
        if !self.trailing_comment.is_empty() {
            if !self.groups.is_empty() {
                writeln!(writer)?;
            }
            write_comment(writer, &self.trailing_comment)?;
        }
        Ok(())
    }

    fn find_group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn find_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    fn find_item(&self, group: &str, key: &str) -> Option<&Item> {
        self.find_group(group)
            .and_then(|g| g.items.iter().find(|i| i.key == key))
    }

    fn ensure_group(&mut self, name: &str) -> &mut Group {
        if let Some(pos) = self.groups.iter().position(|g| g.name == name) {
            &mut self.groups[pos]
        } else {
            self.groups.push(Group {
                name: name.to_owned(),
                comment: String::new(),
                items: Vec::new(),
            });
            let last = self.groups.len() - 1;
            &mut self.groups[last]
        }
    }
}

impl fmt::Display for Keyfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Vec::new();
        self.write_to(&mut buf).map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

fn write_comment<W: Write>(writer: &mut W, comment: &str) -> io::Result<()> {
    if comment.is_empty() {
        return Ok(());
    }
    for line in comment.split('\n') {
        writeln!(writer, "#{line}")?;
    }
    Ok(())
}
