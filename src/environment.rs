//! Ordered environment variable collection.
//!
//! Holds the variables handed to setup scripts and to `execve`. Insertion
//! order is preserved so the exported environment is reproducible.

use log::warn;
use std::ffi::CString;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the calling process's environment.
    pub fn from_current() -> Self {
        let mut env = Environment::new();
        for (name, value) in std::env::vars() {
            env.add(&name, &value);
        }
        env
    }

    /// Add a variable, replacing any existing binding of the same name.
    pub fn add(&mut self, name: &str, value: &str) {
        match self.vars.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.vars.push((name.to_owned(), value.to_owned())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `NAME=value` strings for `execve`. Entries with interior NUL bytes
    /// cannot be represented and are skipped with a warning.
    pub fn to_cstrings(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(name, value)| match CString::new(format!("{name}={value}")) {
                Ok(entry) => Some(entry),
                Err(_) => {
                    warn!("skipping environment variable with NUL byte: {name}");
                    None
                }
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut env = Environment::new();
        for (name, value) in iter {
            env.add(&name, &value);
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_preserves_order_and_replaces() {
        let mut env = Environment::new();
        env.add("CHROOT_TYPE", "plain");
        env.add("CHROOT_NAME", "sid");
        env.add("CHROOT_TYPE", "file");

        let vars: Vec<_> = env.iter().collect();
        assert_eq!(
            vars,
            vec![("CHROOT_TYPE", "file"), ("CHROOT_NAME", "sid")]
        );
    }

    #[test]
    fn cstrings_are_name_equals_value() {
        let mut env = Environment::new();
        env.add("AUTH_USER", "root");
        let strings = env.to_cstrings();
        assert_eq!(strings.len(), 1);
        assert_eq!(strings[0].to_bytes(), b"AUTH_USER=root");
    }
}
