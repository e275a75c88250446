//! Chroot configuration registry.
//!
//! Loads one file or a directory of files, each a keyfile whose groups
//! describe chroots, and indexes the results by primary name and alias.
//! Configuration is only trusted after the security protocol passes:
//! open without following symlinks, lock shared, then verify the file is
//! a root-owned regular file that others cannot write.

use crate::chroot::Chroot;
use crate::keyfile::{Keyfile, Priority};
use crate::lock::{lock_fd, unlock_fd, LockKind, CONFIG_LOCK_TIMEOUT};
use crate::types::ConfigError;
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

#[derive(Debug, Default)]
pub struct Config {
    chroots: Vec<Chroot>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single configuration file.
    pub fn add_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let kf = load_keyfile_checked(path)?;
        self.add_keyfile(&kf, path)
    }

    /// Load every regular file in a directory, in lexicographic order.
    pub fn add_directory(&mut self, dir: &Path) -> Result<(), ConfigError> {
        let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::DirectoryOpen {
            path: dir.to_owned(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::DirectoryOpen {
                path: dir.to_owned(),
                source,
            })?;
            let path = entry.path();
            let meta = match std::fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    warn!("{}: failed to stat file: {err}", path.display());
                    continue;
                }
            };
            if !meta.is_file() {
                debug!("{}: not a regular file, skipping", path.display());
                continue;
            }
            files.push(path);
        }
        files.sort();

        for path in files {
            self.add_file(&path)?;
        }
        Ok(())
    }

    /// Register the chroots described by an already-parsed keyfile.
    /// `source` names the file for diagnostics.
    pub fn add_keyfile(&mut self, kf: &Keyfile, source: &Path) -> Result<(), ConfigError> {
        for group in kf.groups() {
            if self.find_by_alias(group).is_some() {
                return Err(ConfigError::DuplicateName {
                    name: group.to_owned(),
                });
            }

            let kind: String = kf
                .get_value(group, "type", Priority::Optional)
                .map_err(|err| ConfigError::Parse {
                    path: source.to_owned(),
                    source: err,
                })?
                .unwrap_or_else(|| "plain".to_owned());
            if !matches!(
                kind.as_str(),
                "plain" | "block-device" | "lvm-snapshot" | "file"
            ) {
                return Err(ConfigError::UnknownChrootType {
                    group: group.to_owned(),
                    kind,
                });
            }

            let chroot =
                Chroot::from_keyfile(kf, group).map_err(|err| ConfigError::Chroot {
                    group: group.to_owned(),
                    source: err,
                })?;

            for alias in chroot.aliases() {
                if alias == group || self.find_by_alias(alias).is_some() {
                    return Err(ConfigError::DuplicateName {
                        name: alias.clone(),
                    });
                }
            }

            debug!(
                "registered {} chroot \"{}\" from {}",
                chroot.chroot_type(),
                group,
                source.display()
            );
            self.chroots.push(chroot);
        }
        Ok(())
    }

    pub fn chroots(&self) -> &[Chroot] {
        &self.chroots
    }

    pub fn is_empty(&self) -> bool {
        self.chroots.is_empty()
    }

    /// Find a chroot by its primary name only. Used for uniqueness
    /// checks; user-supplied names go through [`Config::find_by_alias`].
    pub fn find_by_name(&self, name: &str) -> Option<&Chroot> {
        self.chroots.iter().find(|c| c.name() == name)
    }

    /// Find a chroot by primary name, falling back to aliases.
    pub fn find_by_alias(&self, name: &str) -> Option<&Chroot> {
        self.find_by_name(name).or_else(|| {
            self.chroots
                .iter()
                .find(|c| c.aliases().iter().any(|a| a == name))
        })
    }

    /// Every name and alias, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for chroot in &self.chroots {
            names.push(chroot.name().to_owned());
            names.extend(chroot.aliases().iter().cloned());
        }
        names.sort();
        names
    }

    /// The subset of `names` that does not resolve to any chroot.
    pub fn validate(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.find_by_alias(name).is_none())
            .cloned()
            .collect()
    }

    pub fn print_list<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for name in self.list_names() {
            writeln!(writer, "{name}")?;
        }
        Ok(())
    }

    /// Print details for the named chroots. Unknown names warn and are
    /// skipped.
    pub fn print_info<W: Write>(&self, names: &[String], writer: &mut W) -> io::Result<()> {
        let mut first = true;
        for name in names {
            match self.find_by_alias(name) {
                Some(chroot) => {
                    if !first {
                        writeln!(writer)?;
                    }
                    first = false;
                    chroot.print_details(writer)?;
                }
                None => warn!("{name}: no such chroot"),
            }
        }
        Ok(())
    }

    /// Dump the named chroots as configuration.
    pub fn print_config<W: Write>(&self, names: &[String], writer: &mut W) -> io::Result<()> {
        let mut kf = Keyfile::new();
        for name in names {
            match self.find_by_alias(name) {
                Some(chroot) => chroot.to_keyfile(&mut kf),
                None => warn!("{name}: no such chroot"),
            }
        }
        kf.write_to(writer)
    }
}

/// Open and read one configuration file under the security protocol.
fn load_keyfile_checked(path: &Path) -> Result<Keyfile, ConfigError> {
    let mut file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
        .map_err(|source| ConfigError::FileOpen {
            path: path.to_owned(),
            source,
        })?;

    lock_fd(
        file.as_raw_fd(),
        LockKind::Shared,
        CONFIG_LOCK_TIMEOUT,
        path,
    )
    .map_err(|source| ConfigError::LockTimeout {
        path: path.to_owned(),
        source,
    })?;

    let meta = file.metadata().map_err(|source| ConfigError::FileStat {
        path: path.to_owned(),
        source,
    })?;
    if meta.uid() != 0 {
        return Err(ConfigError::NotOwnedByRoot {
            path: path.to_owned(),
        });
    }
    if meta.permissions().mode() & 0o002 != 0 {
        return Err(ConfigError::WorldWritable {
            path: path.to_owned(),
        });
    }
    if !meta.file_type().is_file() {
        return Err(ConfigError::NotRegularFile {
            path: path.to_owned(),
        });
    }

    let mut data = String::new();
    file.read_to_string(&mut data)
        .map_err(|source| ConfigError::ReadFailed {
            path: path.to_owned(),
            source,
        })?;

    if let Err(err) = unlock_fd(file.as_raw_fd(), path) {
        warn!("{}: lock discard failure: {err}", path.display());
    }

    Keyfile::parse(data.as_bytes()).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}
