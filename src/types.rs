//! Error taxonomy and shared result types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for schroot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error, aggregating the per-subsystem taxonomies.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Keyfile(#[from] KeyfileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chroot(#[from] ChrootError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Error {
    /// Map an error to the process exit status, so wrappers can tell lock
    /// timeouts and child failures apart from generic errors.
    pub fn exit_status(&self) -> i32 {
        match self {
            Error::Session(SessionError::ChildExitNonZero { code }) => *code,
            Error::Session(SessionError::ChildSignalled { signo }) => 128 + signo,
            Error::Session(SessionError::Chroot(ChrootError::Lock {
                source: LockError::Timeout { .. },
                ..
            })) => 3,
            Error::Chroot(ChrootError::Lock {
                source: LockError::Timeout { .. },
                ..
            }) => 3,
            Error::Lock(LockError::Timeout { .. }) => 3,
            Error::Config(ConfigError::LockTimeout { .. }) => 3,
            _ => 1,
        }
    }
}

/// Errors from the keyfile parser and its typed accessors.
#[derive(Debug, Error)]
pub enum KeyfileError {
    #[error("line {line}: invalid group entry: {text}")]
    InvalidGroup { line: usize, text: String },

    #[error("line {line}: no key specified: {text}")]
    MissingKey { line: usize, text: String },

    #[error("line {line}: invalid line: {text}")]
    InvalidLine { line: usize, text: String },

    #[error("{group} chroot: a required parameter \"{key}\" is missing")]
    MissingRequired { group: String, key: String },

    #[error("{group} chroot: a disallowed parameter \"{key}\" has been specified")]
    Disallowed { group: String, key: String },

    #[error("{group} chroot: could not parse \"{value}\" as a value for \"{key}\"")]
    InvalidValue {
        group: String,
        key: String,
        value: String,
    },

    #[error("read failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from loading and indexing chroot configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: failed to load configuration: {source}")]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: failed to stat file: {source}")]
    FileStat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: not owned by user root")]
    NotOwnedByRoot { path: PathBuf },

    #[error("{path}: others have write permission")]
    WorldWritable { path: PathBuf },

    #[error("{path}: not a regular file")]
    NotRegularFile { path: PathBuf },

    #[error("{path}: lock acquisition failure: {source}")]
    LockTimeout { path: PathBuf, source: LockError },

    #[error("{path}: read failure: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: parse failure: {source}")]
    Parse {
        path: PathBuf,
        source: KeyfileError,
    },

    #[error("{path}: failed to open directory: {source}")]
    DirectoryOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{name}: duplicate chroot name or alias")]
    DuplicateName { name: String },

    #[error("{group}: unknown chroot type \"{kind}\"")]
    UnknownChrootType { group: String, kind: String },

    #[error("{group}: {source}")]
    Chroot { group: String, source: ChrootError },
}

/// Errors from constructing and operating chroot descriptors.
#[derive(Debug, Error)]
pub enum ChrootError {
    #[error(transparent)]
    Keyfile(#[from] KeyfileError),

    #[error("\"{name}\" is not a valid chroot name")]
    InvalidName { name: String },

    #[error("{key}: \"{value}\" is not an absolute path")]
    InvalidPath { key: String, value: String },

    #[error("{chroot} chroot: device name not set")]
    DeviceNotSet { chroot: String },

    #[error("{chroot} chroot: failed to stat device {device}: {source}")]
    DeviceStat {
        chroot: String,
        device: PathBuf,
        source: std::io::Error,
    },

    #[error("{chroot} chroot: {device} is not a block device")]
    NotBlockDevice { chroot: String, device: PathBuf },

    #[error("{device}: failed to lock device: {source}")]
    Lock { device: PathBuf, source: LockError },

    #[error("{path}: failed to write session file: {source}")]
    SessionFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from the advisory device-lock protocol.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("{path}: timed out waiting for lock after {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("{path}: stale lock record left by pid {pid}")]
    Stale { path: PathBuf, pid: i32 },

    #[error("{path}: lock is not held by this process")]
    NotHeld { path: PathBuf },

    #[error("{path}: lock is held by pid {pid}")]
    Conflict { path: PathBuf, pid: i32 },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from identity resolution and authorisation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{user}: user not found")]
    UnknownUser { user: String },

    #[error("{group}: group not found")]
    UnknownGroup { group: String },

    #[error("{user}: not authorised to use chroot \"{chroot}\"")]
    NotInGroups { user: String, chroot: String },

    #[error("PAM error: {reason}")]
    PamFailure { reason: String },
}

/// Errors from the session lifecycle engine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{name}: no such chroot")]
    NoSuchChroot { name: String },

    #[error("failed to fork child: {source}")]
    ForkFailed { source: std::io::Error },

    #[error("chroot setup failed during {phase}: {reason}")]
    SetupScriptFailed { phase: String, reason: String },

    #[error("child terminated by signal {signo}")]
    ChildSignalled { signo: i32 },

    #[error("child dumped core")]
    ChildDumpedCore,

    #[error("child exited abnormally with status {code}")]
    ChildExitNonZero { code: i32 },

    #[error("wait for child failed: {source}")]
    WaitFailed { source: std::io::Error },

    #[error("failed to drop root permissions")]
    PrivilegeDropFailed,

    #[error("{chroot}: chroot does not support sessions")]
    CreateForbidden { chroot: String },

    #[error("{name}: session name already in use")]
    DuplicateSession { name: String },

    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error(transparent)]
    Chroot(#[from] ChrootError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// How much the user wants to hear about it.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_exit_status_passes_through() {
        let err = Error::Session(SessionError::ChildExitNonZero { code: 42 });
        assert_eq!(err.exit_status(), 42);
    }

    #[test]
    fn signalled_child_maps_above_128() {
        let err = Error::Session(SessionError::ChildSignalled { signo: 11 });
        assert_eq!(err.exit_status(), 139);
    }

    #[test]
    fn lock_timeout_is_distinct_from_generic_failure() {
        let err = Error::Lock(LockError::Timeout {
            path: PathBuf::from("/var/lock/LCK..vg"),
            waited: Duration::from_secs(15),
        });
        assert_eq!(err.exit_status(), 3);

        let err = Error::Session(SessionError::ChildDumpedCore);
        assert_eq!(err.exit_status(), 1);
    }
}
