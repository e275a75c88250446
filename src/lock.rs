//! Advisory locking for configuration files and block devices.
//!
//! Two layers share one mechanism. [`lock_fd`] takes an fcntl record lock
//! on an open descriptor with a retry-until-timeout loop; the config
//! loader uses it directly for its shared 2 s lock. [`DeviceLock`] builds
//! the cooperative device protocol on top: a lock file named after the
//! device carrying a `{pid}\n{kind}\n` record that persists while a
//! session holds the device, with stale records (dead owner PID) taken
//! over on the next acquisition.

use crate::types::LockError;
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Timeout for device locks taken during setup transitions.
pub const SETUP_LOCK_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for the shared lock taken while reading configuration files.
pub const CONFIG_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const LOCK_DIR: &str = "/var/lock";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

impl LockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LockKind::Shared => "shared",
            LockKind::Exclusive => "exclusive",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "shared" => Some(LockKind::Shared),
            "exclusive" => Some(LockKind::Exclusive),
            _ => None,
        }
    }

    fn fcntl_type(self) -> libc::c_short {
        match self {
            LockKind::Shared => libc::F_RDLCK as libc::c_short,
            LockKind::Exclusive => libc::F_WRLCK as libc::c_short,
        }
    }
}

/// One non-blocking F_SETLK attempt over the whole file. `None` unlocks.
/// Returns Ok(false) when another process holds an incompatible lock.
fn try_set_lock(fd: RawFd, kind: Option<LockKind>) -> io::Result<bool> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = match kind {
        Some(kind) => kind.fcntl_type(),
        None => libc::F_UNLCK as libc::c_short,
    };
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = 0;
    fl.l_len = 0;

    let rc = unsafe { libc::fcntl(fd, libc::F_SETLK, &fl) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EAGAIN) => Ok(false),
        _ => Err(err),
    }
}

/// Acquire an fcntl lock on an open descriptor, retrying with exponential
/// backoff and jitter until the timeout expires.
pub fn lock_fd(fd: RawFd, kind: LockKind, timeout: Duration, path: &Path) -> Result<(), LockError> {
    let start = Instant::now();
    let mut delay = Duration::from_millis(10);
    loop {
        match try_set_lock(fd, Some(kind)) {
            Ok(true) => return Ok(()),
            Ok(false) => {
                if start.elapsed() >= timeout {
                    return Err(LockError::Timeout {
                        path: path.to_owned(),
                        waited: start.elapsed(),
                    });
                }
                let jitter = Duration::from_millis(fastrand::u64(0..=delay.as_millis() as u64));
                std::thread::sleep(delay + jitter);
                delay = std::cmp::min(delay * 2, Duration::from_millis(500));
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        }
    }
}

/// Drop an fcntl lock taken with [`lock_fd`].
pub fn unlock_fd(fd: RawFd, path: &Path) -> Result<(), LockError> {
    try_set_lock(fd, None)
        .map(|_| ())
        .map_err(|source| LockError::Io {
            path: path.to_owned(),
            source,
        })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct LockRecord {
    pid: i32,
    kind: LockKind,
}

/// Cooperative advisory lock on a block device (or any file standing in
/// for one), recorded in `/var/lock/LCK..<basename>`.
#[derive(Clone, Debug)]
pub struct DeviceLock {
    device: PathBuf,
    lock_path: PathBuf,
}

impl DeviceLock {
    pub fn new(device: &Path) -> Self {
        Self::with_lock_dir(device, Path::new(LOCK_DIR))
    }

    /// Place the lock file in a non-default directory. Exists for tests
    /// and for setups with a relocated lock directory.
    pub fn with_lock_dir(device: &Path, lock_dir: &Path) -> Self {
        let base = device
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_owned());
        DeviceLock {
            device: device.to_owned(),
            lock_path: lock_dir.join(format!("LCK..{base}")),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn acquire(&self, kind: LockKind, timeout: Duration) -> Result<(), LockError> {
        self.acquire_impl(kind, timeout, false)
    }

    /// Acquire, bypassing the compatibility check against a live holder.
    /// Used for operator cleanup (`--force` on recover/end).
    pub fn acquire_force(&self, kind: LockKind, timeout: Duration) -> Result<(), LockError> {
        self.acquire_impl(kind, timeout, true)
    }

    fn acquire_impl(&self, kind: LockKind, timeout: Duration, force: bool) -> Result<(), LockError> {
        let start = Instant::now();
        let mut file = self.open_lock_file()?;
        let mut delay = Duration::from_millis(10);
        let own_pid = std::process::id() as i32;

        loop {
            // Serialise record access among live contenders. The record,
            // not the fcntl lock, is the persistent token: it must survive
            // this process while a session keeps the device open.
            lock_fd(file.as_raw_fd(), LockKind::Exclusive, timeout, &self.lock_path)?;

            let holder = match self.read_record(&mut file)? {
                None => None,
                Some(record) if record.pid == own_pid => None,
                Some(record) if force => {
                    warn!(
                        "{}: forcibly taking over lock held by pid {}",
                        self.lock_path.display(),
                        record.pid
                    );
                    None
                }
                Some(record) if !pid_is_alive(record.pid) => {
                    warn!(
                        "{}: taking over stale lock (pid {} no longer exists)",
                        self.lock_path.display(),
                        record.pid
                    );
                    None
                }
                Some(record)
                    if kind == LockKind::Shared && record.kind == LockKind::Shared =>
                {
                    None
                }
                Some(record) => Some(record),
            };

            match holder {
                None => {
                    self.write_record(&mut file, LockRecord { pid: own_pid, kind })?;
                    unlock_fd(file.as_raw_fd(), &self.lock_path)?;
                    debug!(
                        "{}: acquired {} lock for {}",
                        self.lock_path.display(),
                        kind.as_str(),
                        self.device.display()
                    );
                    return Ok(());
                }
                Some(record) => {
                    unlock_fd(file.as_raw_fd(), &self.lock_path)?;
                    if start.elapsed() >= timeout {
                        return Err(LockError::Timeout {
                            path: self.lock_path.clone(),
                            waited: start.elapsed(),
                        });
                    }
                    debug!(
                        "{}: waiting for {} lock held by pid {}",
                        self.lock_path.display(),
                        record.kind.as_str(),
                        record.pid
                    );
                    let jitter = Duration::from_millis(fastrand::u64(0..=delay.as_millis() as u64));
                    std::thread::sleep(delay + jitter);
                    delay = std::cmp::min(delay * 2, Duration::from_millis(500));
                }
            }
        }
    }

    /// Release a held lock. Fails with `NotHeld` when the record does not
    /// name the current process.
    pub fn release(&self) -> Result<(), LockError> {
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.lock_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LockError::NotHeld {
                    path: self.lock_path.clone(),
                })
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: self.lock_path.clone(),
                    source,
                })
            }
        };

        lock_fd(
            file.as_raw_fd(),
            LockKind::Exclusive,
            CONFIG_LOCK_TIMEOUT,
            &self.lock_path,
        )?;

        let own_pid = std::process::id() as i32;
        let result = match self.read_record(&mut file)? {
            Some(record) if record.pid == own_pid => {
                // Truncate rather than unlink: another process may hold an
                // fcntl lock on this inode, and re-creating the file would
                // let two holders coexist on different inodes.
                file.set_len(0).map_err(|source| LockError::Io {
                    path: self.lock_path.clone(),
                    source,
                })
            }
            Some(record) if !pid_is_alive(record.pid) => Err(LockError::Stale {
                path: self.lock_path.clone(),
                pid: record.pid,
            }),
            Some(record) => Err(LockError::Conflict {
                path: self.lock_path.clone(),
                pid: record.pid,
            }),
            None => Err(LockError::NotHeld {
                path: self.lock_path.clone(),
            }),
        };

        let _ = unlock_fd(file.as_raw_fd(), &self.lock_path);
        result
    }

    fn open_lock_file(&self) -> Result<std::fs::File, LockError> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .mode(0o644)
            .open(&self.lock_path)
            .map_err(|source| LockError::Io {
                path: self.lock_path.clone(),
                source,
            })
    }

    fn read_record(&self, file: &mut std::fs::File) -> Result<Option<LockRecord>, LockError> {
        let mut content = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut content))
            .map_err(|source| LockError::Io {
                path: self.lock_path.clone(),
                source,
            })?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let mut lines = content.lines();
        let record = match (lines.next(), lines.next()) {
            (Some(pid), Some(kind)) => match (pid.parse::<i32>().ok(), LockKind::parse(kind)) {
                (Some(pid), Some(kind)) => Some(LockRecord { pid, kind }),
                _ => None,
            },
            _ => None,
        };
        if record.is_none() {
            warn!(
                "{}: unreadable lock record, treating as stale",
                self.lock_path.display()
            );
        }
        Ok(record)
    }

    fn write_record(&self, file: &mut std::fs::File, record: LockRecord) -> Result<(), LockError> {
        let text = format!("{}\n{}\n", record.pid, record.kind.as_str());
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(text.as_bytes()))
            .and_then(|_| file.set_len(text.len() as u64))
            .and_then(|_| file.sync_all())
            .map_err(|source| LockError::Io {
                path: self.lock_path.clone(),
                source,
            })
    }
}

fn pid_is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn lock_in(dir: &Path) -> DeviceLock {
        DeviceLock::with_lock_dir(Path::new("/dev/vg/unstable"), dir)
    }

    #[test]
    fn lock_path_follows_lockdev_convention() {
        let lock = lock_in(Path::new("/var/lock"));
        assert_eq!(lock.lock_path(), Path::new("/var/lock/LCK..unstable"));
    }

    #[test]
    fn acquire_writes_pid_and_kind_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        lock.acquire(LockKind::Exclusive, Duration::from_secs(1))
            .expect("acquire");

        let content = fs::read_to_string(lock.lock_path()).expect("read");
        assert_eq!(
            content,
            format!("{}\nexclusive\n", std::process::id())
        );

        lock.release().expect("release");
        let content = fs::read_to_string(lock.lock_path()).expect("read");
        assert!(content.is_empty());
    }

    #[test]
    fn release_without_acquire_is_not_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        assert!(matches!(
            lock.release(),
            Err(LockError::NotHeld { .. })
        ));

        // An empty record file is also "not held".
        fs::write(lock.lock_path(), b"").expect("write");
        assert!(matches!(lock.release(), Err(LockError::NotHeld { .. })));
    }

    #[test]
    fn reacquire_by_same_pid_transitions_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        lock.acquire(LockKind::Shared, Duration::from_secs(1))
            .expect("shared");
        lock.acquire(LockKind::Exclusive, Duration::from_secs(1))
            .expect("upgrade");
        let content = fs::read_to_string(lock.lock_path()).expect("read");
        assert!(content.ends_with("exclusive\n"));
        lock.release().expect("release");
    }

    #[test]
    fn stale_record_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        // A PID that cannot exist: beyond any reasonable pid_max.
        fs::write(lock.lock_path(), b"1073741824\nexclusive\n").expect("write");

        lock.acquire(LockKind::Exclusive, Duration::from_secs(1))
            .expect("takeover");
        let content = fs::read_to_string(lock.lock_path()).expect("read");
        assert!(content.starts_with(&std::process::id().to_string()));
        lock.release().expect("release");
    }

    #[test]
    fn live_exclusive_holder_blocks_until_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        // PID 1 always exists.
        fs::write(lock.lock_path(), b"1\nexclusive\n").expect("write");

        let err = lock
            .acquire(LockKind::Shared, Duration::from_millis(50))
            .expect_err("should time out");
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[test]
    fn shared_holders_are_compatible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        fs::write(lock.lock_path(), b"1\nshared\n").expect("write");

        lock.acquire(LockKind::Shared, Duration::from_millis(200))
            .expect("shared with shared");
        lock.release().expect("release");
    }

    #[test]
    fn exclusive_over_shared_times_out_but_force_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        fs::write(lock.lock_path(), b"1\nshared\n").expect("write");

        let err = lock
            .acquire(LockKind::Exclusive, Duration::from_millis(50))
            .expect_err("should time out");
        assert!(matches!(err, LockError::Timeout { .. }));

        lock.acquire_force(LockKind::Exclusive, Duration::from_millis(200))
            .expect("forced takeover");
        lock.release().expect("release");
    }

    #[test]
    fn release_by_wrong_pid_is_a_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_in(dir.path());
        fs::write(lock.lock_path(), b"1\nexclusive\n").expect("write");
        assert!(matches!(
            lock.release(),
            Err(LockError::Conflict { pid: 1, .. })
        ));
    }

    #[test]
    fn fd_lock_acquires_and_releases() {
        // Conflict cannot be provoked in-process: fcntl record locks are
        // per-process, so a second descriptor would just succeed.
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        fs::write(&path, b"[sid]\n").expect("write");

        let file = fs::File::open(&path).expect("open");
        lock_fd(
            file.as_raw_fd(),
            LockKind::Shared,
            Duration::from_millis(100),
            &path,
        )
        .expect("shared lock");
        unlock_fd(file.as_raw_fd(), &path).expect("unlock");
    }
}
