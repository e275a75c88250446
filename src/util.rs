//! Small shared helpers: path utilities, durable writes, syslog.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// The final component of a path, as a string.
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

/// Resolve a program name against a `PATH` string. Names containing a
/// slash are returned as-is.
pub fn find_program_in_path(program: &str, path: Option<&str>) -> Option<PathBuf> {
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }
    let path = path.unwrap_or("/usr/bin:/bin");
    for dir in path.split(':') {
        if dir.is_empty() {
            continue;
        }
        let candidate = Path::new(dir).join(program);
        if let Ok(meta) = candidate.metadata() {
            if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}

/// Atomically write a file: write to a temp name in the same directory,
/// fsync, rename over the target, fsync the directory. The ext4/xfs
/// rename-without-dir-fsync case can otherwise lose the file on crash.
pub fn atomic_write(target: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no parent dir"))?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        target.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(mode)
            .open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    if let Err(err) = fs::rename(&temp_path, target) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

const SYSLOG_IDENT: &[u8] = b"schroot\0";

/// Open the syslog connection; call once from the entry point.
pub fn open_syslog() {
    unsafe {
        libc::openlog(
            SYSLOG_IDENT.as_ptr() as *const libc::c_char,
            libc::LOG_PID | libc::LOG_NDELAY,
            libc::LOG_AUTHPRIV,
        );
    }
}

/// Record a notice-level message at `LOG_USER|LOG_NOTICE`.
pub fn syslog_notice(message: &str) {
    if let Ok(message) = CString::new(message) {
        unsafe {
            libc::syslog(
                libc::LOG_USER | libc::LOG_NOTICE,
                b"%s\0".as_ptr() as *const libc::c_char,
                message.as_ptr(),
            );
        }
    }
}

pub fn close_syslog() {
    unsafe {
        libc::closelog();
    }
}
