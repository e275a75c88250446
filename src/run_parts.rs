//! Lexicographic batch runner for chroot setup scripts.
//!
//! Executables in the setup directory run in sorted order on `start` and
//! reverse-sorted order on `stop`, each invoked with the phase as its
//! single argument and the chroot environment as its whole environment.
//! The first non-zero exit aborts the batch.

use crate::environment::Environment;
use crate::types::SessionError;
use log::debug;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptPhase {
    Start,
    Stop,
}

impl ScriptPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptPhase::Start => "start",
            ScriptPhase::Stop => "stop",
        }
    }
}

pub fn run_parts(dir: &Path, phase: ScriptPhase, env: &Environment) -> Result<(), SessionError> {
    let failed = |reason: String| SessionError::SetupScriptFailed {
        phase: phase.as_str().to_owned(),
        reason,
    };

    let entries = std::fs::read_dir(dir)
        .map_err(|err| failed(format!("{}: {err}", dir.display())))?;

    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| failed(format!("{}: {err}", dir.display())))?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) => return Err(failed(format!("{}: {err}", path.display()))),
        };
        if !meta.is_file() {
            continue;
        }
        if meta.permissions().mode() & 0o111 == 0 {
            debug!("{}: not executable, skipping", path.display());
            continue;
        }
        scripts.push(path);
    }

    scripts.sort();
    if phase == ScriptPhase::Stop {
        scripts.reverse();
    }

    for script in scripts {
        debug!("running setup script {} {}", script.display(), phase.as_str());
        let status = Command::new(&script)
            .arg(phase.as_str())
            .env_clear()
            .envs(env.iter())
            .current_dir("/")
            .status()
            .map_err(|err| failed(format!("{}: {err}", script.display())))?;
        if !status.success() {
            return Err(failed(format!("{}: exited with {status}", script.display())));
        }
    }

    Ok(())
}
