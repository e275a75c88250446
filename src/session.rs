//! Session lifecycle engine.
//!
//! Drives begin/recover/run/end across the selected chroots: authorise,
//! acquire resources, run setup scripts, fork, drop privilege, exec,
//! reap, tear down. Once setup has started for a chroot its teardown
//! always runs, and the first error wins; teardown failures are logged
//! but never mask the error that got us there.
//!
//! The child half of the fork never returns an error to the parent: any
//! failure prints to stderr and exits with a code distinct from ordinary
//! command exit statuses.

use crate::auth::{self, AuthStatus, Credentials};
use crate::chroot::{Chroot, SessionFlags, SetupContext, SetupPhase};
use crate::config::Config;
use crate::environment::Environment;
use crate::pam::{DirectPam, Pam};
use crate::run_parts::{run_parts, ScriptPhase};
use crate::types::{AuthError, Error, Result, SessionError, Verbosity};
use crate::util;
use chrono::Utc;
use log::{debug, warn};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, chroot as enter_chroot, execve, fork, initgroups, setgid, setuid,
    ForkResult, Gid, Pid, Uid};
use std::ffi::{CStr, CString};
use std::path::PathBuf;

/// Exit status of the forked child for failures before `execve`.
pub const EXIT_CHILD_SETUP: i32 = 126;
/// Exit status of the forked child when `execve` itself fails.
pub const EXIT_CHILD_EXEC: i32 = 127;

/// Default location of persisted sessions.
pub const SESSION_DIR: &str = "/var/lib/schroot/session";
/// Default location of the setup scripts.
pub const SETUP_DIR: &str = "/etc/schroot/setup.d";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Run directly for plain chroots; begin, run, and end a session
    /// atomically for session-capable ones.
    Automatic,
    /// Create and persist a session, printing its id.
    Begin,
    /// Re-establish the locks of an existing session.
    Recover,
    /// Run a command against an existing session.
    Run,
    /// Tear down an existing session.
    End,
}

pub struct Session<'a> {
    config: &'a Config,
    chroots: Vec<String>,
    operation: Operation,
    credentials: Credentials,
    pam: Box<dyn Pam>,
    command: Vec<String>,
    preserve_environment: Option<Environment>,
    force: bool,
    verbosity: Verbosity,
    session_dir: PathBuf,
    setup_dir: PathBuf,
    child_status: i32,
}

impl<'a> Session<'a> {
    pub fn new(
        config: &'a Config,
        operation: Operation,
        chroots: Vec<String>,
        credentials: Credentials,
    ) -> Self {
        Session {
            config,
            chroots,
            operation,
            credentials,
            pam: Box::new(DirectPam::new()),
            command: Vec::new(),
            preserve_environment: None,
            force: false,
            verbosity: Verbosity::Normal,
            session_dir: PathBuf::from(SESSION_DIR),
            setup_dir: PathBuf::from(SETUP_DIR),
            child_status: 0,
        }
    }

    pub fn set_command(&mut self, command: Vec<String>) {
        self.command = command;
    }

    /// Preserve the given environment instead of building a login one.
    pub fn set_preserve_environment(&mut self, env: Environment) {
        self.preserve_environment = Some(env);
    }

    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    pub fn set_session_dir(&mut self, dir: PathBuf) {
        self.session_dir = dir;
    }

    pub fn set_setup_dir(&mut self, dir: PathBuf) {
        self.setup_dir = dir;
    }

    /// Replace the PAM driver. The default refuses password prompts.
    pub fn set_pam(&mut self, pam: Box<dyn Pam>) {
        self.pam = pam;
    }

    /// Exit (wait) status of the last child to run in this session.
    pub fn child_status(&self) -> i32 {
        self.child_status
    }

    /// Run the session operation across all selected chroots. The first
    /// failing chroot stops the iteration; its own teardown completes
    /// first.
    pub fn run(&mut self) -> Result<()> {
        match self.require_auth()? {
            AuthStatus::Fail => unreachable!("require_auth maps Fail to an error"),
            AuthStatus::User => {
                let user = self.credentials.user.clone();
                self.pam.authenticate(&user).map_err(SessionError::from)?;
            }
            AuthStatus::None => {}
        }

        let env = self.build_environment();
        self.pam.set_environment(env);

        for name in self.chroots.clone() {
            debug!("running session in {name} chroot");
            self.run_chroot(&name)?;
        }
        Ok(())
    }

    /// Evaluate the auth decision across every chroot; any `Fail`
    /// rejects the whole session before any side effect.
    fn require_auth(&self) -> Result<AuthStatus> {
        let mut status = AuthStatus::None;
        for name in &self.chroots {
            let chroot = self
                .config
                .find_by_alias(name)
                .ok_or_else(|| SessionError::NoSuchChroot { name: name.clone() })?;
            let chroot_status = auth::require_auth(&self.credentials, chroot);
            if chroot_status == AuthStatus::Fail {
                return Err(Error::Auth(AuthError::NotInGroups {
                    user: self.credentials.ruser.clone(),
                    chroot: name.clone(),
                }));
            }
            status = status.escalate(chroot_status);
        }
        Ok(status)
    }

    fn run_chroot(&mut self, name: &str) -> Result<()> {
        let chroot = self
            .config
            .find_by_alias(name)
            .ok_or_else(|| SessionError::NoSuchChroot { name: name.to_owned() })?
            .clone();

        match self.operation {
            Operation::Begin => self.begin_session(&chroot),
            Operation::Recover => self.recover_session(&chroot),
            Operation::Run => self.run_existing(&chroot),
            Operation::End => self.end_session(&chroot),
            Operation::Automatic => {
                if chroot.active() {
                    // An open session selected by id runs directly.
                    self.run_existing(&chroot)
                } else if chroot.session_flags() == SessionFlags::CreateSession {
                    let session = self.mint_session(&chroot)?;
                    self.activate_and_run(&session)
                } else {
                    self.activate_and_run(&chroot)
                }
            }
        }
    }

    fn setup_context(&self) -> SetupContext<'_> {
        SetupContext {
            session_dir: &self.session_dir,
            force: self.force,
        }
    }

    /// Clone a template into a session instance with a fresh id.
    fn mint_session(&self, template: &Chroot) -> Result<Chroot> {
        let id = format!(
            "{}-{}-{:04x}",
            template.name(),
            Utc::now().format("%Y%m%d%H%M%S"),
            fastrand::u32(..) & 0xffff
        );
        // Session ids and template names share one namespace.
        if self.config.find_by_alias(&id).is_some() {
            return Err(SessionError::DuplicateSession { name: id }.into());
        }
        let mut session = template.clone();
        session.prepare_session(&id);
        Ok(session)
    }

    fn begin_session(&mut self, template: &Chroot) -> Result<()> {
        if template.session_flags() != SessionFlags::CreateSession {
            return Err(SessionError::CreateForbidden {
                chroot: template.name().to_owned(),
            }
            .into());
        }
        let session = self.mint_session(template)?;
        let ctx = self.setup_context();

        session
            .setup_lock(SetupPhase::SetupStart, true, &ctx)
            .map_err(SessionError::from)?;

        let mut first_error: Option<Error> = None;
        if session.run_setup_scripts() {
            let env = self.script_environment(&session);
            if let Err(err) = run_parts(&self.setup_dir, ScriptPhase::Start, &env) {
                first_error = Some(err.into());
            }
        }
        if let Err(err) = session.setup_lock(SetupPhase::SetupStart, false, &ctx) {
            record_error(&mut first_error, err.into());
        }

        match first_error {
            None => {
                // The session id is the begin operation's product.
                println!("{}", session.name());
                Ok(())
            }
            Some(err) => {
                // Failed setup leaves no session behind.
                if let Err(teardown_err) = self.teardown(&session) {
                    warn!("session teardown after failed begin: {teardown_err}");
                }
                Err(err)
            }
        }
    }

    fn recover_session(&mut self, session: &Chroot) -> Result<()> {
        if !session.active() {
            return Err(SessionError::NoSuchChroot {
                name: session.name().to_owned(),
            }
            .into());
        }
        let ctx = self.setup_context();

        session
            .setup_lock(SetupPhase::RunStart, true, &ctx)
            .map_err(SessionError::from)?;
        let refresh = session
            .write_session_file(&self.session_dir)
            .map_err(SessionError::from);
        let unlock = session
            .setup_lock(SetupPhase::RunStop, false, &ctx)
            .map_err(SessionError::from);
        refresh?;
        unlock?;
        Ok(())
    }

    fn run_existing(&mut self, session: &Chroot) -> Result<()> {
        if !session.active() {
            return Err(SessionError::NoSuchChroot {
                name: session.name().to_owned(),
            }
            .into());
        }
        self.run_command_in(session)
    }

    fn end_session(&mut self, session: &Chroot) -> Result<()> {
        if !session.active() {
            return Err(SessionError::NoSuchChroot {
                name: session.name().to_owned(),
            }
            .into());
        }
        self.teardown(session)
    }

    /// The full per-chroot state machine for the automatic operation:
    /// setup start, run, unconditional teardown.
    fn activate_and_run(&mut self, chroot: &Chroot) -> Result<()> {
        let ctx = self.setup_context();

        // Nothing to undo if resource acquisition itself fails.
        chroot
            .setup_lock(SetupPhase::SetupStart, true, &ctx)
            .map_err(SessionError::from)?;

        let mut first_error: Option<Error> = None;

        if chroot.run_setup_scripts() {
            let env = self.script_environment(chroot);
            if let Err(err) = run_parts(&self.setup_dir, ScriptPhase::Start, &env) {
                first_error = Some(err.into());
            }
        }
        if let Err(err) = chroot.setup_lock(SetupPhase::SetupStart, false, &ctx) {
            record_error(&mut first_error, err.into());
        }

        if first_error.is_none() {
            if let Err(err) = self.run_command_in(chroot) {
                first_error = Some(err);
            }
        }

        // Teardown runs whatever happened above.
        if let Err(err) = self.teardown(chroot) {
            record_error(&mut first_error, err);
        }

        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Stop scripts and final lock release. Every step is attempted;
    /// the first error is reported.
    fn teardown(&self, chroot: &Chroot) -> Result<()> {
        let ctx = self.setup_context();
        let mut first_error: Option<Error> = None;

        if let Err(err) = chroot.setup_lock(SetupPhase::SetupStop, true, &ctx) {
            record_error(&mut first_error, Error::Session(err.into()));
        }
        if chroot.run_setup_scripts() {
            let env = self.script_environment(chroot);
            if let Err(err) = run_parts(&self.setup_dir, ScriptPhase::Stop, &env) {
                record_error(&mut first_error, err.into());
            }
        }
        if let Err(err) = chroot.setup_lock(SetupPhase::SetupStop, false, &ctx) {
            record_error(&mut first_error, Error::Session(err.into()));
        }

        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Steps 5–8: mark the run transition, fork and reap the child,
    /// release the run transition even when the child failed.
    fn run_command_in(&mut self, chroot: &Chroot) -> Result<()> {
        let ctx = self.setup_context();

        chroot
            .setup_lock(SetupPhase::RunStart, true, &ctx)
            .map_err(SessionError::from)?;

        let run_result = self.fork_and_wait(chroot);

        let ctx = self.setup_context();
        let unlock_result = chroot
            .setup_lock(SetupPhase::RunStop, false, &ctx)
            .map_err(SessionError::from);

        run_result?;
        unlock_result?;
        Ok(())
    }

    fn fork_and_wait(&mut self, chroot: &Chroot) -> Result<()> {
        let exec = self.build_exec(chroot)?;
        self.log_command(chroot, &exec);

        match unsafe { fork() } {
            Err(errno) => Err(SessionError::ForkFailed {
                source: std::io::Error::from_raw_os_error(errno as i32),
            }
            .into()),
            Ok(ForkResult::Child) => self.run_child(&exec),
            Ok(ForkResult::Parent { child }) => self.wait_for_child(child),
        }
    }

    /// The child's half of the fork. Never returns; every failure exits
    /// with a distinct non-zero code after printing to stderr, because
    /// there is no higher-level handler left to propagate to.
    fn run_child(&mut self, exec: &ExecPlan) -> ! {
        if let Err(err) = self.pam.open_session() {
            child_fail(&format!("PAM error: {err}"));
        }

        if setgid(exec.gid).is_err() {
            child_fail(&format!("could not set gid to '{}'", exec.gid));
        }
        if initgroups(&exec.user, exec.gid).is_err() {
            child_fail("could not set supplementary group IDs");
        }

        if let Err(err) = chdir(&exec.location) {
            child_fail(&format!(
                "could not chdir to '{}': {err}",
                exec.location.display()
            ));
        }
        if let Err(err) = enter_chroot(&exec.location) {
            child_fail(&format!(
                "could not chroot to '{}': {err}",
                exec.location.display()
            ));
        }

        if setuid(exec.uid).is_err() {
            child_fail(&format!("could not set uid to '{}'", exec.uid));
        }
        // Privilege must be verifiably gone: re-acquiring root has to fail.
        if !exec.uid.is_root() && setuid(Uid::from_raw(0)).is_ok() {
            child_fail("failed to drop root permissions");
        }

        if let Err(err) = chdir(&exec.cwd) {
            eprintln!(
                "schroot: warning: could not chdir to '{}': {err}",
                exec.cwd.display()
            );
        }

        if let Some(persona) = exec.personality {
            // SAFETY: plain syscall wrapper, no memory is touched.
            if unsafe { libc::personality(persona) } < 0 {
                eprintln!("schroot: warning: could not set personality");
            }
        }

        let argv: Vec<&CStr> = exec.argv.iter().map(CString::as_c_str).collect();
        let envp: Vec<&CStr> = exec.envp.iter().map(CString::as_c_str).collect();
        let _ = execve(&exec.file, &argv, &envp);
        eprintln!("schroot: could not exec '{}'", exec.file.to_string_lossy());
        unsafe { libc::_exit(EXIT_CHILD_EXEC) }
    }

    fn wait_for_child(&mut self, child: Pid) -> Result<()> {
        self.child_status = 1;

        let status = loop {
            match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, code)) => break ChildOutcome::Exited(code),
                Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
                    break ChildOutcome::Signalled(signal as i32, core_dumped)
                }
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(errno) => {
                    let _ = self.pam.close_session();
                    return Err(SessionError::WaitFailed {
                        source: std::io::Error::from_raw_os_error(errno as i32),
                    }
                    .into());
                }
            }
        };

        if let ChildOutcome::Exited(code) = status {
            self.child_status = code;
        }

        self.pam.close_session().map_err(SessionError::from)?;

        match status {
            ChildOutcome::Exited(0) => Ok(()),
            ChildOutcome::Exited(code) => Err(SessionError::ChildExitNonZero { code }.into()),
            ChildOutcome::Signalled(_, true) => Err(SessionError::ChildDumpedCore.into()),
            ChildOutcome::Signalled(signo, false) => {
                Err(SessionError::ChildSignalled { signo }.into())
            }
        }
    }

    /// Build everything the child needs before forking, so the child
    /// only performs syscalls.
    fn build_exec(&self, chroot: &Chroot) -> Result<ExecPlan> {
        let invalid = |reason: String| SessionError::InvalidCommand { reason };

        let env = self.pam.environment();
        let location = chroot.mount_location().to_owned();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));

        let (file, argv_strings, login_shell) = if self.command.is_empty() {
            let shell = if self.credentials.shell.as_os_str().is_empty() {
                "/bin/sh".to_owned()
            } else {
                self.credentials.shell.to_string_lossy().into_owned()
            };
            if self.preserve_environment.is_none() {
                // Login shell: "-" plus the shell's basename as argv[0].
                let argv0 = format!("-{}", util::basename(&shell));
                (shell, vec![argv0], true)
            } else {
                (shell.clone(), vec![shell], false)
            }
        } else {
            let mut command = chroot.command_prefix().to_vec();
            command.extend(self.command.iter().cloned());
            let file = util::find_program_in_path(&command[0], env.get("PATH"))
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or_else(|| command[0].clone());
            (file, command, false)
        };

        let summary = argv_strings.join(" ");

        let to_cstring = |s: &str| {
            CString::new(s).map_err(|_| invalid(format!("argument contains NUL byte: {s}")))
        };

        let file_c = to_cstring(&file)?;
        let argv = argv_strings
            .iter()
            .map(|arg| to_cstring(arg))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let user = to_cstring(&self.credentials.user)?;

        Ok(ExecPlan {
            file: file_c,
            argv,
            envp: env.to_cstrings(),
            uid: Uid::from_raw(self.credentials.uid),
            gid: Gid::from_raw(self.credentials.gid),
            user,
            location,
            cwd,
            personality: personality_value(chroot.personality()),
            summary,
            login_shell,
        })
    }

    /// The environment handed to setup scripts.
    fn script_environment(&self, chroot: &Chroot) -> Environment {
        let mut env = Environment::new();
        chroot.setup_env(&mut env);
        env.add("AUTH_USER", &self.credentials.user);
        env.add(
            "AUTH_QUIET",
            if self.verbosity == Verbosity::Quiet {
                "true"
            } else {
                "false"
            },
        );
        env
    }

    /// The environment handed to the command: the caller's (when
    /// preserved) or a fresh login environment for the target user.
    fn build_environment(&self) -> Environment {
        if let Some(env) = &self.preserve_environment {
            return env.clone();
        }
        let mut env = Environment::new();
        env.add("HOME", &self.credentials.home.to_string_lossy());
        env.add("LOGNAME", &self.credentials.user);
        env.add("USER", &self.credentials.user);
        env.add(
            "PATH",
            if self.credentials.uid == 0 {
                "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
            } else {
                "/usr/local/bin:/usr/bin:/bin"
            },
        );
        env.add("SHELL", &self.credentials.shell.to_string_lossy());
        if let Ok(term) = std::env::var("TERM") {
            env.add("TERM", &term);
        }
        env
    }

    fn log_command(&self, chroot: &Chroot, exec: &ExecPlan) {
        let what = if self.command.is_empty() {
            if exec.login_shell {
                "Running login shell"
            } else {
                "Running shell"
            }
        } else {
            "Running command"
        };
        let target = if self.command.is_empty() {
            exec.file.to_string_lossy().into_owned()
        } else {
            exec.summary.clone()
        };

        util::syslog_notice(&format!(
            "[{} chroot] ({}->{}) {}: \"{}\"",
            chroot.name(),
            self.credentials.ruser,
            self.credentials.user,
            what,
            target
        ));

        if self.verbosity != Verbosity::Quiet {
            if self.credentials.ruid == self.credentials.uid {
                eprintln!("[{} chroot] {}: \"{}\"", chroot.name(), what, target);
            } else {
                eprintln!(
                    "[{} chroot] ({}->{}) {}: \"{}\"",
                    chroot.name(),
                    self.credentials.ruser,
                    self.credentials.user,
                    what,
                    target
                );
            }
        }
    }
}

#[derive(Clone, Copy)]
enum ChildOutcome {
    Exited(i32),
    Signalled(i32, bool),
}

struct ExecPlan {
    file: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    uid: Uid,
    gid: Gid,
    user: CString,
    location: PathBuf,
    cwd: PathBuf,
    personality: Option<libc::c_ulong>,
    summary: String,
    login_shell: bool,
}

fn record_error(first_error: &mut Option<Error>, err: Error) {
    match first_error {
        Some(_) => warn!("additional failure during teardown: {err}"),
        None => *first_error = Some(err),
    }
}

fn child_fail(message: &str) -> ! {
    eprintln!("schroot: {message}");
    unsafe { libc::_exit(EXIT_CHILD_SETUP) }
}

const PER_LINUX: libc::c_ulong = 0x0000;
const PER_LINUX32: libc::c_ulong = 0x0008;

/// Map a configured personality name to the kernel value. Unknown names
/// warn and are ignored.
fn personality_value(name: &str) -> Option<libc::c_ulong> {
    match name {
        "" | "undefined" => None,
        "linux" => Some(PER_LINUX),
        "linux32" => Some(PER_LINUX32),
        _ => {
            warn!("{name}: unknown personality, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyfile::Keyfile;
    use std::path::Path;

    fn credentials(ruid: u32, uid: u32) -> Credentials {
        Credentials {
            ruid,
            ruser: "caller".to_owned(),
            uid,
            gid: uid,
            user: if uid == 0 {
                "root".to_owned()
            } else {
                "target".to_owned()
            },
            shell: PathBuf::from("/bin/bash"),
            home: PathBuf::from("/home/caller"),
        }
    }

    fn config_from(text: &str) -> Config {
        let kf = Keyfile::parse(text.as_bytes()).expect("parse");
        let mut config = Config::new();
        config
            .add_keyfile(&kf, Path::new("test.conf"))
            .expect("add_keyfile");
        config
    }

    #[test]
    fn session_ids_are_valid_names_derived_from_the_template() {
        let config = config_from(
            "[unstable]\ntype=lvm-snapshot\ndevice=/dev/vg/unstable\n\
             mount-location=/mnt/unstable\ngroups=sbuild\nlvm-snapshot-options=-L,1G\n",
        );
        let session = Session::new(
            &config,
            Operation::Begin,
            vec!["unstable".to_owned()],
            credentials(1000, 1000),
        );
        let template = config.find_by_alias("unstable").expect("template");
        let minted = session.mint_session(template).expect("mint");

        assert!(minted.name().starts_with("unstable-"));
        assert!(minted.active());
        assert!(crate::chroot::valid_name(minted.name()));
        assert_eq!(
            minted.mount_device(),
            Some(Path::new(&format!("/dev/vg/{}", minted.name())) as &Path)
        );
    }

    #[test]
    fn unknown_chroot_is_rejected_before_side_effects() {
        let config = config_from("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n");
        let mut session = Session::new(
            &config,
            Operation::Automatic,
            vec!["missing".to_owned()],
            credentials(1000, 1000),
        );
        let err = session.run().unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::NoSuchChroot { ref name }) if name == "missing"
        ));
    }

    #[test]
    fn begin_requires_a_session_capable_chroot() {
        let config = config_from("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n");
        let template = config.find_by_alias("sid").expect("template").clone();
        let mut session = Session::new(
            &config,
            Operation::Begin,
            vec!["sid".to_owned()],
            credentials(1000, 1000),
        );
        let err = session.begin_session(&template).unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::CreateForbidden { .. })
        ));
    }

    #[test]
    fn ending_a_template_is_no_such_chroot() {
        let config = config_from("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n");
        let template = config.find_by_alias("sid").expect("template").clone();
        let mut session = Session::new(
            &config,
            Operation::End,
            vec!["sid".to_owned()],
            credentials(1000, 1000),
        );
        let err = session.end_session(&template).unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::NoSuchChroot { .. })
        ));
    }

    #[test]
    fn login_shell_argv_uses_dash_basename() {
        let config = config_from("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n");
        let chroot = config.find_by_alias("sid").expect("chroot").clone();
        let session = Session::new(
            &config,
            Operation::Automatic,
            vec!["sid".to_owned()],
            credentials(1000, 1000),
        );
        let exec = session.build_exec(&chroot).expect("exec plan");
        assert_eq!(exec.file.to_bytes(), b"/bin/bash");
        assert_eq!(exec.argv.len(), 1);
        assert_eq!(exec.argv[0].to_bytes(), b"-bash");
        assert!(exec.login_shell);
    }

    #[test]
    fn preserved_environment_disables_login_shell_form() {
        let config = config_from("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n");
        let chroot = config.find_by_alias("sid").expect("chroot").clone();
        let mut session = Session::new(
            &config,
            Operation::Automatic,
            vec!["sid".to_owned()],
            credentials(1000, 1000),
        );
        session.set_preserve_environment(Environment::from_current());
        let exec = session.build_exec(&chroot).expect("exec plan");
        assert_eq!(exec.argv[0].to_bytes(), b"/bin/bash");
        assert!(!exec.login_shell);
    }

    #[test]
    fn command_prefix_is_prepended() {
        let config = config_from(
            "[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\ncommand-prefix=nice,-n,19\n",
        );
        let chroot = config.find_by_alias("sid").expect("chroot").clone();
        let mut session = Session::new(
            &config,
            Operation::Automatic,
            vec!["sid".to_owned()],
            credentials(1000, 1000),
        );
        session.set_command(vec!["/bin/true".to_owned()]);
        let exec = session.build_exec(&chroot).expect("exec plan");
        let argv: Vec<_> = exec.argv.iter().map(|a| a.to_bytes()).collect();
        assert_eq!(
            argv,
            [b"nice".as_slice(), b"-n".as_slice(), b"19".as_slice(), b"/bin/true".as_slice()]
        );
    }

    #[test]
    fn login_environment_is_minimal() {
        let config = config_from("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n");
        let session = Session::new(
            &config,
            Operation::Automatic,
            vec!["sid".to_owned()],
            credentials(1000, 1000),
        );
        let env = session.build_environment();
        assert_eq!(env.get("HOME"), Some("/home/caller"));
        assert_eq!(env.get("USER"), Some("target"));
        assert_eq!(env.get("LOGNAME"), Some("target"));
        assert_eq!(env.get("SHELL"), Some("/bin/bash"));
        assert_eq!(env.get("PATH"), Some("/usr/local/bin:/usr/bin:/bin"));
    }

    #[test]
    fn script_environment_carries_chroot_and_auth_bindings() {
        let config = config_from("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n");
        let chroot = config.find_by_alias("sid").expect("chroot").clone();
        let mut session = Session::new(
            &config,
            Operation::Automatic,
            vec!["sid".to_owned()],
            credentials(1000, 0),
        );
        session.set_verbosity(Verbosity::Quiet);
        let env = session.script_environment(&chroot);
        assert_eq!(env.get("CHROOT_TYPE"), Some("plain"));
        assert_eq!(env.get("CHROOT_NAME"), Some("sid"));
        assert_eq!(env.get("CHROOT_LOCATION"), Some("/srv/chroot/sid"));
        assert_eq!(env.get("AUTH_USER"), Some("root"));
        assert_eq!(env.get("AUTH_QUIET"), Some("true"));
    }

    #[test]
    fn personality_names_map_to_kernel_values() {
        assert_eq!(personality_value(""), None);
        assert_eq!(personality_value("undefined"), None);
        assert_eq!(personality_value("linux"), Some(PER_LINUX));
        assert_eq!(personality_value("linux32"), Some(PER_LINUX32));
        assert_eq!(personality_value("hurd"), None);
    }
}
