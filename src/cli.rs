//! Command-line surface and action dispatch.
//!
//! Resolves the option set to one action, loads the right configuration
//! sources for it (templates, sessions, or both), and drives a
//! [`Session`] for the lifecycle operations. Fatal errors print one line
//! to stderr, go to syslog, and map to distinct exit codes.

use crate::auth::Credentials;
use crate::config::Config;
use crate::environment::Environment;
use crate::session::{Operation, Session, SESSION_DIR, SETUP_DIR};
use crate::types::{Error, Verbosity};
use crate::util;
use anyhow::Context;
use clap::Parser;
use std::io;
use std::path::PathBuf;

/// Default chroot definition file.
pub const SCHROOT_CONF: &str = "/etc/schroot/schroot.conf";

#[derive(Debug, Parser)]
#[command(
    name = "schroot",
    version,
    about = "Securely enter a chroot environment",
    long_about = None
)]
pub struct Options {
    /// List available chroots
    #[arg(short = 'l', long)]
    list: bool,

    /// Show information about the selected chroots
    #[arg(short = 'i', long)]
    info: bool,

    /// Dump configuration of the selected chroots
    #[arg(long)]
    config: bool,

    /// Select all chroots and active sessions
    #[arg(short = 'a', long)]
    all: bool,

    /// Select all chroots
    #[arg(long)]
    all_chroots: bool,

    /// Select all active sessions
    #[arg(long)]
    all_sessions: bool,

    /// Use the specified chroot (may be repeated)
    #[arg(short = 'c', long = "chroot", value_name = "CHROOT")]
    chroots: Vec<String>,

    /// Username (default root)
    #[arg(short = 'u', long, value_name = "USER")]
    user: Option<String>,

    /// Preserve the user's environment
    #[arg(short = 'p', long)]
    preserve_environment: bool,

    /// Show less output
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Show more output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Begin a session; returns a session ID
    #[arg(short = 'b', long)]
    begin_session: bool,

    /// Recover an existing session
    #[arg(long)]
    recover_session: bool,

    /// Run an existing session
    #[arg(short = 'r', long)]
    run_session: bool,

    /// End an existing session
    #[arg(short = 'e', long)]
    end_session: bool,

    /// Force operation, even if it fails
    #[arg(short = 'f', long)]
    force: bool,

    /// Chroot definition file (internal override)
    #[arg(long, hide = true, default_value = SCHROOT_CONF)]
    conf: PathBuf,

    /// Session directory (internal override)
    #[arg(long, hide = true, default_value = SESSION_DIR)]
    session_dir: PathBuf,

    /// Setup script directory (internal override)
    #[arg(long, hide = true, default_value = SETUP_DIR)]
    setup_dir: PathBuf,

    /// Command to run inside the chroot
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Action {
    List,
    Info,
    DumpConfig,
    Session(Operation),
}

impl Options {
    /// Resolve the flags to a single action.
    fn action(&self) -> Result<Action, String> {
        let mut actions = Vec::new();
        if self.list {
            actions.push(Action::List);
        }
        if self.info {
            actions.push(Action::Info);
        }
        if self.config {
            actions.push(Action::DumpConfig);
        }
        if self.begin_session {
            actions.push(Action::Session(Operation::Begin));
        }
        if self.recover_session {
            actions.push(Action::Session(Operation::Recover));
        }
        if self.run_session {
            actions.push(Action::Session(Operation::Run));
        }
        if self.end_session {
            actions.push(Action::Session(Operation::End));
        }
        match actions.as_slice() {
            [] => Ok(Action::Session(Operation::Automatic)),
            [action] => Ok(*action),
            _ => Err("only one action may be specified".to_owned()),
        }
    }

    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

/// Entry point for the schroot binary; returns the process exit status.
pub fn run() -> anyhow::Result<i32> {
    env_logger::init();
    util::open_syslog();
    let options = Options::parse();
    let code = run_inner(&options);
    util::close_syslog();
    code
}

fn run_inner(options: &Options) -> anyhow::Result<i32> {
    let action = match options.action() {
        Ok(action) => action,
        Err(message) => {
            eprintln!("schroot: {message}");
            return Ok(2);
        }
    };

    let mut config = Config::new();
    if let Err(err) = load_config(&mut config, options, action) {
        return Ok(report(&err.into()));
    }

    if config.is_empty() {
        if !options.quiet {
            eprintln!(
                "schroot: no chroots are defined in {}",
                options.conf.display()
            );
        }
        return Ok(1);
    }

    if action == Action::List {
        config
            .print_list(&mut io::stdout())
            .context("writing chroot list")?;
        return Ok(0);
    }

    let chroots = match selected_chroots(&config, options) {
        Some(chroots) => chroots,
        None => return Ok(1),
    };
    if chroots.is_empty() {
        eprintln!("schroot: no chroots selected");
        return Ok(1);
    }

    let operation = match action {
        Action::Info => {
            config
                .print_info(&chroots, &mut io::stdout())
                .context("writing chroot info")?;
            return Ok(0);
        }
        Action::DumpConfig => {
            config
                .print_config(&chroots, &mut io::stdout())
                .context("writing chroot configuration")?;
            return Ok(0);
        }
        Action::List => unreachable!("handled above"),
        Action::Session(operation) => operation,
    };

    if operation == Operation::Begin && chroots.len() != 1 {
        eprintln!("schroot: only one chroot may be specified when beginning a session");
        return Ok(1);
    }

    let mut credentials = match Credentials::from_current() {
        Ok(credentials) => credentials,
        Err(err) => return Ok(report(&err.into())),
    };
    if let Some(user) = &options.user {
        if let Err(err) = credentials.set_user(user) {
            return Ok(report(&err.into()));
        }
    }

    let mut session = Session::new(&config, operation, chroots, credentials);
    session.set_command(options.command.clone());
    session.set_force(options.force);
    session.set_verbosity(options.verbosity());
    session.set_session_dir(options.session_dir.clone());
    session.set_setup_dir(options.setup_dir.clone());
    if options.preserve_environment {
        session.set_preserve_environment(Environment::from_current());
    }

    match session.run() {
        Ok(()) => Ok(session.child_status()),
        Err(err) => Ok(report(&err)),
    }
}

/// Which configuration sources an action needs. Templates serve the
/// listing actions and new sessions; the session directory serves the
/// listing actions and existing sessions.
fn load_config(
    config: &mut Config,
    options: &Options,
    action: Action,
) -> Result<(), crate::types::ConfigError> {
    let load_chroots = match action {
        Action::List | Action::Info | Action::DumpConfig => true,
        Action::Session(Operation::Automatic | Operation::Begin) => true,
        Action::Session(_) => options.all || options.all_chroots,
    };
    let load_sessions = match action {
        Action::List | Action::Info | Action::DumpConfig => true,
        Action::Session(Operation::Run | Operation::Recover | Operation::End) => true,
        Action::Session(_) => options.all || options.all_sessions,
    };

    if load_chroots {
        config.add_file(&options.conf)?;
    }
    if load_sessions && options.session_dir.is_dir() {
        config.add_directory(&options.session_dir)?;
    }
    Ok(())
}

/// The chroots the invocation selects: the named ones (validated), or
/// every known chroot/session under `--all*`.
fn selected_chroots(config: &Config, options: &Options) -> Option<Vec<String>> {
    if options.all || options.all_chroots || options.all_sessions {
        let want_chroots = options.all || options.all_chroots;
        let want_sessions = options.all || options.all_sessions;
        let names = config
            .chroots()
            .iter()
            .filter(|c| if c.active() { want_sessions } else { want_chroots })
            .map(|c| c.name().to_owned())
            .collect();
        Some(names)
    } else {
        let invalid = config.validate(&options.chroots);
        if !invalid.is_empty() {
            for name in &invalid {
                eprintln!("schroot: {name}: no such chroot");
            }
            return None;
        }
        Some(options.chroots.clone())
    }
}

/// One line to stderr, one syslog record, one exit status.
fn report(err: &Error) -> i32 {
    let message = err.to_string();
    eprintln!("schroot: {message}");
    util::syslog_notice(&message);
    err.exit_status()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> Options {
        let mut argv = vec!["schroot"];
        argv.extend(args);
        Options::try_parse_from(argv).expect("parse failed")
    }

    #[test]
    fn no_flags_means_automatic() {
        let opts = options(&["-c", "sid", "--", "/bin/true"]);
        assert_eq!(
            opts.action().expect("action"),
            Action::Session(Operation::Automatic)
        );
        assert_eq!(opts.chroots, ["sid"]);
        assert_eq!(opts.command, ["/bin/true"]);
    }

    #[test]
    fn session_flags_map_to_operations() {
        assert_eq!(
            options(&["--begin-session", "-c", "unstable"])
                .action()
                .expect("action"),
            Action::Session(Operation::Begin)
        );
        assert_eq!(
            options(&["--recover-session", "-c", "sess"])
                .action()
                .expect("action"),
            Action::Session(Operation::Recover)
        );
        assert_eq!(
            options(&["--run-session", "-c", "sess"])
                .action()
                .expect("action"),
            Action::Session(Operation::Run)
        );
        assert_eq!(
            options(&["--end-session", "-c", "sess"])
                .action()
                .expect("action"),
            Action::Session(Operation::End)
        );
    }

    #[test]
    fn listing_actions_parse() {
        assert_eq!(options(&["--list"]).action().expect("action"), Action::List);
        assert_eq!(options(&["--info", "-c", "sid"]).action().expect("action"), Action::Info);
        assert_eq!(
            options(&["--config", "-c", "sid"]).action().expect("action"),
            Action::DumpConfig
        );
    }

    #[test]
    fn conflicting_actions_are_rejected() {
        let opts = options(&["--list", "--info"]);
        assert!(opts.action().is_err());
    }

    #[test]
    fn repeated_chroot_flag_accumulates() {
        let opts = options(&["-c", "sid", "-c", "etch", "--", "/bin/true"]);
        assert_eq!(opts.chroots, ["sid", "etch"]);
    }

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(options(&["-q", "-v"]).verbosity(), Verbosity::Quiet);
        assert_eq!(options(&["-v"]).verbosity(), Verbosity::Verbose);
        assert_eq!(options(&[]).verbosity(), Verbosity::Normal);
    }

    #[test]
    fn directory_overrides_default_sanely() {
        let opts = options(&[]);
        assert_eq!(opts.conf, PathBuf::from(SCHROOT_CONF));
        assert_eq!(opts.session_dir, PathBuf::from(SESSION_DIR));
        assert_eq!(opts.setup_dir, PathBuf::from(SETUP_DIR));
    }
}
