//! PAM collaborator seam.
//!
//! The conversation-driven PAM stack is surface plumbing outside this
//! crate; the session engine programs against the [`Pam`] trait and any
//! real driver slots in behind it. [`DirectPam`] is the shipped
//! implementation for the no-prompt path: sessions open and close
//! without a PAM transaction, and password authentication is refused
//! rather than silently granted.

use crate::environment::Environment;
use crate::types::AuthError;
use log::debug;

pub trait Pam {
    /// Authenticate the named user, prompting as needed.
    fn authenticate(&mut self, user: &str) -> Result<(), AuthError>;

    /// Open the session bracket around the privileged region.
    fn open_session(&mut self) -> Result<(), AuthError>;

    /// Close the session bracket.
    fn close_session(&mut self) -> Result<(), AuthError>;

    /// Replace the environment handed to the exec'd program.
    fn set_environment(&mut self, env: Environment);

    /// The prepared environment passed to `execve`.
    fn environment(&self) -> &Environment;
}

#[derive(Debug, Default)]
pub struct DirectPam {
    env: Environment,
    session_open: bool,
}

impl DirectPam {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pam for DirectPam {
    fn authenticate(&mut self, user: &str) -> Result<(), AuthError> {
        Err(AuthError::PamFailure {
            reason: format!("password authentication for \"{user}\" requires a PAM conversation"),
        })
    }

    fn open_session(&mut self) -> Result<(), AuthError> {
        debug!("opening session (no PAM transaction)");
        self.session_open = true;
        Ok(())
    }

    fn close_session(&mut self) -> Result<(), AuthError> {
        debug!("closing session (no PAM transaction)");
        self.session_open = false;
        Ok(())
    }

    fn set_environment(&mut self, env: Environment) {
        self.env = env;
    }

    fn environment(&self) -> &Environment {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_pam_refuses_password_authentication() {
        let mut pam = DirectPam::new();
        assert!(matches!(
            pam.authenticate("root"),
            Err(AuthError::PamFailure { .. })
        ));
    }

    #[test]
    fn direct_pam_brackets_sessions() {
        let mut pam = DirectPam::new();
        pam.open_session().expect("open");
        pam.close_session().expect("close");
    }

    #[test]
    fn environment_round_trips() {
        let mut pam = DirectPam::new();
        let mut env = Environment::new();
        env.add("HOME", "/root");
        pam.set_environment(env.clone());
        assert_eq!(pam.environment(), &env);
    }
}
