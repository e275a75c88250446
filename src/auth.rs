//! Authorisation policy: who may enter a chroot, and as whom.
//!
//! The caller's group memberships are evaluated against each chroot's
//! `groups` and `root-groups`. Across several chroots the most
//! restrictive outcome wins: `Fail > User > None`.

use crate::chroot::Chroot;
use crate::types::AuthError;
use log::warn;
use nix::unistd::{getegid, getgroups, getuid, Group, User};
use std::path::PathBuf;

/// Authentication requirement for a session.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub enum AuthStatus {
    /// No authentication needed.
    #[default]
    None,
    /// The user must authenticate themselves (password).
    User,
    /// Access is denied outright.
    Fail,
}

impl AuthStatus {
    /// Combine with another requirement; the more restrictive one wins.
    pub fn escalate(self, other: AuthStatus) -> AuthStatus {
        self.max(other)
    }
}

/// The invoking user and the identity the command will run as.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Real uid of the invoking user.
    pub ruid: u32,
    /// Name of the invoking user.
    pub ruser: String,
    /// Target uid the command runs as.
    pub uid: u32,
    /// Target primary gid.
    pub gid: u32,
    /// Target user name.
    pub user: String,
    /// Target user's login shell.
    pub shell: PathBuf,
    /// Target user's home directory.
    pub home: PathBuf,
}

impl Credentials {
    /// Resolve the invoking user from the real uid. The target identity
    /// defaults to root; `set_user` overrides it.
    pub fn from_current() -> Result<Self, AuthError> {
        let ruid = getuid();
        let invoking = User::from_uid(ruid)
            .ok()
            .flatten()
            .ok_or_else(|| AuthError::UnknownUser {
                user: ruid.to_string(),
            })?;

        let mut credentials = Credentials {
            ruid: ruid.as_raw(),
            ruser: invoking.name,
            uid: 0,
            gid: 0,
            user: String::new(),
            shell: PathBuf::new(),
            home: PathBuf::new(),
        };
        credentials.set_user("root")?;
        Ok(credentials)
    }

    /// Change the target identity.
    pub fn set_user(&mut self, name: &str) -> Result<(), AuthError> {
        let user = User::from_name(name)
            .ok()
            .flatten()
            .ok_or_else(|| AuthError::UnknownUser {
                user: name.to_owned(),
            })?;
        self.uid = user.uid.as_raw();
        self.gid = user.gid.as_raw();
        self.user = user.name;
        self.shell = user.shell;
        self.home = user.dir;
        Ok(())
    }
}

/// Whether the calling process belongs to the named group, by effective
/// or supplementary gid. A group unknown to the system cannot authorise
/// anyone and counts as a non-membership.
pub fn is_group_member(group: &str) -> bool {
    let resolved = match Group::from_name(group) {
        Ok(Some(resolved)) => resolved,
        Ok(None) => {
            warn!("{group}: group not found");
            return false;
        }
        Err(err) => {
            warn!("{group}: group lookup failed: {err}");
            return false;
        }
    };

    if getegid() == resolved.gid {
        return true;
    }
    match getgroups() {
        Ok(supplementary) => supplementary.contains(&resolved.gid),
        Err(err) => {
            warn!("cannot read supplementary groups: {err}");
            false
        }
    }
}

/// Evaluate the decision table for one chroot against the caller's real
/// memberships.
pub fn require_auth(credentials: &Credentials, chroot: &Chroot) -> AuthStatus {
    require_auth_with(credentials, chroot, &is_group_member)
}

/// Table-driven core, with membership injectable for tests.
pub fn require_auth_with(
    credentials: &Credentials,
    chroot: &Chroot,
    member: &dyn Fn(&str) -> bool,
) -> AuthStatus {
    let in_groups = chroot.groups().iter().any(|g| member(g));
    let in_root_groups = chroot.root_groups().iter().any(|g| member(g));

    if !in_groups {
        return AuthStatus::Fail;
    }
    // No prompt when the uid does not change, or when entering as root
    // from a root group.
    if credentials.uid == credentials.ruid || (credentials.uid == 0 && in_root_groups) {
        AuthStatus::None
    } else {
        AuthStatus::User
    }
}
