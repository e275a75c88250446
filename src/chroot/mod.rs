//! Chroot descriptors.
//!
//! A [`Chroot`] holds the attributes every chroot shares; the
//! [`ChrootKind`] tagged union holds variant-specific state. Shared
//! behaviour lives here and pattern-matches the kind, so each variant
//! file only carries its own fields and policy.

mod block_device;
mod file;
mod lvm_snapshot;
mod plain;

pub use block_device::BlockDeviceChroot;
pub use file::FileChroot;
pub use lvm_snapshot::LvmSnapshotChroot;
pub use plain::PlainChroot;

use crate::environment::Environment;
use crate::keyfile::{Keyfile, Priority};
use crate::lock::{DeviceLock, LockKind, SETUP_LOCK_TIMEOUT};
use crate::types::{ChrootError, KeyfileError, LockError};
use crate::util;
use log::warn;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Setup transition passed to [`Chroot::setup_lock`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetupPhase {
    SetupStart,
    SetupStop,
    RunStart,
    RunStop,
}

/// Whether a chroot variant needs a persisted session to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionFlags {
    None,
    CreateSession,
}

/// Context threaded through setup-lock transitions.
#[derive(Clone, Copy, Debug)]
pub struct SetupContext<'a> {
    /// Directory holding persisted session files.
    pub session_dir: &'a Path,
    /// Bypass lock-compatibility checks (operator cleanup).
    pub force: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChrootKind {
    Plain(PlainChroot),
    BlockDevice(BlockDeviceChroot),
    LvmSnapshot(LvmSnapshotChroot),
    File(FileChroot),
}

impl Default for ChrootKind {
    fn default() -> Self {
        ChrootKind::Plain(PlainChroot::default())
    }
}

/// A configured chroot: either a template parsed from configuration, or
/// (when `active`) a persisted session instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Chroot {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) priority: u32,
    pub(crate) aliases: Vec<String>,
    pub(crate) groups: Vec<String>,
    pub(crate) root_groups: Vec<String>,
    pub(crate) run_setup_scripts: bool,
    pub(crate) run_exec_scripts: bool,
    pub(crate) command_prefix: Vec<String>,
    pub(crate) personality: String,
    pub(crate) active: bool,
    pub(crate) kind: ChrootKind,
}

impl Chroot {
    /// Construct a chroot from a keyfile group. The `type` key selects
    /// the variant, defaulting to `plain`.
    pub fn from_keyfile(kf: &Keyfile, group: &str) -> Result<Chroot, ChrootError> {
        if !valid_name(group) {
            return Err(ChrootError::InvalidName {
                name: group.to_owned(),
            });
        }

        let active = kf
            .get_value::<bool>(group, "active", Priority::Optional)?
            .unwrap_or(false);

        // Historical key, superseded by run-setup-scripts.
        let _ = kf.get_value::<bool>(group, "run-session-scripts", Priority::Obsolete)?;

        let kind_name: String = kf
            .get_value(group, "type", Priority::Optional)?
            .unwrap_or_else(|| "plain".to_owned());
        let kind = match kind_name.as_str() {
            "plain" => ChrootKind::Plain(PlainChroot::from_keyfile(kf, group)?),
            "block-device" => ChrootKind::BlockDevice(BlockDeviceChroot::from_keyfile(kf, group)?),
            "lvm-snapshot" => {
                ChrootKind::LvmSnapshot(LvmSnapshotChroot::from_keyfile(kf, group, active)?)
            }
            "file" => ChrootKind::File(FileChroot::from_keyfile(kf, group)?),
            _ => {
                return Err(ChrootError::Keyfile(KeyfileError::InvalidValue {
                    group: group.to_owned(),
                    key: "type".to_owned(),
                    value: kind_name,
                }))
            }
        };

        Ok(Chroot {
            name: group.to_owned(),
            description: kf
                .get_value(group, "description", Priority::Optional)?
                .unwrap_or_default(),
            priority: kf
                .get_value(group, "priority", Priority::Optional)?
                .unwrap_or(0),
            aliases: kf
                .get_list_value(group, "aliases", Priority::Optional)?
                .unwrap_or_default(),
            groups: kf
                .get_list_value(group, "groups", Priority::Required)?
                .unwrap_or_default(),
            root_groups: kf
                .get_list_value(group, "root-groups", Priority::Optional)?
                .unwrap_or_default(),
            run_setup_scripts: kf
                .get_value(group, "run-setup-scripts", Priority::Optional)?
                .unwrap_or(false),
            run_exec_scripts: kf
                .get_value(group, "run-exec-scripts", Priority::Optional)?
                .unwrap_or(false),
            command_prefix: kf
                .get_list_value(group, "command-prefix", Priority::Optional)?
                .unwrap_or_default(),
            personality: kf
                .get_value(group, "personality", Priority::Optional)?
                .unwrap_or_default(),
            active,
            kind,
        })
    }

    /// Serialise into a keyfile group named after the chroot. Unset
    /// optional attributes are omitted.
    pub fn to_keyfile(&self, kf: &mut Keyfile) {
        let group = self.name.as_str();
        kf.set_group(group, "");
        kf.set_value(group, "type", self.chroot_type());
        if self.active {
            kf.set_value(group, "active", &self.active);
        }
        if !self.description.is_empty() {
            kf.set_value(group, "description", &self.description);
        }
        if self.priority != 0 {
            kf.set_value(group, "priority", &self.priority);
        }
        if !self.aliases.is_empty() {
            kf.set_list_value(group, "aliases", &self.aliases);
        }
        kf.set_list_value(group, "groups", &self.groups);
        if !self.root_groups.is_empty() {
            kf.set_list_value(group, "root-groups", &self.root_groups);
        }
        if self.run_setup_scripts {
            kf.set_value(group, "run-setup-scripts", &self.run_setup_scripts);
        }
        if self.run_exec_scripts {
            kf.set_value(group, "run-exec-scripts", &self.run_exec_scripts);
        }
        if !self.command_prefix.is_empty() {
            kf.set_list_value(group, "command-prefix", &self.command_prefix);
        }
        if !self.personality.is_empty() {
            kf.set_value(group, "personality", &self.personality);
        }
        match &self.kind {
            ChrootKind::Plain(plain) => plain.to_keyfile(kf, group),
            ChrootKind::BlockDevice(bd) => bd.to_keyfile(kf, group),
            ChrootKind::LvmSnapshot(lvm) => lvm.to_keyfile(kf, group),
            ChrootKind::File(file) => file.to_keyfile(kf, group),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn root_groups(&self) -> &[String] {
        &self.root_groups
    }

    pub fn run_setup_scripts(&self) -> bool {
        self.run_setup_scripts
    }

    pub fn run_exec_scripts(&self) -> bool {
        self.run_exec_scripts
    }

    pub fn command_prefix(&self) -> &[String] {
        &self.command_prefix
    }

    pub fn personality(&self) -> &str {
        &self.personality
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn kind(&self) -> &ChrootKind {
        &self.kind
    }

    pub fn chroot_type(&self) -> &'static str {
        match &self.kind {
            ChrootKind::Plain(_) => "plain",
            ChrootKind::BlockDevice(_) => "block-device",
            ChrootKind::LvmSnapshot(_) => "lvm-snapshot",
            ChrootKind::File(_) => "file",
        }
    }

    /// The path that becomes the chroot root.
    pub fn mount_location(&self) -> &Path {
        match &self.kind {
            ChrootKind::Plain(plain) => &plain.location,
            ChrootKind::BlockDevice(bd) => &bd.mount_location,
            ChrootKind::LvmSnapshot(lvm) => &lvm.base.mount_location,
            ChrootKind::File(file) => &file.location,
        }
    }

    /// The device mounted at the mount location, where the variant has
    /// one. Snapshots report the snapshot device while active.
    pub fn mount_device(&self) -> Option<&Path> {
        match &self.kind {
            ChrootKind::Plain(_) | ChrootKind::File(_) => None,
            ChrootKind::BlockDevice(bd) => Some(&bd.device),
            ChrootKind::LvmSnapshot(lvm) => Some(lvm.mount_device(self.active)),
        }
    }

    pub fn session_flags(&self) -> SessionFlags {
        match &self.kind {
            ChrootKind::LvmSnapshot(_) => SessionFlags::CreateSession,
            _ => SessionFlags::None,
        }
    }

    /// Export the CHROOT_* bindings for setup scripts.
    pub fn setup_env(&self, env: &mut Environment) {
        env.add("CHROOT_TYPE", self.chroot_type());
        env.add("CHROOT_NAME", &self.name);
        env.add("CHROOT_DESCRIPTION", &self.description);
        env.add("CHROOT_LOCATION", &self.mount_location().to_string_lossy());
        match &self.kind {
            ChrootKind::Plain(_) => {}
            ChrootKind::BlockDevice(bd) => bd.setup_env(env),
            ChrootKind::LvmSnapshot(lvm) => lvm.setup_env(env),
            ChrootKind::File(file) => file.setup_env(env),
        }
    }

    /// Acquire or release the variant's resources for a setup transition.
    pub fn setup_lock(
        &self,
        phase: SetupPhase,
        acquire: bool,
        ctx: &SetupContext<'_>,
    ) -> Result<(), ChrootError> {
        match &self.kind {
            // Plain chroots do no locking.
            ChrootKind::Plain(_) => Ok(()),
            ChrootKind::BlockDevice(bd) => bd.setup_lock(&self.name, phase, acquire, ctx.force),
            ChrootKind::LvmSnapshot(lvm) => lvm.setup_lock(self, phase, acquire, ctx),
            ChrootKind::File(file) => file.setup_lock(phase, acquire, ctx.force),
        }
    }

    /// Turn a cloned template into a session instance: the generated id
    /// becomes the name, the instance goes active, and session-capable
    /// variants derive their resource handles from it.
    pub fn prepare_session(&mut self, session_id: &str) {
        self.name = session_id.to_owned();
        self.aliases.clear();
        self.active = true;
        if let ChrootKind::LvmSnapshot(lvm) = &mut self.kind {
            let dir = lvm
                .base
                .device
                .parent()
                .unwrap_or_else(|| Path::new("/dev"));
            lvm.snapshot_device = dir.join(session_id);
        }
    }

    /// Persist this instance under the session directory, root-owned and
    /// mode 0600.
    pub fn write_session_file(&self, session_dir: &Path) -> Result<(), ChrootError> {
        let path = session_dir.join(&self.name);
        let mut kf = Keyfile::new();
        self.to_keyfile(&mut kf);
        util::atomic_write(&path, kf.to_string().as_bytes(), 0o600)
            .map_err(|source| ChrootError::SessionFile { path, source })
    }

    /// Remove the persisted session file. A file already removed by an
    /// earlier teardown attempt is tolerated.
    pub fn remove_session_file(&self, session_dir: &Path) -> Result<(), ChrootError> {
        let path = session_dir.join(&self.name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("{}: session file already removed", path.display());
                Ok(())
            }
            Err(source) => Err(ChrootError::SessionFile { path, source }),
        }
    }

    /// Write a human-readable description of this chroot.
    pub fn print_details<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_detail(writer, "Name", &self.name)?;
        write_detail(writer, "Description", &self.description)?;
        write_detail(writer, "Type", self.chroot_type())?;
        write_detail(writer, "Priority", &self.priority.to_string())?;
        write_detail_list(writer, "Aliases", &self.aliases)?;
        write_detail_list(writer, "Groups", &self.groups)?;
        write_detail_list(writer, "Root Groups", &self.root_groups)?;
        write_detail(
            writer,
            "Run Setup Scripts",
            bool_detail(self.run_setup_scripts),
        )?;
        write_detail(
            writer,
            "Run Exec Scripts",
            bool_detail(self.run_exec_scripts),
        )?;
        if !self.command_prefix.is_empty() {
            write_detail(writer, "Command Prefix", &self.command_prefix.join(" "))?;
        }
        write_detail(writer, "Personality", &self.personality)?;
        if self.active {
            write_detail(writer, "Active", "true")?;
        }
        match &self.kind {
            ChrootKind::Plain(plain) => plain.print_details(writer),
            ChrootKind::BlockDevice(bd) => bd.print_details(writer),
            ChrootKind::LvmSnapshot(lvm) => lvm.print_details(writer),
            ChrootKind::File(file) => file.print_details(writer),
        }
    }
}

/// Chroot names and session ids: an alphanumeric first character, then
/// alphanumerics, dot, underscore, and dash.
pub fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub(crate) fn required<T>(value: Option<T>, group: &str, key: &str) -> Result<T, ChrootError> {
    value.ok_or_else(|| {
        ChrootError::Keyfile(KeyfileError::MissingRequired {
            group: group.to_owned(),
            key: key.to_owned(),
        })
    })
}

pub(crate) fn require_absolute(path: PathBuf, key: &str) -> Result<PathBuf, ChrootError> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(ChrootError::InvalidPath {
            key: key.to_owned(),
            value: path.to_string_lossy().into_owned(),
        })
    }
}

/// Verify the path names an existing block device.
pub(crate) fn check_block_device(chroot: &str, device: &Path) -> Result<(), ChrootError> {
    if device.as_os_str().is_empty() {
        return Err(ChrootError::DeviceNotSet {
            chroot: chroot.to_owned(),
        });
    }
    let meta = std::fs::metadata(device).map_err(|source| ChrootError::DeviceStat {
        chroot: chroot.to_owned(),
        device: device.to_owned(),
        source,
    })?;
    use std::os::unix::fs::FileTypeExt;
    if !meta.file_type().is_block_device() {
        return Err(ChrootError::NotBlockDevice {
            chroot: chroot.to_owned(),
            device: device.to_owned(),
        });
    }
    Ok(())
}

pub(crate) fn lock_device(device: &Path, force: bool) -> Result<(), ChrootError> {
    let lock = DeviceLock::new(device);
    let result = if force {
        lock.acquire_force(LockKind::Exclusive, SETUP_LOCK_TIMEOUT)
    } else {
        lock.acquire(LockKind::Exclusive, SETUP_LOCK_TIMEOUT)
    };
    result.map_err(|source| ChrootError::Lock {
        device: device.to_owned(),
        source,
    })
}

/// Release a device lock. Teardown paths may release a lock that was
/// never taken; that is tolerated, only real I/O failures surface.
pub(crate) fn unlock_device(device: &Path) -> Result<(), ChrootError> {
    let lock = DeviceLock::new(device);
    match lock.release() {
        Ok(()) => Ok(()),
        Err(LockError::NotHeld { path }) => {
            warn!("{}: lock already released", path.display());
            Ok(())
        }
        Err(LockError::Conflict { path, pid }) => {
            warn!("{}: lock now held by pid {pid}, leaving it", path.display());
            Ok(())
        }
        Err(LockError::Stale { path, pid }) => {
            warn!("{}: stale lock record left by pid {pid}", path.display());
            Ok(())
        }
        Err(source) => Err(ChrootError::Lock {
            device: device.to_owned(),
            source,
        }),
    }
}

pub(crate) fn write_detail<W: Write>(writer: &mut W, name: &str, value: &str) -> io::Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    writeln!(writer, "  {name:<21} {value}")
}

pub(crate) fn write_detail_list<W: Write>(
    writer: &mut W,
    name: &str,
    values: &[String],
) -> io::Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    write_detail(writer, name, &values.join(" "))
}

fn bool_detail(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Keyfile {
        Keyfile::parse(text.as_bytes()).expect("parse failed")
    }

    fn chroot(text: &str, group: &str) -> Chroot {
        Chroot::from_keyfile(&parse(text), group).expect("chroot failed")
    }

    const SID: &str = "[sid]\ntype=plain\nlocation=/srv/chroot/sid\ngroups=sbuild\n\
                       aliases=unstable,devel\ndescription=Debian unstable\npriority=3\n";

    const UNSTABLE_LVM: &str = "[unstable]\ntype=lvm-snapshot\ndevice=/dev/vg/unstable\n\
                                mount-location=/mnt/unstable\ngroups=sbuild\n\
                                lvm-snapshot-options=-L,1G\n";

    #[test]
    fn plain_chroot_parses_common_attributes() {
        let c = chroot(SID, "sid");
        assert_eq!(c.name(), "sid");
        assert_eq!(c.chroot_type(), "plain");
        assert_eq!(c.description(), "Debian unstable");
        assert_eq!(c.priority(), 3);
        assert_eq!(c.aliases(), ["unstable", "devel"]);
        assert_eq!(c.groups(), ["sbuild"]);
        assert_eq!(c.mount_location(), Path::new("/srv/chroot/sid"));
        assert_eq!(c.mount_device(), None);
        assert_eq!(c.session_flags(), SessionFlags::None);
        assert!(!c.active());
    }

    #[test]
    fn type_defaults_to_plain() {
        let c = chroot("[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\n", "sid");
        assert_eq!(c.chroot_type(), "plain");
    }

    #[test]
    fn missing_groups_is_required_error() {
        let kf = parse("[sid]\nlocation=/srv/chroot/sid\n");
        let err = Chroot::from_keyfile(&kf, "sid").unwrap_err();
        assert!(matches!(
            err,
            ChrootError::Keyfile(KeyfileError::MissingRequired { ref key, .. }) if key == "groups"
        ));
    }

    #[test]
    fn missing_location_is_required_error() {
        let kf = parse("[sid]\ngroups=sbuild\n");
        let err = Chroot::from_keyfile(&kf, "sid").unwrap_err();
        assert!(matches!(
            err,
            ChrootError::Keyfile(KeyfileError::MissingRequired { ref key, .. }) if key == "location"
        ));
    }

    #[test]
    fn relative_location_is_rejected() {
        let kf = parse("[sid]\nlocation=srv/chroot\ngroups=sbuild\n");
        let err = Chroot::from_keyfile(&kf, "sid").unwrap_err();
        assert!(matches!(err, ChrootError::InvalidPath { .. }));
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(valid_name("sid"));
        assert!(valid_name("sid-20260802-ab12"));
        assert!(valid_name("3.1"));
        assert!(!valid_name(""));
        assert!(!valid_name("-sid"));
        assert!(!valid_name(".hidden"));
        assert!(!valid_name("s id"));
        assert!(!valid_name("sid/etch"));

        let kf = parse("[sid]\ngroups=sbuild\nlocation=/srv\n");
        assert!(Chroot::from_keyfile(&kf, "bad name").is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let kf = parse("[sid]\ntype=tarball\ngroups=sbuild\n");
        let err = Chroot::from_keyfile(&kf, "sid").unwrap_err();
        assert!(matches!(
            err,
            ChrootError::Keyfile(KeyfileError::InvalidValue { ref key, .. }) if key == "type"
        ));
    }

    #[test]
    fn block_device_chroot_parses_and_exports() {
        let c = chroot(
            "[etch]\ntype=block-device\ndevice=/dev/hda1\nmount-location=/mnt/etch\n\
             mount-options=ro,noatime\ngroups=sbuild\n",
            "etch",
        );
        assert_eq!(c.chroot_type(), "block-device");
        assert_eq!(c.mount_device(), Some(Path::new("/dev/hda1")));
        assert_eq!(c.mount_location(), Path::new("/mnt/etch"));

        let mut env = Environment::new();
        c.setup_env(&mut env);
        assert_eq!(env.get("CHROOT_TYPE"), Some("block-device"));
        assert_eq!(env.get("CHROOT_NAME"), Some("etch"));
        assert_eq!(env.get("CHROOT_DEVICE"), Some("/dev/hda1"));
        assert_eq!(env.get("CHROOT_MOUNT_LOCATION"), Some("/mnt/etch"));
        assert_eq!(env.get("CHROOT_MOUNT_OPTIONS"), Some("ro,noatime"));
    }

    #[test]
    fn lvm_snapshot_template_has_no_snapshot_device() {
        let c = chroot(UNSTABLE_LVM, "unstable");
        assert_eq!(c.session_flags(), SessionFlags::CreateSession);
        // Inactive: the origin is the mount device.
        assert_eq!(c.mount_device(), Some(Path::new("/dev/vg/unstable")));
    }

    #[test]
    fn lvm_snapshot_device_is_disallowed_when_inactive() {
        let text = format!("{UNSTABLE_LVM}lvm-snapshot-device=/dev/vg/unstable-snap\n");
        let kf = parse(&text);
        let err = Chroot::from_keyfile(&kf, "unstable").unwrap_err();
        assert!(matches!(
            err,
            ChrootError::Keyfile(KeyfileError::Disallowed { ref key, .. })
                if key == "lvm-snapshot-device"
        ));
    }

    #[test]
    fn lvm_snapshot_device_is_required_when_active() {
        let text = format!("{UNSTABLE_LVM}active=true\n");
        let kf = parse(&text);
        let err = Chroot::from_keyfile(&kf, "unstable").unwrap_err();
        assert!(matches!(
            err,
            ChrootError::Keyfile(KeyfileError::MissingRequired { ref key, .. })
                if key == "lvm-snapshot-device"
        ));
    }

    #[test]
    fn active_lvm_snapshot_mounts_the_snapshot() {
        let text = format!(
            "{UNSTABLE_LVM}active=true\nlvm-snapshot-device=/dev/vg/unstable-snap\n"
        );
        let c = chroot(&text, "unstable");
        assert!(c.active());
        assert_eq!(c.mount_device(), Some(Path::new("/dev/vg/unstable-snap")));

        let mut env = Environment::new();
        c.setup_env(&mut env);
        assert_eq!(env.get("CHROOT_LVM_SNAPSHOT_NAME"), Some("unstable-snap"));
        assert_eq!(
            env.get("CHROOT_LVM_SNAPSHOT_DEVICE"),
            Some("/dev/vg/unstable-snap")
        );
        assert_eq!(env.get("CHROOT_LVM_SNAPSHOT_OPTIONS"), Some("-L,1G"));
    }

    #[test]
    fn file_chroot_parses_and_exports() {
        let c = chroot(
            "[woody]\ntype=file\nfile=/srv/chroot/woody.tar\nlocation=/srv/chroot/woody\n\
             groups=sbuild\n",
            "woody",
        );
        assert_eq!(c.chroot_type(), "file");
        assert_eq!(c.mount_location(), Path::new("/srv/chroot/woody"));

        let mut env = Environment::new();
        c.setup_env(&mut env);
        assert_eq!(env.get("CHROOT_FILE"), Some("/srv/chroot/woody.tar"));
    }

    #[test]
    fn round_trip_through_keyfile_is_identity() {
        for (text, group) in [
            (SID.to_owned(), "sid"),
            (UNSTABLE_LVM.to_owned(), "unstable"),
            (
                format!("{UNSTABLE_LVM}active=true\nlvm-snapshot-device=/dev/vg/s\n"),
                "unstable",
            ),
            (
                "[woody]\ntype=file\nfile=/srv/w.tar\nlocation=/srv/w\ngroups=sbuild\n\
                 run-setup-scripts=true\ncommand-prefix=nice,-n,19\npersonality=linux32\n"
                    .to_owned(),
                "woody",
            ),
        ] {
            let original = chroot(&text, group);
            let mut kf = Keyfile::new();
            original.to_keyfile(&mut kf);
            let reparsed = Chroot::from_keyfile(&kf, group).expect("reparse failed");
            assert_eq!(original, reparsed);
        }
    }

    #[test]
    fn prepare_session_renames_and_activates() {
        let mut c = chroot(UNSTABLE_LVM, "unstable");
        c.prepare_session("unstable-20260802120000-4e2a");
        assert_eq!(c.name(), "unstable-20260802120000-4e2a");
        assert!(c.active());
        assert!(c.aliases().is_empty());
        assert_eq!(
            c.mount_device(),
            Some(Path::new("/dev/vg/unstable-20260802120000-4e2a"))
        );
    }

    #[test]
    fn session_file_write_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut c = chroot(UNSTABLE_LVM, "unstable");
        c.prepare_session("unstable-20260802120000-4e2a");

        c.write_session_file(dir.path()).expect("write");
        let path = dir.path().join("unstable-20260802120000-4e2a");
        assert!(path.is_file());

        use std::os::unix::fs::PermissionsExt;
        let mode = path.metadata().expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let kf = Keyfile::load(&path).expect("load");
        let restored = Chroot::from_keyfile(&kf, c.name()).expect("restore");
        assert_eq!(restored, c);

        c.remove_session_file(dir.path()).expect("remove");
        assert!(!path.exists());
        // Idempotent from the teardown path's perspective.
        c.remove_session_file(dir.path()).expect("second remove");
    }

    #[test]
    fn plain_setup_lock_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = chroot(SID, "sid");
        let ctx = SetupContext {
            session_dir: dir.path(),
            force: false,
        };
        for phase in [
            SetupPhase::SetupStart,
            SetupPhase::RunStart,
            SetupPhase::RunStop,
            SetupPhase::SetupStop,
        ] {
            c.setup_lock(phase, true, &ctx).expect("acquire");
            c.setup_lock(phase, false, &ctx).expect("release");
        }
    }

    #[test]
    fn print_details_includes_variant_fields() {
        let c = chroot(UNSTABLE_LVM, "unstable");
        let mut out = Vec::new();
        c.print_details(&mut out).expect("print");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("Name"));
        assert!(text.contains("unstable"));
        assert!(text.contains("Device"));
        assert!(text.contains("/dev/vg/unstable"));
        assert!(text.contains("LVM Snapshot Options"));
    }
}
