//! LVM snapshot chroots: a snapshot of an origin logical volume is
//! created by the setup scripts for each session and destroyed again on
//! teardown. The origin device is locked while setup runs, the snapshot
//! device for everything after; the session file is written when setup
//! starts and removed when it stops.

use super::{
    check_block_device, lock_device, require_absolute, required, unlock_device, write_detail,
    BlockDeviceChroot, Chroot, SetupContext, SetupPhase,
};
use crate::environment::Environment;
use crate::keyfile::{Keyfile, Priority};
use crate::types::ChrootError;
use crate::util;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LvmSnapshotChroot {
    pub(crate) base: BlockDeviceChroot,
    /// Snapshot logical volume; set only while the chroot is active.
    pub(crate) snapshot_device: PathBuf,
    /// Options passed to lvcreate by the setup scripts.
    pub(crate) snapshot_options: String,
}

impl LvmSnapshotChroot {
    pub(crate) fn from_keyfile(
        kf: &Keyfile,
        group: &str,
        active: bool,
    ) -> Result<Self, ChrootError> {
        let base = BlockDeviceChroot::from_keyfile(kf, group)?;

        let device_priority = if active {
            Priority::Required
        } else {
            Priority::Disallowed
        };
        let snapshot_device = match kf.get_value::<PathBuf>(
            group,
            "lvm-snapshot-device",
            device_priority,
        )? {
            Some(device) => require_absolute(device, "lvm-snapshot-device")?,
            None => PathBuf::new(),
        };

        let snapshot_options = required(
            kf.get_value::<String>(group, "lvm-snapshot-options", Priority::Required)?,
            group,
            "lvm-snapshot-options",
        )?;

        Ok(LvmSnapshotChroot {
            base,
            snapshot_device,
            snapshot_options,
        })
    }

    pub(crate) fn to_keyfile(&self, kf: &mut Keyfile, group: &str) {
        self.base.to_keyfile(kf, group);
        if !self.snapshot_device.as_os_str().is_empty() {
            kf.set_value(group, "lvm-snapshot-device", &self.snapshot_device);
        }
        kf.set_value(group, "lvm-snapshot-options", &self.snapshot_options);
    }

    /// The device to mount: the snapshot while active, else the origin.
    pub(crate) fn mount_device(&self, active: bool) -> &Path {
        if active && !self.snapshot_device.as_os_str().is_empty() {
            &self.snapshot_device
        } else {
            &self.base.device
        }
    }

    pub(crate) fn setup_env(&self, env: &mut Environment) {
        self.base.setup_env(env);
        env.add(
            "CHROOT_LVM_SNAPSHOT_NAME",
            &util::basename(&self.snapshot_device.to_string_lossy()),
        );
        env.add(
            "CHROOT_LVM_SNAPSHOT_DEVICE",
            &self.snapshot_device.to_string_lossy(),
        );
        env.add("CHROOT_LVM_SNAPSHOT_OPTIONS", &self.snapshot_options);
    }

    pub(crate) fn setup_lock(
        &self,
        owner: &Chroot,
        phase: SetupPhase,
        acquire: bool,
        ctx: &SetupContext<'_>,
    ) -> Result<(), ChrootError> {
        // The snapshot device is destroyed by the setup scripts before
        // SetupStop releases; a stat of the vanished device would fail.
        if !(phase == SetupPhase::SetupStop && !acquire) {
            let device = if phase == SetupPhase::SetupStart {
                &self.base.device
            } else {
                &self.snapshot_device
            };
            check_block_device(owner.name(), device)?;

            // The lock is preserved while a command runs.
            let preserved = (phase == SetupPhase::RunStart && !acquire)
                || (phase == SetupPhase::RunStop && acquire);
            if !preserved {
                if acquire {
                    lock_device(device, ctx.force)?;
                } else {
                    unlock_device(device)?;
                }
            }
        }

        if phase == SetupPhase::SetupStart && acquire {
            owner.write_session_file(ctx.session_dir)?;
        } else if phase == SetupPhase::SetupStop && !acquire {
            owner.remove_session_file(ctx.session_dir)?;
        }

        Ok(())
    }

    pub(crate) fn print_details<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.base.print_details(writer)?;
        write_detail(
            writer,
            "LVM Snapshot Device",
            &self.snapshot_device.to_string_lossy(),
        )?;
        write_detail(writer, "LVM Snapshot Options", &self.snapshot_options)
    }
}
