//! Block-device chroots: a device mounted at a configured location. The
//! device carries an exclusive lock for the whole of a setup transition;
//! the lock is preserved, untouched, while a command runs.

use super::{
    check_block_device, lock_device, require_absolute, required, unlock_device, write_detail,
    SetupPhase,
};
use crate::environment::Environment;
use crate::keyfile::{Keyfile, Priority};
use crate::types::ChrootError;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockDeviceChroot {
    pub(crate) device: PathBuf,
    pub(crate) mount_options: String,
    pub(crate) mount_location: PathBuf,
}

impl BlockDeviceChroot {
    pub(crate) fn from_keyfile(kf: &Keyfile, group: &str) -> Result<Self, ChrootError> {
        let device = required(
            kf.get_value::<PathBuf>(group, "device", Priority::Required)?,
            group,
            "device",
        )?;
        let mount_location = required(
            kf.get_value::<PathBuf>(group, "mount-location", Priority::Required)?,
            group,
            "mount-location",
        )?;
        Ok(BlockDeviceChroot {
            device: require_absolute(device, "device")?,
            mount_options: kf
                .get_value(group, "mount-options", Priority::Optional)?
                .unwrap_or_default(),
            mount_location: require_absolute(mount_location, "mount-location")?,
        })
    }

    pub(crate) fn to_keyfile(&self, kf: &mut Keyfile, group: &str) {
        kf.set_value(group, "device", &self.device);
        if !self.mount_options.is_empty() {
            kf.set_value(group, "mount-options", &self.mount_options);
        }
        kf.set_value(group, "mount-location", &self.mount_location);
    }

    pub(crate) fn setup_env(&self, env: &mut Environment) {
        env.add("CHROOT_DEVICE", &self.device.to_string_lossy());
        env.add(
            "CHROOT_MOUNT_LOCATION",
            &self.mount_location.to_string_lossy(),
        );
        env.add("CHROOT_MOUNT_OPTIONS", &self.mount_options);
    }

    pub(crate) fn setup_lock(
        &self,
        chroot: &str,
        phase: SetupPhase,
        acquire: bool,
        force: bool,
    ) -> Result<(), ChrootError> {
        match phase {
            SetupPhase::SetupStart | SetupPhase::SetupStop => {
                check_block_device(chroot, &self.device)?;
                if acquire {
                    lock_device(&self.device, force)
                } else {
                    unlock_device(&self.device)
                }
            }
            // The lock is preserved while a command runs.
            SetupPhase::RunStart | SetupPhase::RunStop => Ok(()),
        }
    }

    pub(crate) fn print_details<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_detail(writer, "Device", &self.device.to_string_lossy())?;
        write_detail(writer, "Mount Options", &self.mount_options)?;
        write_detail(writer, "Mount Location", &self.mount_location.to_string_lossy())
    }
}
