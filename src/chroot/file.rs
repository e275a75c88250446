//! File chroots: an archive unpacked by the setup scripts under a
//! configured location. The archive itself carries an exclusive advisory
//! lock while setup runs.

use super::{lock_device, require_absolute, required, unlock_device, write_detail, SetupPhase};
use crate::environment::Environment;
use crate::keyfile::{Keyfile, Priority};
use crate::types::ChrootError;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileChroot {
    pub(crate) file: PathBuf,
    pub(crate) location: PathBuf,
}

impl FileChroot {
    pub(crate) fn from_keyfile(kf: &Keyfile, group: &str) -> Result<Self, ChrootError> {
        let file = required(
            kf.get_value::<PathBuf>(group, "file", Priority::Required)?,
            group,
            "file",
        )?;
        let location = required(
            kf.get_value::<PathBuf>(group, "location", Priority::Required)?,
            group,
            "location",
        )?;
        Ok(FileChroot {
            file: require_absolute(file, "file")?,
            location: require_absolute(location, "location")?,
        })
    }

    pub(crate) fn to_keyfile(&self, kf: &mut Keyfile, group: &str) {
        kf.set_value(group, "file", &self.file);
        kf.set_value(group, "location", &self.location);
    }

    pub(crate) fn setup_env(&self, env: &mut Environment) {
        env.add("CHROOT_FILE", &self.file.to_string_lossy());
    }

    pub(crate) fn setup_lock(
        &self,
        phase: SetupPhase,
        acquire: bool,
        force: bool,
    ) -> Result<(), ChrootError> {
        match phase {
            SetupPhase::SetupStart | SetupPhase::SetupStop => {
                if acquire {
                    lock_device(&self.file, force)
                } else {
                    unlock_device(&self.file)
                }
            }
            SetupPhase::RunStart | SetupPhase::RunStop => Ok(()),
        }
    }

    pub(crate) fn print_details<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_detail(writer, "File", &self.file.to_string_lossy())?;
        write_detail(writer, "Location", &self.location.to_string_lossy())
    }
}
