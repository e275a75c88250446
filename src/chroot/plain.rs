//! Plain chroots: a directory used directly as the root. No locking and
//! no session support.

use super::{require_absolute, required, write_detail};
use crate::environment::Environment;
use crate::keyfile::{Keyfile, Priority};
use crate::types::ChrootError;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PlainChroot {
    pub(crate) location: PathBuf,
}

impl PlainChroot {
    pub(crate) fn from_keyfile(kf: &Keyfile, group: &str) -> Result<Self, ChrootError> {
        let location = required(
            kf.get_value::<PathBuf>(group, "location", Priority::Required)?,
            group,
            "location",
        )?;
        Ok(PlainChroot {
            location: require_absolute(location, "location")?,
        })
    }

    pub(crate) fn to_keyfile(&self, kf: &mut Keyfile, group: &str) {
        kf.set_value(group, "location", &self.location);
    }

    pub(crate) fn setup_env(&self, _env: &mut Environment) {}

    pub(crate) fn print_details<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_detail(writer, "Location", &self.location.to_string_lossy())
    }
}
