//! Linux efivarfs. Each variable is a file named `<Name>-<vendor guid>`
//! holding the 32-bit attribute mask followed by the variable data.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uefi::table::runtime::VariableAttributes;
use uefi::Guid;

use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::variable::{EfiVariable, VariableSource};

pub const EFIVARFS_PATH: &str = "/sys/firmware/efi/efivars";

/// Length of `<guid>` in a file name.
const GUID_TEXT_LEN: usize = 36;

/// Splits the contents of an efivarfs file into attributes and data.
pub fn split_efivar(bytes: &[u8]) -> Result<(VariableAttributes, &[u8])> {
    let mut reader = Reader::new(bytes);
    let attributes = VariableAttributes::from_bits_retain(reader.read_u32()?);
    Ok((attributes, reader.rest()))
}

/// Reads a single efivarfs file, or a copy of one.
pub fn read_efivar_file(path: impl AsRef<Path>) -> Result<(VariableAttributes, Vec<u8>)> {
    let bytes = fs::read(path)?;
    let (attributes, data) = split_efivar(&bytes)?;
    Ok((attributes, data.to_vec()))
}

/// A mounted efivarfs, or any directory laid out like one.
#[derive(Debug, Clone)]
pub struct EfivarFs {
    root: PathBuf,
}

impl EfivarFs {
    pub fn new(root: impl Into<PathBuf>) -> EfivarFs {
        EfivarFs { root: root.into() }
    }

    /// The running system's efivarfs.
    pub fn system() -> EfivarFs {
        EfivarFs::new(EFIVARFS_PATH)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str, vendor: &Guid) -> PathBuf {
        self.root.join(format!("{name}-{vendor}"))
    }

    /// Names and vendors of every variable in the directory. Entries whose
    /// names do not end in a GUID are skipped.
    pub fn list(&self) -> Result<Vec<(String, Guid)>> {
        let mut vars = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            match split_file_name(file_name) {
                Some(var) => vars.push(var),
                None => log::trace!("skipping {file_name}"),
            }
        }
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }
}

fn split_file_name(file_name: &str) -> Option<(String, Guid)> {
    let split = file_name.len().checked_sub(GUID_TEXT_LEN + 1)?;
    if !file_name.is_char_boundary(split) {
        return None;
    }
    let (name, rest) = file_name.split_at(split);
    let vendor = rest.strip_prefix('-')?.parse::<Guid>().ok()?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), vendor))
}

impl VariableSource for EfivarFs {
    fn read_variable(&self, name: &str, vendor: &Guid) -> Result<EfiVariable> {
        let path = self.path(name, vendor);
        match read_efivar_file(&path) {
            Ok((attributes, data)) => Ok(EfiVariable::new(name, *vendor, attributes, data)),
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                Err(Error::VariableNotFound {
                    name: name.to_string(),
                    vendor: *vendor,
                })
            }
            Err(err) => Err(err),
        }
    }
}
