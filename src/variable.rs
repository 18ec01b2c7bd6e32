//! EFI variables as read from a variable store, and the Secure Boot key
//! variables that hold signature databases.

use std::fmt;

use uefi::table::runtime::VariableAttributes;
use uefi::Guid;

use crate::error::Result;
use crate::guid::{EFI_GLOBAL_VARIABLE, EFI_IMAGE_SECURITY_DATABASE};
use crate::options::DecodeOptions;
use crate::signature_list::{self, SignatureDatabase};
use crate::variable_authentication::AuthenticatedVariable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiVariable {
    pub name: String,
    pub vendor: Guid,
    pub attributes: VariableAttributes,
    pub data: Vec<u8>,
}

impl EfiVariable {
    pub fn new(
        name: impl Into<String>,
        vendor: Guid,
        attributes: VariableAttributes,
        data: Vec<u8>,
    ) -> EfiVariable {
        EfiVariable {
            name: name.into(),
            vendor,
            attributes,
            data,
        }
    }

    /// Decodes the data as a signature database, as stored in PK, KEK, db and
    /// dbx.
    pub fn signature_database(&self) -> Result<SignatureDatabase<'_>> {
        signature_list::parse_signature_database(&self.data)
    }

    /// Decodes the data as a signed update, i.e. an
    /// `EFI_VARIABLE_AUTHENTICATION_2` followed by the new contents.
    pub fn authenticated(&self, options: &DecodeOptions) -> Result<AuthenticatedVariable<'_>> {
        AuthenticatedVariable::parse(&self.data, options)
    }
}

impl fmt::Display for EfiVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} ({:?}, {} bytes)",
            self.name,
            self.vendor,
            self.attributes,
            self.data.len()
        )
    }
}

/// Anything that can look up a variable by name and vendor GUID.
pub trait VariableSource {
    /// Fails with [`Error::VariableNotFound`](crate::Error::VariableNotFound)
    /// when the store has no such variable.
    fn read_variable(&self, name: &str, vendor: &Guid) -> Result<EfiVariable>;
}

impl<T: VariableSource + ?Sized> VariableSource for &T {
    fn read_variable(&self, name: &str, vendor: &Guid) -> Result<EfiVariable> {
        (**self).read_variable(name, vendor)
    }
}

/// The variables that make up the Secure Boot key hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecureBootVariable {
    PK,
    KEK,
    Db,
    Dbx,
    Dbt,
    Dbr,
}

impl SecureBootVariable {
    pub const ALL: [SecureBootVariable; 6] = [
        SecureBootVariable::PK,
        SecureBootVariable::KEK,
        SecureBootVariable::Db,
        SecureBootVariable::Dbx,
        SecureBootVariable::Dbt,
        SecureBootVariable::Dbr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SecureBootVariable::PK => "PK",
            SecureBootVariable::KEK => "KEK",
            SecureBootVariable::Db => "db",
            SecureBootVariable::Dbx => "dbx",
            SecureBootVariable::Dbt => "dbt",
            SecureBootVariable::Dbr => "dbr",
        }
    }

    pub fn vendor(&self) -> Guid {
        match self {
            SecureBootVariable::PK | SecureBootVariable::KEK => EFI_GLOBAL_VARIABLE,
            _ => EFI_IMAGE_SECURITY_DATABASE,
        }
    }

    pub fn from_name(name: &str) -> Option<SecureBootVariable> {
        SecureBootVariable::ALL
            .into_iter()
            .find(|var| var.name() == name)
    }
}

impl fmt::Display for SecureBootVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reads one of the Secure Boot key variables from `source`.
pub fn read_key_database<S: VariableSource + ?Sized>(
    source: &S,
    var: SecureBootVariable,
) -> Result<EfiVariable> {
    let variable = source.read_variable(var.name(), &var.vendor())?;
    log::debug!("read {variable}");
    Ok(variable)
}
