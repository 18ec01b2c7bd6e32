//! The WIN_CERTIFICATE header shared by authenticated variables and the PE
//! Certificate Table.

use std::fmt;

use binrw::BinRead;

use crate::error::{Error, Result};
use crate::options::RevisionPolicy;
use crate::reader::Reader;

pub const WIN_CERT_REVISION_1_0: u16 = 0x0100;
pub const WIN_CERT_REVISION_2_0: u16 = 0x0200;

pub const WIN_CERT_TYPE_X509: u16 = 0x0001;
pub const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;
pub const WIN_CERT_TYPE_EFI_PKCS115: u16 = 0x0EF0;
pub const WIN_CERT_TYPE_EFI_GUID: u16 = 0x0EF1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WinCertType {
    X509,
    PkcsSignedData,
    EfiPkcs115,
    EfiGuid,
    Unrecognized(u16),
}

impl WinCertType {
    pub fn name(&self) -> &'static str {
        match self {
            WinCertType::X509 => "WIN_CERT_TYPE_X509",
            WinCertType::PkcsSignedData => "WIN_CERT_TYPE_PKCS_SIGNED_DATA",
            WinCertType::EfiPkcs115 => "WIN_CERT_TYPE_EFI_PKCS115",
            WinCertType::EfiGuid => "WIN_CERT_TYPE_EFI_GUID",
            WinCertType::Unrecognized(_) => "unrecognized",
        }
    }
}

impl From<u16> for WinCertType {
    fn from(value: u16) -> WinCertType {
        match value {
            WIN_CERT_TYPE_X509 => WinCertType::X509,
            WIN_CERT_TYPE_PKCS_SIGNED_DATA => WinCertType::PkcsSignedData,
            WIN_CERT_TYPE_EFI_PKCS115 => WinCertType::EfiPkcs115,
            WIN_CERT_TYPE_EFI_GUID => WinCertType::EfiGuid,
            other => WinCertType::Unrecognized(other),
        }
    }
}

impl From<WinCertType> for u16 {
    fn from(value: WinCertType) -> u16 {
        match value {
            WinCertType::X509 => WIN_CERT_TYPE_X509,
            WinCertType::PkcsSignedData => WIN_CERT_TYPE_PKCS_SIGNED_DATA,
            WinCertType::EfiPkcs115 => WIN_CERT_TYPE_EFI_PKCS115,
            WinCertType::EfiGuid => WIN_CERT_TYPE_EFI_GUID,
            WinCertType::Unrecognized(other) => other,
        }
    }
}

impl fmt::Display for WinCertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WinCertType::Unrecognized(value) => write!(f, "unrecognized ({value:#06x})"),
            known => f.write_str(known.name()),
        }
    }
}

#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq)]
#[br(little)]
pub struct WinCertificateHeader {
    /// Length of the whole record, header included.
    pub length: u32,
    pub revision: u16,
    #[br(map = |x: u16| WinCertType::from(x))]
    pub cert_type: WinCertType,
}

impl WinCertificateHeader {
    pub const SIZE: usize = 8;

    pub fn parse(reader: &mut Reader<'_>) -> Result<WinCertificateHeader> {
        reader.read_struct(Self::SIZE, WinCertificateHeader::read)
    }

    /// Applies `policy` when `revision` is none of `accepted`.
    pub fn check_revision(&self, accepted: &[u16], policy: RevisionPolicy) -> Result<()> {
        if accepted.contains(&self.revision) {
            return Ok(());
        }
        match policy {
            RevisionPolicy::Warn => {
                log::warn!(
                    "WIN_CERTIFICATE revision {:#06x}, expected {:#06x}",
                    self.revision,
                    accepted[0]
                );
                Ok(())
            }
            RevisionPolicy::Strict => Err(Error::UnexpectedRevision {
                found: self.revision,
                expected: accepted[0],
            }),
        }
    }
}
