//! `EFI_VARIABLE_AUTHENTICATION_2`, the envelope that precedes the data of a
//! time-based authenticated variable write (signed PK/KEK/db/dbx updates).
//!
//! ```text
//! EFI_VARIABLE_AUTHENTICATION_2 {
//!     TimeStamp   EFI_TIME
//!     AuthInfo    WIN_CERTIFICATE_UEFI_GUID {
//!         Hdr         WIN_CERTIFICATE (dwLength covers Hdr, CertType and CertData)
//!         CertType    GUID
//!         CertData    [u8]
//!     }
//! }
//! <variable data, a signature database for the Secure Boot key variables>
//! ```

use std::fmt;

use binrw::BinRead;
use uefi::Guid;

use crate::error::{Error, Result};
use crate::guid::CertType;
use crate::options::DecodeOptions;
use crate::pkcs7::{self, Pkcs7SignedData};
use crate::reader::Reader;
use crate::signature_list::{self, SignatureDatabase};
use crate::win_certificate::{WinCertType, WinCertificateHeader, WIN_CERT_REVISION_2_0};

pub const EFI_UNSPECIFIED_TIMEZONE: i16 = 0x07ff;
const MAX_TIMEZONE_MINUTES: i32 = 1440;

/// `EFI_TIME`.
#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[br(little)]
pub struct EfiTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub pad1: u8,
    pub nanosecond: u32,
    pub time_zone: i16,
    pub daylight: u8,
    pub pad2: u8,
}

impl EfiTime {
    pub const SIZE: usize = 16;

    pub fn parse(reader: &mut Reader<'_>) -> Result<EfiTime> {
        reader.read_struct(Self::SIZE, EfiTime::read)
    }

    /// Authenticated variable timestamps must leave Pad1, Nanosecond,
    /// TimeZone, Daylight and Pad2 zeroed.
    pub fn is_authentication_timestamp(&self) -> bool {
        self.pad1 == 0
            && self.nanosecond == 0
            && self.time_zone == 0
            && self.daylight == 0
            && self.pad2 == 0
    }
}

impl fmt::Display for EfiTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.nanosecond != 0 {
            write!(f, ".{:09}", self.nanosecond)?;
        }
        // TimeZone is minutes to add to local time to get UTC
        let offset = -i32::from(self.time_zone);
        if self.time_zone == EFI_UNSPECIFIED_TIMEZONE
            || offset == 0
            || offset.abs() > MAX_TIMEZONE_MINUTES
        {
            return Ok(());
        }
        let sign = if offset < 0 { '-' } else { '+' };
        write!(f, " {sign}{:02}:{:02}", offset.abs() / 60, offset.abs() % 60)
    }
}

/// `WIN_CERTIFICATE_UEFI_GUID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthInfo<'a> {
    pub header: WinCertificateHeader,
    pub cert_type: CertType,
    pub cert_data: &'a [u8],
}

/// Fixed part of a `WIN_CERTIFICATE_UEFI_GUID`: the header plus `CertType`.
pub const AUTH_INFO_HEADER_SIZE: usize = WinCertificateHeader::SIZE + 16;

impl<'a> AuthInfo<'a> {
    /// Decodes `cert_data` according to `cert_type`.
    pub fn certificate(&self) -> Result<AuthCertificate<'a>> {
        match self.cert_type {
            CertType::Pkcs7 => pkcs7::parse_signature(self.cert_data).map(AuthCertificate::Pkcs7),
            CertType::Rsa2048Sha256 => {
                CertBlockRsa2048Sha256::parse(self.cert_data).map(AuthCertificate::Rsa2048Sha256)
            }
            CertType::Unrecognized(cert_type) => Ok(AuthCertificate::Unrecognized {
                cert_type,
                data: self.cert_data,
            }),
        }
    }
}

/// `EFI_CERT_BLOCK_RSA_2048_SHA256`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertBlockRsa2048Sha256<'a> {
    pub hash_type: Guid,
    pub public_key: &'a [u8],
    pub signature: &'a [u8],
}

impl<'a> CertBlockRsa2048Sha256<'a> {
    pub const SIZE: usize = 16 + 256 + 256;

    pub fn parse(data: &'a [u8]) -> Result<CertBlockRsa2048Sha256<'a>> {
        if data.len() != Self::SIZE {
            return Err(Error::MalformedAuthHeader(
                "EFI_CERT_BLOCK_RSA_2048_SHA256 must be 528 bytes",
            ));
        }
        let mut reader = Reader::new(data);
        Ok(CertBlockRsa2048Sha256 {
            hash_type: reader.read_guid()?,
            public_key: reader.read_bytes(256)?,
            signature: reader.read_bytes(256)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCertificate<'a> {
    Pkcs7(Pkcs7SignedData),
    Rsa2048Sha256(CertBlockRsa2048Sha256<'a>),
    Unrecognized { cert_type: Guid, data: &'a [u8] },
}

/// A decoded `EFI_VARIABLE_AUTHENTICATION_2` and the variable data after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedVariable<'a> {
    pub timestamp: EfiTime,
    pub auth_info: AuthInfo<'a>,
    /// Everything after `AuthInfo`; possibly empty.
    pub payload: &'a [u8],
}

impl<'a> AuthenticatedVariable<'a> {
    pub fn parse(data: &'a [u8], options: &DecodeOptions) -> Result<AuthenticatedVariable<'a>> {
        read_authenticated_variable(&mut Reader::new(data), options)
    }

    /// Decodes the payload as a signature database.
    pub fn signature_database(&self) -> Result<SignatureDatabase<'a>> {
        signature_list::parse_signature_database(self.payload)
    }
}

impl fmt::Display for AuthenticatedVariable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = &self.auth_info.header;
        writeln!(f, "EFI Authentication Variable")?;
        writeln!(f, "\tEFI Signing Time: {}", self.timestamp)?;
        writeln!(f, "\tWINCertificate Info")?;
        writeln!(f, "\t\tHeader:")?;
        writeln!(f, "\t\t\tLength: {}", header.length)?;
        writeln!(
            f,
            "\t\t\tRevision: {:#x} (should be {:#x})",
            header.revision, WIN_CERT_REVISION_2_0
        )?;
        writeln!(f, "\t\t\tCertType: {}", header.cert_type)?;
        writeln!(f, "\t\tCertificate Type: {}", self.auth_info.cert_type)?;
        writeln!(f, "\tPayload: {} bytes", self.payload.len())
    }
}

/// Reads an `EFI_VARIABLE_AUTHENTICATION_2` and consumes the rest of `reader`
/// as its payload.
pub fn read_authenticated_variable<'a>(
    reader: &mut Reader<'a>,
    options: &DecodeOptions,
) -> Result<AuthenticatedVariable<'a>> {
    let timestamp = EfiTime::parse(reader)?;
    if !timestamp.is_authentication_timestamp() {
        log::warn!("authenticated variable timestamp has non-zero padding or zone fields");
    }

    let header = WinCertificateHeader::parse(reader)?;
    let cert_data_len = (header.length as usize)
        .checked_sub(AUTH_INFO_HEADER_SIZE)
        .ok_or(Error::MalformedAuthHeader(
            "dwLength is smaller than the WIN_CERTIFICATE_UEFI_GUID header",
        ))?;
    header.check_revision(&[WIN_CERT_REVISION_2_0], options.revision_policy)?;
    if header.cert_type != WinCertType::EfiGuid {
        return Err(Error::MalformedAuthHeader(
            "wCertificateType is not WIN_CERT_TYPE_EFI_GUID",
        ));
    }

    let cert_type = CertType::from_guid(reader.read_guid()?);
    let cert_data = reader.read_bytes(cert_data_len)?;
    let payload = reader.read_bytes(reader.remaining())?;

    log::debug!(
        "authenticated variable: {cert_type} certificate of {} bytes, {} byte payload",
        cert_data.len(),
        payload.len()
    );

    Ok(AuthenticatedVariable {
        timestamp,
        auth_info: AuthInfo {
            header,
            cert_type,
            cert_data,
        },
        payload,
    })
}

/// Decodes a signed Secure Boot key update: the authentication envelope and
/// the signature database it signs.
pub fn parse_signed_signature_database<'a>(
    data: &'a [u8],
    options: &DecodeOptions,
) -> Result<(AuthenticatedVariable<'a>, SignatureDatabase<'a>)> {
    let var = AuthenticatedVariable::parse(data, options)?;
    let db = var.signature_database()?;
    Ok((var, db))
}
