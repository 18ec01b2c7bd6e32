extern crate binrw;
extern crate uefi;

pub use uefi::table::runtime::VariableAttributes;
pub use uefi::Guid;

pub mod error;
pub mod guid;
pub mod options;
pub mod reader;

// Secure Boot data structures
pub mod pkcs7;
pub mod signature_list;
pub mod variable_authentication;
pub mod win_certificate;

// Signed PE/COFF images
pub mod pecoff;

// Where variables come from
pub mod edk2;
pub mod efivarfs;
pub mod variable;

#[cfg(test)]
mod test_util;

pub use error::{Error, Result};
pub use guid::{CertType, SignatureType};
pub use options::{DecodeOptions, RevisionPolicy};
pub use pecoff::{signature_data_directory, signatures, DataDirectory, EmbeddedSignature, PeImage};
pub use pkcs7::{parse_certificate, parse_signature, ParsedCertificate, Pkcs7SignedData};
pub use signature_list::{
    parse_signature_database, SignatureDatabase, SignatureEntry, SignatureList,
};
pub use variable::{read_key_database, EfiVariable, SecureBootVariable, VariableSource};
pub use variable_authentication::{
    parse_signed_signature_database, AuthenticatedVariable, EfiTime,
};
pub use win_certificate::{WinCertType, WinCertificateHeader};
