use thiserror::Error;
use uefi::Guid;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while decoding Secure Boot trust material.
///
/// Size and structure errors are fatal to the decode that raised them. The
/// certificate errors only concern the one payload being decoded, so callers
/// iterating over many entries can report them and carry on.
#[derive(Debug, Error)]
pub enum Error {
    #[error("truncated input: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("malformed EFI_SIGNATURE_LIST: {0}")]
    MalformedSignatureList(&'static str),
    #[error("malformed authentication header: {0}")]
    MalformedAuthHeader(&'static str),
    #[error("unexpected WIN_CERTIFICATE revision {found:#06x} (expected {expected:#06x})")]
    UnexpectedRevision { found: u16, expected: u16 },
    #[error("malformed certificate table: {0}")]
    MalformedCertificateTable(&'static str),
    #[error("not a PE image: {0}")]
    NotAPeImage(&'static str),
    #[error("unsupported optional header magic {0:#06x}")]
    UnsupportedImageFormat(u16),
    #[error("malformed PKCS#7 signed data")]
    MalformedPkcs7(#[source] der::Error),
    #[error("malformed X.509 certificate")]
    MalformedCertificate(#[source] der::Error),
    #[error("malformed variable store: {0}")]
    MalformedVariableStore(&'static str),
    #[error("variable {name}-{vendor} not found")]
    VariableNotFound { name: String, vendor: Guid },
    #[error("i/o error")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the input was the wrong kind of file rather than a corrupt one.
    pub fn is_wrong_format(&self) -> bool {
        matches!(self, Error::NotAPeImage(_) | Error::UnsupportedImageFormat(_))
    }
}
