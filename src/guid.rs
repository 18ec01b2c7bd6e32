//! Well-known UEFI GUIDs and the signature/certificate type tables keyed by
//! them.

use std::fmt;

use uefi::{guid, Guid};

pub const EFI_CERT_SHA1_GUID: Guid = guid!("826ca512-cf10-4ac9-b187-be01496631bd");
pub const EFI_CERT_SHA224_GUID: Guid = guid!("0b6e5233-a65c-44c9-9407-d9ab83bfc8bd");
pub const EFI_CERT_SHA256_GUID: Guid = guid!("c1c41626-504c-4092-aca9-41f936934328");
pub const EFI_CERT_SHA384_GUID: Guid = guid!("ff3e5307-9fd0-48c9-85f1-8ad56c701e01");
pub const EFI_CERT_SHA512_GUID: Guid = guid!("093e0fae-a6c4-4f50-9f1b-d41e2b89c19a");
pub const EFI_CERT_RSA2048_GUID: Guid = guid!("3c5766e8-269c-4e34-aa14-ed776e85b3b6");
pub const EFI_CERT_RSA2048_SHA1_GUID: Guid = guid!("67f8444f-8743-48f1-a328-1eaab8736080");
pub const EFI_CERT_RSA2048_SHA256_GUID: Guid = guid!("e2b36190-879b-4a3d-ad8d-f2e7bba32784");
pub const EFI_CERT_X509_GUID: Guid = guid!("a5c059a1-94e4-4aa7-87b5-ab155c2bf072");
pub const EFI_CERT_X509_SHA256_GUID: Guid = guid!("3bd2a492-96c0-4079-b420-fcf98ef103ed");
pub const EFI_CERT_X509_SHA384_GUID: Guid = guid!("7076876e-80c2-4ee6-aad2-28b349a6865b");
pub const EFI_CERT_X509_SHA512_GUID: Guid = guid!("446dbf63-2502-4cda-bcfa-2465d2b0fe9d");
pub const EFI_CERT_EXTERNAL_MANAGEMENT_GUID: Guid =
    guid!("452e8ced-dfff-4b8c-ae01-5118862e682c");

/// `CertType` of a WIN_CERTIFICATE_UEFI_GUID holding PKCS#7 SignedData.
pub const EFI_CERT_TYPE_PKCS7_GUID: Guid = guid!("4aafd29d-68df-49ee-8aa9-347d375665a7");
/// `CertType` of a WIN_CERTIFICATE_UEFI_GUID holding an EFI_CERT_BLOCK_RSA_2048_SHA256.
pub const EFI_CERT_TYPE_RSA2048_SHA256_GUID: Guid =
    guid!("a7717414-c616-4977-9420-844712a735bf");

/// Vendor of PK, KEK and the other architectural globals.
pub const EFI_GLOBAL_VARIABLE: Guid = guid!("8be4df61-93ca-11d2-aa0d-00e098032b8c");
/// Vendor of db, dbx, dbt and dbr.
pub const EFI_IMAGE_SECURITY_DATABASE: Guid = guid!("d719b2cb-3d3a-4596-a3bc-dad00e67656f");
/// Signature owner used by Microsoft in its db/dbx/KEK entries.
pub const MICROSOFT_OWNER: Guid = guid!("77fa9abd-0359-4d32-bd60-28f4e78f784b");
/// Vendor of shim's MokList variables.
pub const SHIM_LOCK: Guid = guid!("605dab50-e046-4300-abb6-3dd810dd8b23");

/// Canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` rendering.
pub fn format(guid: &Guid) -> String {
    guid.to_string()
}

/// Type of the signatures held by an `EFI_SIGNATURE_LIST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Rsa2048,
    Rsa2048Sha1,
    Rsa2048Sha256,
    X509,
    X509Sha256,
    X509Sha384,
    X509Sha512,
    /// A PKCS#7 blob stored directly in a signature list.
    Pkcs7,
    ExternalManagement,
    Unrecognized(Guid),
}

const SIGNATURE_TYPES: &[(SignatureType, Guid, &str)] = &[
    (
        SignatureType::Sha1,
        EFI_CERT_SHA1_GUID,
        "EFI_CERT_SHA1_GUID",
    ),
    (
        SignatureType::Sha224,
        EFI_CERT_SHA224_GUID,
        "EFI_CERT_SHA224_GUID",
    ),
    (
        SignatureType::Sha256,
        EFI_CERT_SHA256_GUID,
        "EFI_CERT_SHA256_GUID",
    ),
    (
        SignatureType::Sha384,
        EFI_CERT_SHA384_GUID,
        "EFI_CERT_SHA384_GUID",
    ),
    (
        SignatureType::Sha512,
        EFI_CERT_SHA512_GUID,
        "EFI_CERT_SHA512_GUID",
    ),
    (
        SignatureType::Rsa2048,
        EFI_CERT_RSA2048_GUID,
        "EFI_CERT_RSA2048_GUID",
    ),
    (
        SignatureType::Rsa2048Sha1,
        EFI_CERT_RSA2048_SHA1_GUID,
        "EFI_CERT_RSA2048_SHA1_GUID",
    ),
    (
        SignatureType::Rsa2048Sha256,
        EFI_CERT_RSA2048_SHA256_GUID,
        "EFI_CERT_RSA2048_SHA256_GUID",
    ),
    (
        SignatureType::X509,
        EFI_CERT_X509_GUID,
        "EFI_CERT_X509_GUID",
    ),
    (
        SignatureType::X509Sha256,
        EFI_CERT_X509_SHA256_GUID,
        "EFI_CERT_X509_SHA256_GUID",
    ),
    (
        SignatureType::X509Sha384,
        EFI_CERT_X509_SHA384_GUID,
        "EFI_CERT_X509_SHA384_GUID",
    ),
    (
        SignatureType::X509Sha512,
        EFI_CERT_X509_SHA512_GUID,
        "EFI_CERT_X509_SHA512_GUID",
    ),
    (
        SignatureType::Pkcs7,
        EFI_CERT_TYPE_PKCS7_GUID,
        "EFI_CERT_TYPE_PKCS7_GUID",
    ),
    (
        SignatureType::ExternalManagement,
        EFI_CERT_EXTERNAL_MANAGEMENT_GUID,
        "EFI_CERT_EXTERNAL_MANAGEMENT_GUID",
    ),
];

impl SignatureType {
    pub fn from_guid(guid: Guid) -> SignatureType {
        SIGNATURE_TYPES
            .iter()
            .find(|(_, g, _)| *g == guid)
            .map(|(ty, _, _)| *ty)
            .unwrap_or(SignatureType::Unrecognized(guid))
    }

    pub fn guid(&self) -> Guid {
        match self {
            SignatureType::Unrecognized(guid) => *guid,
            known => SIGNATURE_TYPES
                .iter()
                .find(|(ty, _, _)| ty == known)
                .map(|(_, g, _)| *g)
                .unwrap_or(Guid::ZERO),
        }
    }

    pub fn name(&self) -> &'static str {
        SIGNATURE_TYPES
            .iter()
            .find(|(ty, _, _)| ty == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("unrecognized")
    }

    /// Size of `SignatureData` (excluding the owner GUID) for types whose
    /// payload has a fixed width.
    pub fn payload_size(&self) -> Option<usize> {
        match self {
            SignatureType::Sha1 => Some(20),
            SignatureType::Sha224 => Some(28),
            SignatureType::Sha256 => Some(32),
            SignatureType::Sha384 => Some(48),
            SignatureType::Sha512 => Some(64),
            SignatureType::Rsa2048 => Some(256),
            SignatureType::Rsa2048Sha1 => Some(256),
            SignatureType::Rsa2048Sha256 => Some(256),
            // digest of the TBSCertificate followed by an EFI_TIME revocation time
            SignatureType::X509Sha256 => Some(32 + 16),
            SignatureType::X509Sha384 => Some(48 + 16),
            SignatureType::X509Sha512 => Some(64 + 16),
            SignatureType::ExternalManagement => Some(1),
            SignatureType::X509 | SignatureType::Pkcs7 | SignatureType::Unrecognized(_) => None,
        }
    }

    /// Whether the payload is a plain digest of an image or certificate.
    pub fn is_hash(&self) -> bool {
        matches!(
            self,
            SignatureType::Sha1
                | SignatureType::Sha224
                | SignatureType::Sha256
                | SignatureType::Sha384
                | SignatureType::Sha512
                | SignatureType::X509Sha256
                | SignatureType::X509Sha384
                | SignatureType::X509Sha512
        )
    }
}

impl From<Guid> for SignatureType {
    fn from(guid: Guid) -> SignatureType {
        SignatureType::from_guid(guid)
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureType::Unrecognized(guid) => write!(f, "unrecognized ({guid})"),
            known => f.write_str(known.name()),
        }
    }
}

/// `CertType` GUID of a WIN_CERTIFICATE_UEFI_GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertType {
    Pkcs7,
    Rsa2048Sha256,
    Unrecognized(Guid),
}

impl CertType {
    pub fn from_guid(guid: Guid) -> CertType {
        if guid == EFI_CERT_TYPE_PKCS7_GUID {
            CertType::Pkcs7
        } else if guid == EFI_CERT_TYPE_RSA2048_SHA256_GUID {
            CertType::Rsa2048Sha256
        } else {
            CertType::Unrecognized(guid)
        }
    }

    pub fn guid(&self) -> Guid {
        match self {
            CertType::Pkcs7 => EFI_CERT_TYPE_PKCS7_GUID,
            CertType::Rsa2048Sha256 => EFI_CERT_TYPE_RSA2048_SHA256_GUID,
            CertType::Unrecognized(guid) => *guid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CertType::Pkcs7 => "PKCS7",
            CertType::Rsa2048Sha256 => "RSA2048 SHA256",
            CertType::Unrecognized(_) => "unrecognized",
        }
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertType::Unrecognized(guid) => write!(f, "unrecognized ({guid})"),
            known => f.write_str(known.name()),
        }
    }
}
