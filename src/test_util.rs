//! DER fixtures shared by the unit tests.

use std::str::FromStr;
use std::time::Duration;

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use der::asn1::{Any, BitString, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::Encode;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};
use x509_cert::Certificate;

use crate::pkcs7::ID_SIGNED_DATA;

pub const ISSUER: &str = "CN=Test Root,O=Example";
pub const SIGNATURE: [u8; 8] = [0xab; 8];

pub const SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const SHA256_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

fn algorithm(oid: ObjectIdentifier) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid,
        parameters: None,
    }
}

fn time(secs: u64) -> Time {
    Time::UtcTime(UtcTime::from_unix_duration(Duration::from_secs(secs)).unwrap())
}

pub fn certificate(subject: &str, serial: &[u8]) -> Certificate {
    Certificate {
        tbs_certificate: TbsCertificate {
            version: Version::V1,
            serial_number: SerialNumber::new(serial).unwrap(),
            signature: algorithm(SHA256_WITH_RSA),
            issuer: Name::from_str(ISSUER).unwrap(),
            validity: Validity {
                not_before: time(1_600_000_000),
                not_after: time(2_000_000_000),
            },
            subject: Name::from_str(subject).unwrap(),
            subject_public_key_info: SubjectPublicKeyInfoOwned {
                algorithm: algorithm(RSA_ENCRYPTION),
                subject_public_key: BitString::from_bytes(&[0x30, 0x00]).unwrap(),
            },
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: None,
        },
        signature_algorithm: algorithm(SHA256_WITH_RSA),
        signature: BitString::from_bytes(&[0x5a; 16]).unwrap(),
    }
}

pub fn certificate_der(subject: &str, serial: &[u8]) -> Vec<u8> {
    certificate(subject, serial).to_der().unwrap()
}

fn signed_data(subject: &str, serial: &[u8]) -> SignedData {
    let cert = certificate(subject, serial);
    let signer = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: algorithm(SHA256),
        signed_attrs: None,
        signature_algorithm: algorithm(RSA_ENCRYPTION),
        signature: OctetString::new(SIGNATURE.to_vec()).unwrap(),
        unsigned_attrs: None,
    };

    SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![algorithm(SHA256)]).unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(
            SetOfVec::try_from(vec![CertificateChoices::Certificate(cert)]).unwrap(),
        )),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer]).unwrap()),
    }
}

/// A bare SignedData, the way authenticated variables carry it.
pub fn signed_data_der(subject: &str, serial: &[u8]) -> Vec<u8> {
    signed_data(subject, serial).to_der().unwrap()
}

/// A SignedData wrapped in a ContentInfo, the way PE images carry it.
pub fn content_info_der(subject: &str, serial: &[u8]) -> Vec<u8> {
    ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data(subject, serial)).unwrap(),
    }
    .to_der()
    .unwrap()
}
