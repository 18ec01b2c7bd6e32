//! Structural decoding of the PKCS#7 SignedData and X.509 certificates
//! embedded in signature lists, authenticated variables and PE images.
//!
//! Nothing here verifies a signature, a chain or a validity period.

use std::fmt;

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier};
use der::asn1::ObjectIdentifier;
use der::{Decode, Encode, Header, Reader as _, SliceReader};
use num_bigint::{BigInt, BigUint, Sign};
use x509_cert::time::Validity;
use x509_cert::Certificate;

pub use x509_cert::name::Name;

use crate::error::{Error, Result};

/// `signedData` content type (RFC 2315, section 14).
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// Certificate serial number. Keeps the big-endian two's complement bytes of
/// the DER INTEGER alongside their value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialNumber {
    bytes: Vec<u8>,
    value: BigInt,
}

impl SerialNumber {
    pub fn from_der_bytes(bytes: &[u8]) -> SerialNumber {
        SerialNumber {
            bytes: bytes.to_vec(),
            value: BigInt::from_signed_bytes_be(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn value(&self) -> &BigInt {
        &self.value
    }

    pub fn is_negative(&self) -> bool {
        self.value.sign() == Sign::Minus
    }

    pub fn magnitude(&self) -> &BigUint {
        self.value.magnitude()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.magnitude().to_bytes_be())
    }

    pub fn to_decimal(&self) -> String {
        self.value.to_string()
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal())
    }
}

/// Decoded view of an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    inner: Certificate,
}

impl ParsedCertificate {
    pub fn new(inner: Certificate) -> ParsedCertificate {
        ParsedCertificate { inner }
    }

    pub fn issuer(&self) -> &Name {
        &self.inner.tbs_certificate.issuer
    }

    pub fn subject(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn serial_number(&self) -> SerialNumber {
        SerialNumber::from_der_bytes(self.inner.tbs_certificate.serial_number.as_bytes())
    }

    pub fn validity(&self) -> &Validity {
        &self.inner.tbs_certificate.validity
    }

    pub fn signature_algorithm(&self) -> ObjectIdentifier {
        self.inner.signature_algorithm.oid
    }

    pub fn certificate(&self) -> &Certificate {
        &self.inner
    }
}

impl fmt::Display for ParsedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Subject: {}", self.subject())?;
        writeln!(f, "Issuer: {}", self.issuer())?;
        writeln!(f, "Serial Number: {}", self.serial_number())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerId {
    IssuerAndSerialNumber {
        issuer: Name,
        serial_number: SerialNumber,
    },
    SubjectKeyIdentifier(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo {
    pub signer: SignerId,
    pub digest_algorithm: ObjectIdentifier,
    pub signature_algorithm: ObjectIdentifier,
    pub encrypted_digest: Vec<u8>,
}

impl fmt::Display for SignerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.signer {
            SignerId::IssuerAndSerialNumber {
                issuer,
                serial_number,
            } => {
                writeln!(f, "Issuer Name: {issuer}")?;
                writeln!(f, "Serial Number: {serial_number}")?;
            }
            SignerId::SubjectKeyIdentifier(ski) => {
                writeln!(f, "Subject Key Identifier: {}", hex::encode(ski))?;
            }
        }
        writeln!(f, "Digest Algorithm: {}", self.digest_algorithm)
    }
}

/// Decoded view of a PKCS#7 SignedData.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkcs7SignedData {
    pub digest_algorithms: Vec<ObjectIdentifier>,
    /// Type of the encapsulated content (SpcIndirectDataContent for
    /// Authenticode, id-data for authenticated variables).
    pub content_type: ObjectIdentifier,
    pub certificates: Vec<ParsedCertificate>,
    pub signer_infos: Vec<SignerInfo>,
}

impl From<SignedData> for Pkcs7SignedData {
    fn from(signed_data: SignedData) -> Pkcs7SignedData {
        let certificates = signed_data
            .certificates
            .as_ref()
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(cert) => {
                            Some(ParsedCertificate::new(cert.clone()))
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let signer_infos = signed_data
            .signer_infos
            .0
            .iter()
            .map(|si| SignerInfo {
                signer: match &si.sid {
                    SignerIdentifier::IssuerAndSerialNumber(ias) => {
                        SignerId::IssuerAndSerialNumber {
                            issuer: ias.issuer.clone(),
                            serial_number: SerialNumber::from_der_bytes(
                                ias.serial_number.as_bytes(),
                            ),
                        }
                    }
                    SignerIdentifier::SubjectKeyIdentifier(ski) => {
                        SignerId::SubjectKeyIdentifier(ski.0.as_bytes().to_vec())
                    }
                },
                digest_algorithm: si.digest_alg.oid,
                signature_algorithm: si.signature_algorithm.oid,
                encrypted_digest: si.signature.as_bytes().to_vec(),
            })
            .collect();

        Pkcs7SignedData {
            digest_algorithms: signed_data.digest_algorithms.iter().map(|a| a.oid).collect(),
            content_type: signed_data.encap_content_info.econtent_type,
            certificates,
            signer_infos,
        }
    }
}

impl fmt::Display for Pkcs7SignedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for si in &self.signer_infos {
            write!(f, "{si}")?;
        }
        Ok(())
    }
}

/// Cuts `bytes` down to the first DER TLV. WIN_CERTIFICATE records are
/// padded to 8 bytes, so the payload may carry trailing zeros.
fn der_value(bytes: &[u8]) -> der::Result<&[u8]> {
    let mut reader = SliceReader::new(bytes)?;
    let header = Header::decode(&mut reader)?;
    let len = usize::try_from((reader.position() + header.length)?)?;
    Ok(&bytes[..len.min(bytes.len())])
}

/// Decodes a PKCS#7 SignedData, either wrapped in a ContentInfo (as in PE
/// images) or bare (as in most authenticated variables).
pub fn parse_signature(bytes: &[u8]) -> Result<Pkcs7SignedData> {
    let der = der_value(bytes).map_err(Error::MalformedPkcs7)?;

    let signed_data = match ContentInfo::from_der(der) {
        Ok(info) => {
            if info.content_type != ID_SIGNED_DATA {
                return Err(Error::MalformedPkcs7(
                    der::ErrorKind::OidUnknown {
                        oid: info.content_type,
                    }
                    .into(),
                ));
            }
            let inner = info.content.to_der().map_err(Error::MalformedPkcs7)?;
            SignedData::from_der(&inner).map_err(Error::MalformedPkcs7)?
        }
        Err(_) => SignedData::from_der(der).map_err(Error::MalformedPkcs7)?,
    };

    let signed_data = Pkcs7SignedData::from(signed_data);
    log::debug!(
        "PKCS#7 with {} certificates and {} signers",
        signed_data.certificates.len(),
        signed_data.signer_infos.len()
    );
    Ok(signed_data)
}

pub fn parse_certificate(bytes: &[u8]) -> Result<ParsedCertificate> {
    Certificate::from_der(bytes)
        .map(ParsedCertificate::new)
        .map_err(Error::MalformedCertificate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[test]
    fn parses_certificate() {
        let der = test_util::certificate_der("CN=Test Signer,O=Example", &[0x01, 0x02, 0x03]);
        let cert = parse_certificate(&der).unwrap();
        assert_eq!(cert.subject().to_string(), "CN=Test Signer,O=Example");
        assert_eq!(cert.issuer().to_string(), test_util::ISSUER);
        assert_eq!(cert.serial_number().to_decimal(), "66051");
        assert_eq!(cert.serial_number().to_hex(), "010203");
    }

    #[test]
    fn garbage_certificate_is_malformed() {
        assert!(matches!(
            parse_certificate(&[0x30, 0x03, 0x02, 0x01]),
            Err(Error::MalformedCertificate(_))
        ));
        assert!(matches!(
            parse_certificate(&[]),
            Err(Error::MalformedCertificate(_))
        ));
    }

    #[test]
    fn parses_content_info_with_padding() {
        let mut der = test_util::content_info_der("CN=Image Signer", &[0x42]);
        der.extend_from_slice(&[0u8; 5]);

        let sd = parse_signature(&der).unwrap();
        assert_eq!(sd.certificates.len(), 1);
        assert_eq!(sd.signer_infos.len(), 1);
        assert_eq!(sd.digest_algorithms, vec![test_util::SHA256]);

        let si = &sd.signer_infos[0];
        assert_eq!(si.digest_algorithm, test_util::SHA256);
        assert_eq!(si.encrypted_digest, test_util::SIGNATURE.to_vec());
        match &si.signer {
            SignerId::IssuerAndSerialNumber {
                issuer,
                serial_number,
            } => {
                assert_eq!(issuer.to_string(), test_util::ISSUER);
                assert_eq!(serial_number.to_decimal(), "66");
            }
            other => panic!("unexpected signer {other:?}"),
        }
    }

    #[test]
    fn parses_bare_signed_data() {
        let der = test_util::signed_data_der("CN=Variable Signer", &[0x07]);
        let sd = parse_signature(&der).unwrap();
        assert_eq!(sd.certificates[0].subject().to_string(), "CN=Variable Signer");
        assert_eq!(sd.content_type, test_util::ID_DATA);
    }

    #[test]
    fn garbage_signature_is_malformed() {
        assert!(matches!(
            parse_signature(&[0xff, 0x00]),
            Err(Error::MalformedPkcs7(_))
        ));
        assert!(matches!(parse_signature(&[]), Err(Error::MalformedPkcs7(_))));
    }

    #[test]
    fn serial_number_rendering() {
        assert_eq!(SerialNumber::from_der_bytes(&[0x00]).to_decimal(), "0");
        assert_eq!(SerialNumber::from_der_bytes(&[0x00, 0xff]).to_decimal(), "255");
        assert_eq!(
            SerialNumber::from_der_bytes(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
                .to_decimal(),
            "18446744073709551616"
        );
        let negative = SerialNumber::from_der_bytes(&[0xff, 0x38]);
        assert!(negative.is_negative());
        assert_eq!(negative.to_string(), "-200");
        assert_eq!(negative.to_hex(), "c8");
        assert_eq!(negative.as_bytes(), &[0xff, 0x38]);
    }
}
