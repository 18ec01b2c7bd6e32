//! Decoding and encoding of `EFI_SIGNATURE_LIST` databases (PK, KEK, db,
//! dbx, MokList, ...).
//!
//! A database is a run of signature lists packed back to back until the end
//! of the buffer. Each list carries signatures of a single
//! [`SignatureType`], all of the same size:
//!
//! ```text
//! EFI_SIGNATURE_LIST {
//!     SignatureType        GUID
//!     SignatureListSize    u32     whole list, this header included
//!     SignatureHeaderSize  u32
//!     SignatureSize        u32     owner GUID + payload
//!     SignatureHeader      [u8; SignatureHeaderSize]
//!     Signatures           [EFI_SIGNATURE_DATA; n]
//! }
//! ```
//!
//! Decoded lists borrow their payloads from the input buffer. Size fields
//! that disagree with each other are rejected, never reconciled.

use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use binrw::BinRead;
use byteorder::{ByteOrder, LittleEndian};
use uefi::Guid;

use crate::error::{Error, Result};
use crate::guid::SignatureType;
use crate::pkcs7::{self, ParsedCertificate};
use crate::reader::Reader;

/// Width of the fixed `EFI_SIGNATURE_LIST` fields.
pub const SIGNATURE_LIST_HEADER_SIZE: usize = 28;
/// Width of `EFI_SIGNATURE_DATA.SignatureOwner`.
pub const SIGNATURE_OWNER_SIZE: usize = 16;

#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct SignatureListHeader {
    #[br(map = |x: [u8; 16]| Guid::from_bytes(x))]
    signature_type: Guid,
    list_size: u32,
    header_size: u32,
    signature_size: u32,
}

/// One `EFI_SIGNATURE_DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry<'a> {
    pub owner: Guid,
    pub data: Cow<'a, [u8]>,
}

impl<'a> SignatureEntry<'a> {
    pub fn new(owner: Guid, data: impl Into<Cow<'a, [u8]>>) -> SignatureEntry<'a> {
        SignatureEntry {
            owner,
            data: data.into(),
        }
    }

    pub fn into_owned(self) -> SignatureEntry<'static> {
        SignatureEntry {
            owner: self.owner,
            data: Cow::Owned(self.data.into_owned()),
        }
    }

    /// Decodes the payload as a DER X.509 certificate.
    pub fn certificate(&self) -> Result<ParsedCertificate> {
        pkcs7::parse_certificate(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureList<'a> {
    signature_type: SignatureType,
    list_size: u32,
    header_size: u32,
    signature_size: u32,
    header: Cow<'a, [u8]>,
    signatures: Vec<SignatureEntry<'a>>,
}

impl<'a> SignatureList<'a> {
    /// Builds a list from its entries, computing the size fields.
    ///
    /// All entries must carry payloads of the same length, and fixed-size
    /// signature types must carry payloads of their defined width.
    pub fn new(
        signature_type: SignatureType,
        header: impl Into<Cow<'a, [u8]>>,
        signatures: Vec<SignatureEntry<'a>>,
    ) -> Result<SignatureList<'a>> {
        let header = header.into();
        let payload_len = match signatures.first() {
            Some(first) => first.data.len(),
            None => signature_type.payload_size().unwrap_or(0),
        };

        if signatures.iter().any(|s| s.data.len() != payload_len) {
            return Err(Error::MalformedSignatureList(
                "signatures in one list must have the same size",
            ));
        }
        if let Some(expected) = signature_type.payload_size() {
            if payload_len != expected {
                return Err(Error::MalformedSignatureList(
                    "payload size does not match the signature type",
                ));
            }
        }

        let signature_size = SIGNATURE_OWNER_SIZE + payload_len;
        let list_size = signatures
            .len()
            .checked_mul(signature_size)
            .and_then(|n| n.checked_add(SIGNATURE_LIST_HEADER_SIZE + header.len()))
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(Error::MalformedSignatureList("list does not fit in 32 bits"))?;

        Ok(SignatureList {
            signature_type,
            list_size,
            header_size: header.len() as u32,
            signature_size: signature_size as u32,
            header,
            signatures,
        })
    }

    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }

    pub fn list_size(&self) -> u32 {
        self.list_size
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    pub fn signature_size(&self) -> u32 {
        self.signature_size
    }

    /// The `SignatureHeader` blob, usually empty.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn signatures(&self) -> &[SignatureEntry<'a>] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn into_owned(self) -> SignatureList<'static> {
        SignatureList {
            signature_type: self.signature_type,
            list_size: self.list_size,
            header_size: self.header_size,
            signature_size: self.signature_size,
            header: Cow::Owned(self.header.into_owned()),
            signatures: self
                .signatures
                .into_iter()
                .map(SignatureEntry::into_owned)
                .collect(),
        }
    }

    /// Serializes the list as an `EFI_SIGNATURE_LIST`.
    pub fn extend_as_bytes(&self, out: &mut Vec<u8>) {
        let mut fixed = [0u8; SIGNATURE_LIST_HEADER_SIZE];
        fixed[..16].copy_from_slice(&self.signature_type.guid().to_bytes());
        LittleEndian::write_u32(&mut fixed[16..20], self.list_size);
        LittleEndian::write_u32(&mut fixed[20..24], self.header_size);
        LittleEndian::write_u32(&mut fixed[24..28], self.signature_size);

        out.reserve(self.list_size as usize);
        out.extend_from_slice(&fixed);
        out.extend_from_slice(&self.header);
        for sig in &self.signatures {
            out.extend_from_slice(&sig.owner.to_bytes());
            out.extend_from_slice(&sig.data);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.extend_as_bytes(&mut out);
        out
    }
}

impl fmt::Display for SignatureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Signature Type: {}", self.signature_type)?;
        writeln!(f, "List Size: {}", self.list_size)?;
        writeln!(f, "Header Size: {}", self.header_size)?;
        writeln!(f, "Signature Size: {}", self.signature_size)?;
        writeln!(f, "Signature Header: {}", hex::encode(&self.header))?;
        writeln!(f, "Number of Signatures: {}", self.signatures.len())?;
        for sig in &self.signatures {
            writeln!(f, "\tOwner: {}", sig.owner)?;
            if self.signature_type.is_hash() {
                writeln!(f, "\t\tDigest: {}", hex::encode(&sig.data))?;
            } else {
                writeln!(f, "\t\tData: {} bytes", sig.data.len())?;
            }
        }
        Ok(())
    }
}

/// Reads one `EFI_SIGNATURE_LIST` from `reader`.
pub fn read_signature_list<'a>(reader: &mut Reader<'a>) -> Result<SignatureList<'a>> {
    let start = reader.position();
    let SignatureListHeader {
        signature_type,
        list_size,
        header_size,
        signature_size,
    } = reader.read_struct(SIGNATURE_LIST_HEADER_SIZE, SignatureListHeader::read)?;
    let signature_type = SignatureType::from_guid(signature_type);

    let body_len = (list_size as usize)
        .checked_sub(SIGNATURE_LIST_HEADER_SIZE)
        .and_then(|n| n.checked_sub(header_size as usize))
        .ok_or(Error::MalformedSignatureList(
            "SignatureListSize is smaller than the list headers",
        ))?;

    let header = reader.read_bytes(header_size as usize)?;
    let mut body = reader.sub_reader(body_len)?;

    let signature_size = signature_size as usize;
    let count = if body_len == 0 {
        0
    } else {
        if signature_size == 0 {
            return Err(Error::MalformedSignatureList(
                "SignatureSize is zero but the list has signature data",
            ));
        }
        if signature_size < SIGNATURE_OWNER_SIZE {
            return Err(Error::MalformedSignatureList(
                "SignatureSize is smaller than the owner GUID",
            ));
        }
        if body_len % signature_size != 0 {
            return Err(Error::MalformedSignatureList(
                "signature data is not a multiple of SignatureSize",
            ));
        }
        if let Some(expected) = signature_type.payload_size() {
            if signature_size != SIGNATURE_OWNER_SIZE + expected {
                return Err(Error::MalformedSignatureList(
                    "SignatureSize does not match the signature type",
                ));
            }
        }
        body_len / signature_size
    };

    let mut signatures = Vec::with_capacity(count);
    for _ in 0..count {
        let owner = body.read_guid()?;
        let data = body.read_bytes(signature_size - SIGNATURE_OWNER_SIZE)?;
        signatures.push(SignatureEntry::new(owner, data));
    }

    log::trace!(
        "signature list at {start:#x}: {signature_type}, {count} x {signature_size} bytes"
    );

    Ok(SignatureList {
        signature_type,
        list_size,
        header_size,
        signature_size: signature_size as u32,
        header: Cow::Borrowed(header),
        signatures,
    })
}

/// Reads signature lists until `reader` is exhausted.
pub fn read_signature_database<'a>(reader: &mut Reader<'a>) -> Result<SignatureDatabase<'a>> {
    let mut lists = Vec::new();
    while !reader.is_empty() {
        lists.push(read_signature_list(reader)?);
    }
    log::debug!("decoded {} signature lists", lists.len());
    Ok(SignatureDatabase { lists })
}

pub fn parse_signature_database(data: &[u8]) -> Result<SignatureDatabase<'_>> {
    read_signature_database(&mut Reader::new(data))
}

/// An ordered run of signature lists, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureDatabase<'a> {
    lists: Vec<SignatureList<'a>>,
}

impl<'a> SignatureDatabase<'a> {
    pub fn new(lists: Vec<SignatureList<'a>>) -> SignatureDatabase<'a> {
        SignatureDatabase { lists }
    }

    pub fn lists(&self) -> &[SignatureList<'a>] {
        &self.lists
    }

    pub fn into_lists(self) -> Vec<SignatureList<'a>> {
        self.lists
    }

    /// Every signature in the database alongside the type of its list.
    pub fn entries(&self) -> impl Iterator<Item = (SignatureType, &SignatureEntry<'a>)> + '_ {
        self.lists
            .iter()
            .flat_map(|l| l.signatures.iter().map(move |s| (l.signature_type, s)))
    }

    /// Decodes every X.509 entry. Each entry is decoded on its own, so one
    /// malformed certificate does not hide the others.
    pub fn certificates(
        &self,
    ) -> impl Iterator<Item = (&SignatureEntry<'a>, Result<ParsedCertificate>)> + '_ {
        self.entries()
            .filter(|(ty, _)| *ty == SignatureType::X509)
            .map(|(_, sig)| (sig, sig.certificate()))
    }

    /// Whether a hash list of type `signature_type` contains `digest`.
    pub fn contains_hash(&self, signature_type: SignatureType, digest: &[u8]) -> bool {
        self.entries()
            .any(|(ty, sig)| ty == signature_type && sig.data.as_ref() == digest)
    }

    pub fn into_owned(self) -> SignatureDatabase<'static> {
        SignatureDatabase {
            lists: self
                .lists
                .into_iter()
                .map(SignatureList::into_owned)
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for list in &self.lists {
            list.extend_as_bytes(&mut out);
        }
        out
    }
}

impl<'a> Deref for SignatureDatabase<'a> {
    type Target = [SignatureList<'a>];

    fn deref(&self) -> &Self::Target {
        &self.lists
    }
}

impl<'a> IntoIterator for SignatureDatabase<'a> {
    type Item = SignatureList<'a>;
    type IntoIter = std::vec::IntoIter<SignatureList<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.lists.into_iter()
    }
}

impl fmt::Display for SignatureDatabase<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of Signature Lists: {}", self.lists.len())?;
        for list in &self.lists {
            writeln!(f)?;
            write!(f, "{list}")?;
        }
        Ok(())
    }
}
