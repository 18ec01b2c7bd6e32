//! Locates and splits the Certificate Table of a signed PE/COFF image.
//!
//! Only the headers needed to find the table are decoded; the image is never
//! mapped, relocated or hashed.

use std::fmt;

use binrw::BinRead;

use crate::error::{Error, Result};
use crate::pkcs7::{self, Pkcs7SignedData};
use crate::reader::Reader;
use crate::win_certificate::{
    WinCertType, WinCertificateHeader, WIN_CERT_REVISION_1_0, WIN_CERT_REVISION_2_0,
};

pub const IMAGE_DOS_SIGNATURE: &[u8; 2] = b"MZ";
pub const IMAGE_NT_SIGNATURE: &[u8; 4] = b"PE\0\0";
pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10b;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20b;
/// Index of the Certificate Table in the data directory array.
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;

/// Certificate Table records start on 8-byte boundaries.
const CERTIFICATE_ALIGNMENT: usize = 8;

#[derive(BinRead, Debug)]
#[br(little)]
struct DosHeader {
    magic: [u8; 2],
    #[br(pad_before = 0x3a)]
    pe_offset: u32,
}

impl DosHeader {
    const SIZE: usize = 0x40;
}

#[derive(BinRead, Debug)]
#[br(little)]
struct CoffHeader {
    signature: [u8; 4],
    machine: u16,
    number_of_sections: u16,
    _time_date_stamp: u32,
    _pointer_to_symbol_table: u32,
    _number_of_symbols: u32,
    size_of_optional_header: u16,
    _characteristics: u16,
}

impl CoffHeader {
    const SIZE: usize = 24;
}

/// `IMAGE_DATA_DIRECTORY`. For the Certificate Table, `virtual_address` is a
/// file offset.
#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[br(little)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    const SIZE: usize = 8;
}

impl fmt::Display for DataDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Virtual Address: {:#x}", self.virtual_address)?;
        writeln!(f, "Size in bytes: {}", self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Pe32,
    Pe32Plus,
}

impl ImageFormat {
    /// Offset of `NumberOfRvaAndSizes` from the start of the optional header.
    fn rva_count_offset(&self) -> usize {
        match self {
            ImageFormat::Pe32 => 92,
            ImageFormat::Pe32Plus => 108,
        }
    }
}

/// One `WIN_CERTIFICATE` record from the Certificate Table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedSignature<'a> {
    pub length: u32,
    pub revision: u16,
    pub cert_type: WinCertType,
    pub certificate: &'a [u8],
}

impl EmbeddedSignature<'_> {
    /// Decodes the record as Authenticode PKCS#7 SignedData. Only meaningful
    /// for `WIN_CERT_TYPE_PKCS_SIGNED_DATA` records.
    pub fn signed_data(&self) -> Result<Pkcs7SignedData> {
        pkcs7::parse_signature(self.certificate)
    }
}

/// The headers of a PE image that lead to its Certificate Table.
#[derive(Debug, Clone, Copy)]
pub struct PeImage<'a> {
    data: &'a [u8],
    machine: u16,
    number_of_sections: u16,
    format: ImageFormat,
    certificate_table: DataDirectory,
}

impl<'a> PeImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<PeImage<'a>> {
        if !data.starts_with(IMAGE_DOS_SIGNATURE) {
            return Err(Error::NotAPeImage("missing MZ signature"));
        }
        let mut reader = Reader::new(data);
        let dos = reader.read_struct(DosHeader::SIZE, DosHeader::read)?;
        debug_assert_eq!(&dos.magic, IMAGE_DOS_SIGNATURE);

        let mut reader = Reader::new(data);
        reader
            .skip(dos.pe_offset as usize)
            .map_err(|_| Error::NotAPeImage("PE header offset is past the end of the image"))?;
        if reader.peek_bytes(IMAGE_NT_SIGNATURE.len()).ok() != Some(&IMAGE_NT_SIGNATURE[..]) {
            return Err(Error::NotAPeImage("missing PE signature"));
        }
        let coff = reader.read_struct(CoffHeader::SIZE, CoffHeader::read)?;
        debug_assert_eq!(&coff.signature, IMAGE_NT_SIGNATURE);

        let mut optional = reader.sub_reader(coff.size_of_optional_header as usize)?;
        let format = match optional.read_u16()? {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => ImageFormat::Pe32,
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => ImageFormat::Pe32Plus,
            magic => return Err(Error::UnsupportedImageFormat(magic)),
        };

        optional.skip(format.rva_count_offset() - 2)?;
        let rva_count = optional.read_u32()? as usize;
        let certificate_table = if rva_count <= IMAGE_DIRECTORY_ENTRY_SECURITY {
            DataDirectory::default()
        } else {
            optional.skip(IMAGE_DIRECTORY_ENTRY_SECURITY * DataDirectory::SIZE)?;
            optional.read_struct(DataDirectory::SIZE, DataDirectory::read)?
        };

        log::debug!(
            "{format:?} image, machine {:#06x}, certificate table at {:#x} ({} bytes)",
            coff.machine,
            certificate_table.virtual_address,
            certificate_table.size
        );

        Ok(PeImage {
            data,
            machine: coff.machine,
            number_of_sections: coff.number_of_sections,
            format,
            certificate_table,
        })
    }

    pub fn machine(&self) -> u16 {
        self.machine
    }

    pub fn number_of_sections(&self) -> u16 {
        self.number_of_sections
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn certificate_table(&self) -> DataDirectory {
        self.certificate_table
    }

    /// Splits the Certificate Table into its `WIN_CERTIFICATE` records. An
    /// image without a table has no signatures.
    pub fn signatures(&self) -> Result<Vec<EmbeddedSignature<'a>>> {
        let dir = self.certificate_table;
        if dir.size == 0 {
            return Ok(Vec::new());
        }

        let start = dir.virtual_address as usize;
        let size = dir.size as usize;
        let mut reader = Reader::new(self.data);
        reader.skip(start)?;
        let table = reader.read_bytes(size)?;

        let mut signatures = Vec::new();
        let mut offset = 0;
        while offset < table.len() {
            let mut record = Reader::new(&table[offset..]);
            let header = WinCertificateHeader::parse(&mut record).map_err(|_| {
                Error::MalformedCertificateTable("record header crosses the end of the table")
            })?;

            let length = header.length as usize;
            if length < WinCertificateHeader::SIZE {
                return Err(Error::MalformedCertificateTable(
                    "record is shorter than its header",
                ));
            }
            let certificate = record
                .read_bytes(length - WinCertificateHeader::SIZE)
                .map_err(|_| {
                    Error::MalformedCertificateTable("record length exceeds the certificate table")
                })?;

            if header.revision != WIN_CERT_REVISION_2_0 && header.revision != WIN_CERT_REVISION_1_0
            {
                log::debug!(
                    "certificate record at {:#x} has revision {:#06x}",
                    start + offset,
                    header.revision
                );
            }

            signatures.push(EmbeddedSignature {
                length: header.length,
                revision: header.revision,
                cert_type: header.cert_type,
                certificate,
            });

            offset = (offset + length).next_multiple_of(CERTIFICATE_ALIGNMENT);
        }

        Ok(signatures)
    }
}

/// Reads the Certificate Table entry of the image's data directory.
pub fn signature_data_directory(image: &[u8]) -> Result<DataDirectory> {
    PeImage::parse(image).map(|pe| pe.certificate_table())
}

/// Reads all `WIN_CERTIFICATE` records from the image's Certificate Table.
pub fn signatures(image: &[u8]) -> Result<Vec<EmbeddedSignature<'_>>> {
    PeImage::parse(image)?.signatures()
}
