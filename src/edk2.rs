//! EDK2 non-volatile variable store images, such as `OVMF_VARS.fd`.
//!
//! The image starts with a firmware volume header, followed by a variable
//! store header and a packed run of variable records, each aligned to 4
//! bytes. The run ends at the first slot whose start id is not `0x55aa`,
//! normally erased flash reading `0xffff`.

use binrw::BinRead;
use bitflags::bitflags;
use uefi::table::runtime::VariableAttributes;
use uefi::{guid, CString16, Guid};

use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::variable::{EfiVariable, VariableSource};
use crate::variable_authentication::EfiTime;

/// File system GUID of the volume holding the variable store.
pub const EFI_SYSTEM_NV_DATA_FV_GUID: Guid = guid!("fff12b8d-7696-4c8b-a985-2747075b4f50");
/// Store of authenticated variable records (60-byte headers).
pub const EFI_AUTHENTICATED_VARIABLE_GUID: Guid = guid!("aaf32c78-947b-439a-a180-2e144ec37792");
/// Store of plain variable records (32-byte headers).
pub const EFI_VARIABLE_GUID: Guid = guid!("ddcf3616-3275-4164-98b6-fe85707ffe7d");

pub const FV_SIGNATURE: &[u8; 4] = b"_FVH";
pub const VARIABLE_DATA: u16 = 0x55aa;
pub const VARIABLE_STORE_FORMATTED: u8 = 0x5a;
pub const VARIABLE_STORE_HEALTHY: u8 = 0xfe;

const VARIABLE_ALIGNMENT: usize = 4;

bitflags! {
    /// `EFI_FVB_ATTRIBUTES_2`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FirmwareVolumeAttributes: u32 {
        const READ_DISABLED_CAP  = 0x00000001;
        const READ_ENABLED_CAP   = 0x00000002;
        const READ_STATUS        = 0x00000004;
        const WRITE_DISABLED_CAP = 0x00000008;
        const WRITE_ENABLED_CAP  = 0x00000010;
        const WRITE_STATUS       = 0x00000020;
        const LOCK_CAP           = 0x00000040;
        const LOCK_STATUS        = 0x00000080;
        const STICKY_WRITE       = 0x00000200;
        const MEMORY_MAPPED      = 0x00000400;
        const ERASE_POLARITY     = 0x00000800;
        const READ_LOCK_CAP      = 0x00001000;
        const READ_LOCK_STATUS   = 0x00002000;
        const WRITE_LOCK_CAP     = 0x00004000;
        const WRITE_LOCK_STATUS  = 0x00008000;
        const ALIGNMENT          = 0x001F0000;
        const WEAK_ALIGNMENT     = 0x80000000;
    }
}

impl FirmwareVolumeAttributes {
    /// Required alignment of the volume in bytes.
    pub fn alignment(&self) -> u64 {
        1 << ((self.bits() & Self::ALIGNMENT.bits()) >> 16)
    }
}

bitflags! {
    /// Progress of a variable update. Flash can only clear bits, so each
    /// step clears one bit of the raw state byte; these are the cleared bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VariableState: u8 {
        const HEADER_VALID          = 0x80;
        const ADDED                 = 0x40;
        const DELETED               = 0x02;
        const IN_DELETED_TRANSITION = 0x01;
    }
}

impl VariableState {
    pub fn from_raw(raw: u8) -> VariableState {
        VariableState::from_bits_truncate(!raw)
    }

    /// Only fully added variables that were never marked for deletion count.
    pub fn is_live(&self) -> bool {
        *self == VariableState::HEADER_VALID | VariableState::ADDED
    }
}

/// `EFI_FIRMWARE_VOLUME_HEADER` without its block map.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct FirmwareVolumeHeader {
    pub zero_vector: [u8; 16],
    #[br(map = |x: [u8; 16]| Guid::from_bytes(x))]
    pub file_system_guid: Guid,
    pub length: u64,
    pub signature: [u8; 4],
    #[br(map = |x: u32| FirmwareVolumeAttributes::from_bits_retain(x))]
    pub attributes: FirmwareVolumeAttributes,
    pub header_length: u16,
    pub checksum: u16,
    pub ext_header_offset: u16,
    #[br(pad_before = 1)]
    pub revision: u8,
}

impl FirmwareVolumeHeader {
    pub const SIZE: usize = 56;
}

/// `VARIABLE_STORE_HEADER`.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct VariableStoreHeader {
    #[br(map = |x: [u8; 16]| Guid::from_bytes(x))]
    pub signature: Guid,
    pub size: u32,
    pub format: u8,
    #[br(pad_after = 6)]
    pub state: u8,
}

impl VariableStoreHeader {
    pub const SIZE: usize = 28;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableStoreFormat {
    Authenticated,
    Plain,
}

impl VariableStoreFormat {
    fn from_guid(guid: Guid) -> Option<VariableStoreFormat> {
        if guid == EFI_AUTHENTICATED_VARIABLE_GUID {
            Some(VariableStoreFormat::Authenticated)
        } else if guid == EFI_VARIABLE_GUID {
            Some(VariableStoreFormat::Plain)
        } else {
            None
        }
    }

    fn header_size(&self) -> usize {
        match self {
            VariableStoreFormat::Authenticated => AuthenticatedVariableHeader::SIZE,
            VariableStoreFormat::Plain => PlainVariableHeader::SIZE,
        }
    }
}

/// `AUTHENTICATED_VARIABLE_HEADER`.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct AuthenticatedVariableHeader {
    start_id: u16,
    state: u8,
    #[br(pad_before = 1)]
    attributes: u32,
    monotonic_count: u64,
    time_stamp: EfiTime,
    pub_key_index: u32,
    name_size: u32,
    data_size: u32,
    #[br(map = |x: [u8; 16]| Guid::from_bytes(x))]
    vendor: Guid,
}

impl AuthenticatedVariableHeader {
    const SIZE: usize = 60;
}

/// `VARIABLE_HEADER`.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct PlainVariableHeader {
    start_id: u16,
    state: u8,
    #[br(pad_before = 1)]
    attributes: u32,
    name_size: u32,
    data_size: u32,
    #[br(map = |x: [u8; 16]| Guid::from_bytes(x))]
    vendor: Guid,
}

impl PlainVariableHeader {
    const SIZE: usize = 32;
}

/// Fields only authenticated stores record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationFields {
    pub monotonic_count: u64,
    pub timestamp: EfiTime,
    pub pub_key_index: u32,
}

/// One variable record, live or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord<'a> {
    /// Offset of the record header in the image.
    pub offset: usize,
    pub state: VariableState,
    pub attributes: VariableAttributes,
    pub authentication: Option<AuthenticationFields>,
    pub name: String,
    pub vendor: Guid,
    pub data: &'a [u8],
}

impl VariableRecord<'_> {
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn to_variable(&self) -> EfiVariable {
        EfiVariable::new(
            self.name.clone(),
            self.vendor,
            self.attributes,
            self.data.to_vec(),
        )
    }
}

struct RecordHeader {
    start_id: u16,
    state: u8,
    attributes: u32,
    name_size: u32,
    data_size: u32,
    vendor: Guid,
    authentication: Option<AuthenticationFields>,
}

impl From<AuthenticatedVariableHeader> for RecordHeader {
    fn from(h: AuthenticatedVariableHeader) -> Self {
        RecordHeader {
            start_id: h.start_id,
            state: h.state,
            attributes: h.attributes,
            name_size: h.name_size,
            data_size: h.data_size,
            vendor: h.vendor,
            authentication: Some(AuthenticationFields {
                monotonic_count: h.monotonic_count,
                timestamp: h.time_stamp,
                pub_key_index: h.pub_key_index,
            }),
        }
    }
}

impl From<PlainVariableHeader> for RecordHeader {
    fn from(h: PlainVariableHeader) -> Self {
        RecordHeader {
            start_id: h.start_id,
            state: h.state,
            attributes: h.attributes,
            name_size: h.name_size,
            data_size: h.data_size,
            vendor: h.vendor,
            authentication: None,
        }
    }
}

/// 16-bit sum of the header words; a valid header sums to zero.
pub fn header_checksum(header: &[u8]) -> u16 {
    header
        .chunks(2)
        .map(|w| u16::from_le_bytes([w[0], *w.get(1).unwrap_or(&0)]))
        .fold(0u16, |sum, w| sum.wrapping_add(w))
}

fn decode_name(raw: &[u8]) -> Result<String> {
    if raw.len() % 2 != 0 {
        return Err(Error::MalformedVariableStore("odd variable name size"));
    }
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let name = CString16::try_from(units).map_err(|_| {
        Error::MalformedVariableStore("variable name is not a NUL-terminated UCS-2 string")
    })?;
    Ok(name.to_string())
}

#[derive(Debug, Clone)]
pub struct Edk2VariableStore<'a> {
    volume: FirmwareVolumeHeader,
    store: VariableStoreHeader,
    format: VariableStoreFormat,
    records: Vec<VariableRecord<'a>>,
}

impl<'a> Edk2VariableStore<'a> {
    pub fn parse(image: &'a [u8]) -> Result<Edk2VariableStore<'a>> {
        let mut reader = Reader::new(image);
        let volume = reader.read_struct(FirmwareVolumeHeader::SIZE, FirmwareVolumeHeader::read)?;
        if &volume.signature != FV_SIGNATURE {
            return Err(Error::MalformedVariableStore("missing _FVH signature"));
        }
        if volume.file_system_guid != EFI_SYSTEM_NV_DATA_FV_GUID {
            return Err(Error::MalformedVariableStore(
                "volume is not a non-volatile data volume",
            ));
        }
        let volume_len = usize::try_from(volume.length)
            .ok()
            .filter(|&len| len <= image.len())
            .ok_or(Error::MalformedVariableStore("volume length exceeds the image"))?;
        let header_len = volume.header_length as usize;
        if header_len < FirmwareVolumeHeader::SIZE || header_len > volume_len {
            return Err(Error::MalformedVariableStore("bad volume header length"));
        }
        if header_checksum(&image[..header_len]) != 0 {
            log::warn!("firmware volume header checksum mismatch");
        }

        let mut reader = Reader::new(&image[..volume_len]);
        reader.skip(header_len)?;
        let store_start = reader.position();
        let store = reader.read_struct(VariableStoreHeader::SIZE, VariableStoreHeader::read)?;
        let format = VariableStoreFormat::from_guid(store.signature)
            .ok_or(Error::MalformedVariableStore("unknown variable store signature"))?;
        if store.format != VARIABLE_STORE_FORMATTED || store.state != VARIABLE_STORE_HEALTHY {
            log::warn!(
                "variable store format {:#04x} state {:#04x}",
                store.format,
                store.state
            );
        }
        let store_end = store_start
            .checked_add(store.size as usize)
            .filter(|&end| end <= volume_len && end >= reader.position())
            .ok_or(Error::MalformedVariableStore("store size exceeds the volume"))?;

        let mut reader = Reader::new(&image[..store_end]);
        reader.skip(store_start + VariableStoreHeader::SIZE)?;
        let records = read_records(&mut reader, format)?;

        log::debug!(
            "{format:?} variable store: {} records, {} live",
            records.len(),
            records.iter().filter(|r| r.is_live()).count()
        );

        Ok(Edk2VariableStore {
            volume,
            store,
            format,
            records,
        })
    }

    pub fn volume_header(&self) -> &FirmwareVolumeHeader {
        &self.volume
    }

    pub fn store_header(&self) -> &VariableStoreHeader {
        &self.store
    }

    pub fn format(&self) -> VariableStoreFormat {
        self.format
    }

    /// Every record in store order, including deleted ones.
    pub fn records(&self) -> &[VariableRecord<'a>] {
        &self.records
    }

    pub fn variables(&self) -> impl Iterator<Item = EfiVariable> + '_ {
        self.records
            .iter()
            .filter(|r| r.is_live())
            .map(VariableRecord::to_variable)
    }

    /// The most recent live record for the variable.
    pub fn find(&self, name: &str, vendor: &Guid) -> Option<&VariableRecord<'a>> {
        self.records
            .iter()
            .rev()
            .find(|r| r.is_live() && r.name == name && r.vendor == *vendor)
    }
}

fn read_records<'a>(
    reader: &mut Reader<'a>,
    format: VariableStoreFormat,
) -> Result<Vec<VariableRecord<'a>>> {
    let mut records = Vec::new();
    loop {
        let pad = reader.position().next_multiple_of(VARIABLE_ALIGNMENT) - reader.position();
        if reader.skip(pad).is_err() || reader.remaining() < format.header_size() {
            break;
        }
        if reader.peek_u16()? != VARIABLE_DATA {
            break;
        }

        let offset = reader.position();
        let header: RecordHeader = match format {
            VariableStoreFormat::Authenticated => reader
                .read_struct(
                    AuthenticatedVariableHeader::SIZE,
                    AuthenticatedVariableHeader::read,
                )?
                .into(),
            VariableStoreFormat::Plain => reader
                .read_struct(PlainVariableHeader::SIZE, PlainVariableHeader::read)?
                .into(),
        };
        debug_assert_eq!(header.start_id, VARIABLE_DATA);

        let name = reader
            .read_bytes(header.name_size as usize)
            .map_err(|_| Error::MalformedVariableStore("variable name crosses the store end"))?;
        let data = reader
            .read_bytes(header.data_size as usize)
            .map_err(|_| Error::MalformedVariableStore("variable data crosses the store end"))?;

        let record = VariableRecord {
            offset,
            state: VariableState::from_raw(header.state),
            attributes: VariableAttributes::from_bits_retain(header.attributes),
            authentication: header.authentication,
            name: decode_name(name)?,
            vendor: header.vendor,
            data,
        };
        log::trace!(
            "record at {offset:#x}: {}-{} state {:#04x}",
            record.name,
            record.vendor,
            header.state
        );
        records.push(record);
    }
    Ok(records)
}

impl VariableSource for Edk2VariableStore<'_> {
    fn read_variable(&self, name: &str, vendor: &Guid) -> Result<EfiVariable> {
        self.find(name, vendor)
            .map(VariableRecord::to_variable)
            .ok_or_else(|| Error::VariableNotFound {
                name: name.to_string(),
                vendor: *vendor,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::{EFI_GLOBAL_VARIABLE, EFI_IMAGE_SECURITY_DATABASE};
    use crate::variable::{read_key_database, SecureBootVariable};

    const VAR_ADDED: u8 = 0x3f;
    const VAR_DELETED: u8 = 0x3f & 0xfe & 0xfd;
    const HEADER_LENGTH: usize = 0x48;
    const STORE_SIZE: usize = 0x400;

    struct Var<'a> {
        name: &'a str,
        vendor: Guid,
        state: u8,
        data: &'a [u8],
    }

    fn record(format: VariableStoreFormat, var: &Var<'_>) -> Vec<u8> {
        let name: Vec<u8> = var
            .name
            .encode_utf16()
            .chain(Some(0))
            .flat_map(u16::to_le_bytes)
            .collect();
        let mut buf = Vec::new();
        buf.extend_from_slice(&VARIABLE_DATA.to_le_bytes());
        buf.push(var.state);
        buf.push(0);
        buf.extend_from_slice(&0x27u32.to_le_bytes());
        if format == VariableStoreFormat::Authenticated {
            buf.extend_from_slice(&7u64.to_le_bytes());
            buf.extend_from_slice(&[0u8; 16]);
            buf.extend_from_slice(&0u32.to_le_bytes());
        }
        buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(var.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&var.vendor.to_bytes());
        buf.extend_from_slice(&name);
        buf.extend_from_slice(var.data);
        buf
    }

    fn image(format: VariableStoreFormat, vars: &[Var<'_>]) -> Vec<u8> {
        let volume_len = HEADER_LENGTH + STORE_SIZE;
        let mut buf = vec![0u8; 16];
        buf.extend_from_slice(&EFI_SYSTEM_NV_DATA_FV_GUID.to_bytes());
        buf.extend_from_slice(&(volume_len as u64).to_le_bytes());
        buf.extend_from_slice(FV_SIGNATURE);
        buf.extend_from_slice(&0x0004feffu32.to_le_bytes());
        buf.extend_from_slice(&(HEADER_LENGTH as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.push(0);
        buf.push(2);
        // block map: one run of blocks, then the terminator
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(volume_len as u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        assert_eq!(buf.len(), HEADER_LENGTH);
        let checksum = 0u16.wrapping_sub(header_checksum(&buf));
        buf[50..52].copy_from_slice(&checksum.to_le_bytes());

        let signature = match format {
            VariableStoreFormat::Authenticated => EFI_AUTHENTICATED_VARIABLE_GUID,
            VariableStoreFormat::Plain => EFI_VARIABLE_GUID,
        };
        buf.extend_from_slice(&signature.to_bytes());
        buf.extend_from_slice(&(STORE_SIZE as u32).to_le_bytes());
        buf.push(VARIABLE_STORE_FORMATTED);
        buf.push(VARIABLE_STORE_HEALTHY);
        buf.extend_from_slice(&[0u8; 6]);

        for var in vars {
            buf.extend(record(format, var));
            buf.resize(buf.len().next_multiple_of(4), 0xff);
        }
        buf.resize(volume_len, 0xff);
        buf
    }

    fn key_vars() -> Vec<Var<'static>> {
        vec![
            Var {
                name: "db",
                vendor: EFI_IMAGE_SECURITY_DATABASE,
                state: VAR_DELETED,
                data: &[1, 1, 1],
            },
            Var {
                name: "PK",
                vendor: EFI_GLOBAL_VARIABLE,
                state: VAR_ADDED,
                data: &[5; 5],
            },
            Var {
                name: "db",
                vendor: EFI_IMAGE_SECURITY_DATABASE,
                state: VAR_ADDED,
                data: &[2, 2],
            },
        ]
    }

    #[test]
    fn parses_authenticated_store() {
        let img = image(VariableStoreFormat::Authenticated, &key_vars());
        let store = Edk2VariableStore::parse(&img).unwrap();

        assert_eq!(store.format(), VariableStoreFormat::Authenticated);
        assert_eq!(store.records().len(), 3);
        assert!(!store.records()[0].is_live());
        assert_eq!(
            store.records()[1].authentication.map(|a| a.monotonic_count),
            Some(7)
        );
        assert_eq!(store.volume_header().header_length as usize, HEADER_LENGTH);
        assert_eq!(store.volume_header().attributes.alignment(), 16);

        let names: Vec<String> = store.variables().map(|v| v.name).collect();
        assert_eq!(names, vec!["PK", "db"]);
    }

    #[test]
    fn lookup_returns_live_instance() {
        let img = image(VariableStoreFormat::Authenticated, &key_vars());
        let store = Edk2VariableStore::parse(&img).unwrap();

        let db = read_key_database(&store, SecureBootVariable::Db).unwrap();
        assert_eq!(db.data, vec![2, 2]);
        assert_eq!(db.attributes.bits(), 0x27);

        assert!(matches!(
            read_key_database(&store, SecureBootVariable::KEK),
            Err(Error::VariableNotFound { .. })
        ));
    }

    #[test]
    fn parses_plain_store() {
        let img = image(VariableStoreFormat::Plain, &key_vars());
        let store = Edk2VariableStore::parse(&img).unwrap();
        assert_eq!(store.format(), VariableStoreFormat::Plain);
        assert_eq!(store.records().len(), 3);
        assert!(store.records().iter().all(|r| r.authentication.is_none()));
        assert_eq!(
            store.read_variable("PK", &EFI_GLOBAL_VARIABLE).unwrap().data,
            vec![5; 5]
        );
    }

    #[test]
    fn empty_store() {
        let img = image(VariableStoreFormat::Authenticated, &[]);
        let store = Edk2VariableStore::parse(&img).unwrap();
        assert!(store.records().is_empty());
    }

    #[test]
    fn variable_state() {
        assert!(VariableState::from_raw(VAR_ADDED).is_live());
        assert!(!VariableState::from_raw(0x7f).is_live());
        assert!(!VariableState::from_raw(VAR_ADDED & 0xfe).is_live());
        assert!(!VariableState::from_raw(VAR_DELETED).is_live());
        assert!(!VariableState::from_raw(0xff).is_live());
    }

    #[test]
    fn rejects_non_volumes() {
        let mut img = image(VariableStoreFormat::Authenticated, &key_vars());
        img[40..44].copy_from_slice(b"_FVX");
        assert!(matches!(
            Edk2VariableStore::parse(&img),
            Err(Error::MalformedVariableStore(_))
        ));

        let mut img = image(VariableStoreFormat::Authenticated, &key_vars());
        img[HEADER_LENGTH] ^= 0xff;
        assert!(matches!(
            Edk2VariableStore::parse(&img),
            Err(Error::MalformedVariableStore(_))
        ));

        let mut img = image(VariableStoreFormat::Authenticated, &key_vars());
        img.truncate(HEADER_LENGTH + 16);
        assert!(Edk2VariableStore::parse(&img).is_err());
    }

    #[test]
    fn oversized_record_is_malformed() {
        let mut img = image(VariableStoreFormat::Authenticated, &key_vars());
        let data_size_at = HEADER_LENGTH + VariableStoreHeader::SIZE + 40;
        img[data_size_at..data_size_at + 4].copy_from_slice(&0x10000u32.to_le_bytes());
        assert!(matches!(
            Edk2VariableStore::parse(&img),
            Err(Error::MalformedVariableStore(_))
        ));
    }

    #[test]
    fn checksum() {
        let header = [0x01, 0x00, 0xff, 0xff];
        assert_eq!(header_checksum(&header), 0);
        assert_eq!(header_checksum(&[0x02, 0x00]), 2);
    }

    #[test]
    fn ill_formed_name_is_malformed() {
        let name_at = HEADER_LENGTH + VariableStoreHeader::SIZE + AuthenticatedVariableHeader::SIZE;

        let mut img = image(VariableStoreFormat::Authenticated, &key_vars());
        img[name_at..name_at + 2].copy_from_slice(&0xd800u16.to_le_bytes());
        assert!(matches!(
            Edk2VariableStore::parse(&img),
            Err(Error::MalformedVariableStore(_))
        ));

        // "db" without its terminator
        let mut img = image(VariableStoreFormat::Authenticated, &key_vars());
        img[name_at + 4..name_at + 6].copy_from_slice(&u16::from(b'x').to_le_bytes());
        assert!(matches!(
            Edk2VariableStore::parse(&img),
            Err(Error::MalformedVariableStore(_))
        ));
    }
}
