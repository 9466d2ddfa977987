use crate::constants::PrincipalNameType;
use crate::error::KrbError;
use crate::keytab::{KeyBlock, KeytabEntry};
use crate::principal::Name;
use binrw::io::{Cursor, SeekFrom};
use binrw::BinReaderExt;
use binrw::{binread, binwrite, BinWrite};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, Write};
use std::path::Path;
use tracing::{error, trace};

const KEYTAB_FILE_VERSION: u8 = 2;
const RECORD_LEN_SIZE: usize = 4;

#[binread]
#[binwrite]
#[brw(big, magic = 5u8)]
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileKeytabHeader {
    version: u8,
}

#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
struct Data {
    #[br(temp)]
    #[bw(try_calc(u16::try_from(value.len())))]
    value_len: u16,
    #[br(count = value_len)]
    value: Vec<u8>,
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data {
            value: value.as_bytes().to_vec(),
        }
    }
}

impl Data {
    fn to_utf8(&self) -> Result<String, KrbError> {
        String::from_utf8(self.value.clone()).map_err(|err| {
            error!(?err, "principal in keytab is not valid utf-8");
            KrbError::PrincipalNameInvalid
        })
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.value))
    }
}

// Version 2 files do not count the realm as a component.
#[binwrite]
#[brw(big)]
#[binread]
#[derive(Clone, PartialEq, Eq)]
struct Principal {
    #[br(temp)]
    #[bw(try_calc(u16::try_from(components.len())))]
    components_count: u16,
    realm: Data,
    #[br(count = components_count)]
    components: Vec<Data>,
    name_type: u32,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: Vec<_> = self.components.iter().map(Data::to_string).collect();
        f.debug_struct("Principal")
            .field("components", &c)
            .field("realm", &self.realm.to_string())
            .field("name_type", &self.name_type)
            .finish()
    }
}

impl Principal {
    fn new(name: &Name, name_type: PrincipalNameType) -> Self {
        Principal {
            realm: name.realm().into(),
            components: name
                .components()
                .iter()
                .map(|c| c.as_str().into())
                .collect(),
            name_type: name_type.into(),
        }
    }
}

impl TryFrom<&Principal> for Name {
    type Error = KrbError;

    // Lossy decoding could fold two distinct principals into one name.
    fn try_from(value: &Principal) -> Result<Self, Self::Error> {
        Name::new(
            value.realm.to_utf8()?,
            value
                .components
                .iter()
                .map(Data::to_utf8)
                .collect::<Result<_, _>>()?,
        )
    }
}

#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryData {
    principal: Principal,
    timestamp: u32,
    key_version_u8: u8,
    enctype: u16,
    key: Data,
    // Only if 4 bytes remain in the record (field present from MIT 1.14)
    #[br(try)]
    key_version_u32: Option<u32>,
}

impl TryFrom<&KeytabEntry> for EntryData {
    type Error = KrbError;

    fn try_from(value: &KeytabEntry) -> Result<Self, Self::Error> {
        // Enctypes are signed, and Heimdal does have negative (private) ones.
        let enctype = i16::try_from(value.key.enctype).map_err(|_| {
            error!(enctype = value.key.enctype, "enctype does not fit a keytab record");
            KrbError::InvalidEncryptionType
        })? as u16;

        Ok(EntryData {
            principal: Principal::new(&value.principal, value.name_type),
            timestamp: value.timestamp,
            // Older readers only see the low byte.
            key_version_u8: value.kvno as u8,
            enctype,
            key: Data {
                value: value.key.value.clone(),
            },
            key_version_u32: Some(value.kvno),
        })
    }
}

impl TryFrom<&EntryData> for KeytabEntry {
    type Error = KrbError;

    fn try_from(value: &EntryData) -> Result<Self, Self::Error> {
        let kvno = match value.key_version_u32 {
            Some(v) if v != 0 => v,
            _ => value.key_version_u8 as u32,
        };

        let name_type = PrincipalNameType::try_from(value.principal.name_type).map_err(|err| {
            error!(?err, "invalid principal name type in keytab");
            KrbError::PrincipalNameInvalidType
        })?;

        Ok(KeytabEntry {
            principal: (&value.principal).try_into()?,
            name_type,
            timestamp: value.timestamp,
            kvno,
            key: KeyBlock {
                enctype: value.enctype as i16 as i32,
                value: value.key.value.clone(),
            },
        })
    }
}

// Custom writer to seek back to fill the record length
#[binrw::writer(writer, endian)]
fn write_rdata(rdata: &EntryData) -> binrw::BinResult<()> {
    let start = writer.stream_position()?;
    rdata.write_options(writer, endian, ())?;
    let end = writer.stream_position()?;
    let rlen: i32 = end as i32 - start as i32;

    writer.seek(SeekFrom::Start(start - RECORD_LEN_SIZE as u64))?;
    rlen.write_options(writer, endian, ())?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

#[binwrite]
#[bw(big)]
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    // Always written as 0, the custom rdata writer will seek back to fill it
    #[bw(calc = 0)]
    rlen: i32,
    #[bw(write_with = write_rdata)]
    rdata: EntryData,
}

fn read_header(buffer: &[u8]) -> Result<(), KrbError> {
    let mut reader = Cursor::new(buffer);
    let header: FileKeytabHeader = reader.read_be().map_err(|err| {
        error!(?err, "Keytab does not start with a keytab file header");
        KrbError::KeytabInvalidVersion
    })?;
    if header.version != KEYTAB_FILE_VERSION {
        error!(version = header.version, "Unsupported keytab file version");
        return Err(KrbError::KeytabInvalidVersion);
    }
    Ok(())
}

/// Sequential reader over the entries of a file keytab. Holes left behind by
/// removed entries are skipped.
#[derive(Debug)]
pub struct KeytabCursor {
    buffer: Vec<u8>,
    pos: usize,
}

impl KeytabCursor {
    pub(super) fn open(path: &Path) -> Result<Self, KrbError> {
        let mut f = match File::open(path) {
            Ok(f) => f,
            Err(io_err) if io_err.kind() == ErrorKind::NotFound => {
                trace!(?path, "Keytab does not exist, no entries");
                return Ok(KeytabCursor::empty());
            }
            Err(io_err) => {
                error!(?io_err, "Unable to open keytab at {}", path.display());
                return Err(KrbError::KeytabOpen);
            }
        };

        let mut buffer = Vec::new();
        f.read_to_end(&mut buffer).map_err(|io_err| {
            error!(?io_err, "Unable to read keytab at {}", path.display());
            KrbError::KeytabRead
        })?;

        Self::from_buffer(buffer)
    }

    fn empty() -> Self {
        KeytabCursor {
            buffer: Vec::new(),
            pos: 0,
        }
    }

    fn from_buffer(buffer: Vec<u8>) -> Result<Self, KrbError> {
        if buffer.is_empty() {
            return Ok(KeytabCursor::empty());
        }
        read_header(&buffer)?;
        Ok(KeytabCursor { buffer, pos: 2 })
    }

    fn next_entry(&mut self) -> Result<Option<KeytabEntry>, KrbError> {
        loop {
            let remaining = &self.buffer[self.pos..];
            // A short trailing length is the end of the keytab, as is a zero length.
            let Some(rlen_bytes) = remaining.get(..RECORD_LEN_SIZE) else {
                return Ok(None);
            };
            let mut rlen = [0u8; RECORD_LEN_SIZE];
            rlen.copy_from_slice(rlen_bytes);
            let rlen = i32::from_be_bytes(rlen);

            let start = self.pos + RECORD_LEN_SIZE;
            let end = start + rlen.unsigned_abs() as usize;
            if end > self.buffer.len() {
                error!(offset = self.pos, rlen, "Keytab record is truncated");
                return Err(KrbError::KeytabRead);
            }
            self.pos = end;

            if rlen == 0 {
                return Ok(None);
            }
            if rlen < 0 {
                trace!(offset = start, len = rlen.unsigned_abs(), "skipping keytab hole");
                continue;
            }

            let mut reader = Cursor::new(&self.buffer[start..end]);
            let edata: EntryData = reader.read_be().map_err(|err| {
                error!(?err, offset = start, "Failed to unmarshall keytab record");
                KrbError::KeytabRead
            })?;
            return KeytabEntry::try_from(&edata).map(Some);
        }
    }
}

impl Iterator for KeytabCursor {
    type Item = Result<KeytabEntry, KrbError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(err) => {
                // No way to resync after a bad record.
                self.pos = self.buffer.len();
                Some(Err(err))
            }
        }
    }
}

pub(super) fn append(path: &Path, entry: &KeytabEntry) -> Result<(), KrbError> {
    let rdata = EntryData::try_from(entry)?;

    let mut f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|io_err| {
            error!(?io_err, "Unable to open keytab at {}", path.display());
            KrbError::KeytabOpen
        })?;

    let file_len = f
        .metadata()
        .map_err(|io_err| {
            error!(?io_err, "Unable to stat keytab at {}", path.display());
            KrbError::KeytabOpen
        })?
        .len();

    let mut c = Cursor::new(Vec::new());
    if file_len == 0 {
        FileKeytabHeader {
            version: KEYTAB_FILE_VERSION,
        }
        .write(&mut c)
        .map_err(|binrw_err| {
            error!(?binrw_err, "Unable to write keytab header.");
            KrbError::KeytabWrite
        })?;
    } else {
        let mut header = [0u8; 2];
        f.read_exact(&mut header).map_err(|io_err| {
            error!(?io_err, "Unable to read keytab header at {}", path.display());
            KrbError::KeytabRead
        })?;
        read_header(&header)?;
    }

    Record { rdata }.write(&mut c).map_err(|binrw_err| {
        error!(?binrw_err, "Unable to write binary data.");
        KrbError::KeytabWrite
    })?;
    let buf = c.into_inner();

    f.seek(SeekFrom::End(0))
        .and_then(|_| f.write_all(&buf))
        .and_then(|_| f.flush())
        .map_err(|io_err| {
            error!(?io_err, "Unable to append to keytab at {}", path.display());
            KrbError::KeytabWrite
        })?;

    Ok(())
}
