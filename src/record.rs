//! MFT record and attribute decoding: fixups, the attribute walk, and typed
//! decoding of STANDARD_INFORMATION, FILENAME_INFORMATION, DATA, INDEX_ROOT,
//! INDEX_ALLOCATION and ATTRIBUTE_LIST.

use log::trace;

use crate::binary::{
    epoch_sentinel, filetime_to_datetime, read_u16, read_u32, read_u64, read_u8, read_utf16le,
};
use crate::error::{NtfsError, Result};
use crate::runlist::{decode_runlist, Run};
use chrono::{DateTime, Utc};

pub const MFT_RECORD_SIGNATURE: &[u8; 4] = b"FILE";

pub const ATTR_TYPE_STANDARD_INFORMATION: u32 = 0x10;
pub const ATTR_TYPE_ATTRIBUTE_LIST: u32 = 0x20;
pub const ATTR_TYPE_FILE_NAME: u32 = 0x30;
pub const ATTR_TYPE_VOLUME_NAME: u32 = 0x60;
pub const ATTR_TYPE_DATA: u32 = 0x80;
pub const ATTR_TYPE_INDEX_ROOT: u32 = 0x90;
pub const ATTR_TYPE_INDEX_ALLOCATION: u32 = 0xA0;
pub const ATTR_TYPE_END: u32 = 0xFFFF_FFFF;

pub const FLAG_IN_USE: u16 = 0x0001;
pub const FLAG_IS_DIRECTORY: u16 = 0x0002;

pub const RECORD_MFT: u64 = 0;
pub const RECORD_MFTMIRR: u64 = 1;
pub const RECORD_VOLUME: u64 = 3;
pub const RECORD_ROOT: u64 = 5;

/// A 48-bit record number plus 16-bit sequence number, as stored in parent
/// references and index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MftReference {
    pub record_number: u64,
    pub sequence_number: u16,
}

impl MftReference {
    pub fn from_raw(raw: u64) -> Self {
        MftReference {
            record_number: raw & 0x0000_FFFF_FFFF_FFFF,
            sequence_number: (raw >> 48) as u16,
        }
    }
}

/// Decoded FILENAME_INFORMATION namespace tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
}

impl Namespace {
    fn from_u8(v: u8) -> Namespace {
        match v {
            1 => Namespace::Win32,
            2 => Namespace::Dos,
            3 => Namespace::Win32AndDos,
            _ => Namespace::Posix,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StandardInformation {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub file_attributes: u32,
}

fn decode_filetime_field(raw: u64) -> DateTime<Utc> {
    filetime_to_datetime(raw).unwrap_or_else(epoch_sentinel)
}

impl StandardInformation {
    fn decode(data: &[u8]) -> Result<Self> {
        Ok(StandardInformation {
            created: decode_filetime_field(read_u64(data, 0)?),
            modified: decode_filetime_field(read_u64(data, 8)?),
            mft_modified: decode_filetime_field(read_u64(data, 16)?),
            accessed: decode_filetime_field(read_u64(data, 24)?),
            file_attributes: read_u32(data, 32)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileNameInfo {
    pub parent: MftReference,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub allocated_size: u64,
    pub logical_size: u64,
    pub file_attributes: u32,
    pub namespace: Namespace,
    pub name: String,
}

impl FileNameInfo {
    fn decode(data: &[u8]) -> Result<Self> {
        let name_len_chars = read_u8(data, 64)? as usize;
        let namespace = Namespace::from_u8(read_u8(data, 65)?);
        let name = read_utf16le(data, 66, name_len_chars * 2)?;
        Ok(FileNameInfo {
            parent: MftReference::from_raw(read_u64(data, 0)?),
            created: decode_filetime_field(read_u64(data, 8)?),
            modified: decode_filetime_field(read_u64(data, 16)?),
            mft_modified: decode_filetime_field(read_u64(data, 24)?),
            accessed: decode_filetime_field(read_u64(data, 32)?),
            allocated_size: read_u64(data, 40)?,
            logical_size: read_u64(data, 48)?,
            file_attributes: read_u32(data, 56)?,
            namespace,
            name,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub attr_type: u32,
    pub name: Option<String>,
    pub starting_vcn: u64,
    pub owning_record: MftReference,
    pub attribute_id: u16,
}

fn decode_attribute_list(data: &[u8]) -> Result<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 26 <= data.len() {
        let attr_type = read_u32(data, pos)?;
        let entry_len = read_u16(data, pos + 4)? as usize;
        if entry_len == 0 {
            break;
        }
        let name_len = read_u8(data, pos + 6)? as usize;
        let name_offset = read_u8(data, pos + 7)? as usize;
        let starting_vcn = read_u64(data, pos + 8)?;
        let owning_record = MftReference::from_raw(read_u64(data, pos + 16)?);
        let attribute_id = read_u16(data, pos + 24)?;
        let name = if name_len > 0 {
            Some(read_utf16le(data, pos + name_offset, name_len * 2)?)
        } else {
            None
        };
        entries.push(AttributeListEntry {
            attr_type,
            name,
            starting_vcn,
            owning_record,
            attribute_id,
        });
        pos += entry_len;
    }
    Ok(entries)
}

/// The decoded body of an attribute: either its resident bytes, or the
/// non-resident runlist plus the sizes carried alongside it.
#[derive(Debug, Clone)]
pub enum AttributeBody {
    Resident(Vec<u8>),
    NonResident {
        runs: Vec<Run>,
        data_size: u64,
        initialized_size: u64,
        compression_unit: u16,
    },
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub type_code: u32,
    pub name: Option<String>,
    pub attribute_id: u16,
    pub body: AttributeBody,
}

impl Attribute {
    pub fn is_resident(&self) -> bool {
        matches!(self.body, AttributeBody::Resident(_))
    }

    pub fn resident_value(&self) -> Option<&[u8]> {
        match &self.body {
            AttributeBody::Resident(v) => Some(v),
            AttributeBody::NonResident { .. } => None,
        }
    }

    pub fn runs(&self) -> Option<&[Run]> {
        match &self.body {
            AttributeBody::NonResident { runs, .. } => Some(runs),
            AttributeBody::Resident(_) => None,
        }
    }

    pub fn standard_information(&self) -> Result<StandardInformation> {
        let data = self
            .resident_value()
            .ok_or_else(|| NtfsError::InvalidRecord {
                structure: "STANDARD_INFORMATION",
                offset: 0,
                reason: "attribute is non-resident".to_string(),
            })?;
        StandardInformation::decode(data)
    }

    pub fn file_name(&self) -> Result<FileNameInfo> {
        let data = self
            .resident_value()
            .ok_or_else(|| NtfsError::InvalidRecord {
                structure: "FILENAME_INFORMATION",
                offset: 0,
                reason: "attribute is non-resident".to_string(),
            })?;
        FileNameInfo::decode(data)
    }

    pub fn attribute_list(&self) -> Result<Vec<AttributeListEntry>> {
        let data = self
            .resident_value()
            .ok_or_else(|| NtfsError::InvalidRecord {
                structure: "ATTRIBUTE_LIST",
                offset: 0,
                reason: "attribute is non-resident".to_string(),
            })?;
        decode_attribute_list(data)
    }
}

/// Applies the update-sequence-array fixup in place, validating the USN at
/// the end of every 512-byte sector before substitution.
pub fn apply_fixups(buffer: &mut [u8], structure: &'static str, usa_offset: u16, usa_count: u16) -> Result<()> {
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;
    if usa_count == 0 {
        return Ok(());
    }
    if usa_offset + usa_count * 2 > buffer.len() {
        return Err(NtfsError::overrun(usa_offset as u64, usa_count * 2, buffer.len()));
    }

    let usn = [buffer[usa_offset], buffer[usa_offset + 1]];
    for i in 1..usa_count {
        let usa_value_offset = usa_offset + i * 2;
        let usa_value = [buffer[usa_value_offset], buffer[usa_value_offset + 1]];
        let sector_offset = i * 512 - 2;
        if sector_offset + 2 > buffer.len() {
            return Err(NtfsError::overrun(sector_offset as u64, 2, buffer.len()));
        }
        let found = u16::from_le_bytes([buffer[sector_offset], buffer[sector_offset + 1]]);
        let expected = u16::from_le_bytes(usn);
        if found != expected {
            return Err(NtfsError::Fixup {
                structure,
                sector_index: i,
                expected,
                found,
            });
        }
        buffer[sector_offset] = usa_value[0];
        buffer[sector_offset + 1] = usa_value[1];
    }
    Ok(())
}

/// A decoded 1024-byte (by default) MFT record: header fields plus its
/// inline attribute list. Fixups have already been applied to `data`.
#[derive(Debug, Clone)]
pub struct MftRecord {
    pub record_number: u64,
    pub sequence_number: u16,
    pub flags: u16,
    pub base_record: MftReference,
    pub bytes_used: u32,
    data: Vec<u8>,
    attrs_offset: u16,
}

impl MftRecord {
    /// Decodes one MFT record from a `record_size`-byte slice, applying
    /// fixups. `record_number` overrides the header's own (often stale)
    /// record-number field when the caller already knows the index.
    pub fn decode(raw: &[u8], record_number: u64) -> Result<Self> {
        if raw.len() < 48 {
            return Err(NtfsError::overrun(0, 48, raw.len()));
        }
        let signature = &raw[0..4];
        if signature != MFT_RECORD_SIGNATURE {
            return Err(NtfsError::InvalidRecord {
                structure: "MFT record",
                offset: 0,
                reason: format!("bad signature {signature:?}"),
            });
        }

        let mut data = raw.to_vec();
        let usa_offset = read_u16(&data, 4)?;
        let usa_count = read_u16(&data, 6)?;
        apply_fixups(&mut data, "MFT record", usa_offset, usa_count)?;

        let sequence_number = read_u16(&data, 0x10)?;
        let flags = read_u16(&data, 0x16)?;
        let bytes_used = read_u32(&data, 0x18)?;
        let base_record = MftReference::from_raw(read_u64(&data, 0x20)?);
        let attrs_offset = read_u16(&data, 0x14)?;

        trace!(
            "decoded MFT record {} seq={} flags={:#x} bytes_used={}",
            record_number, sequence_number, flags, bytes_used
        );

        Ok(MftRecord {
            record_number,
            sequence_number,
            flags,
            base_record,
            bytes_used,
            data,
            attrs_offset,
        })
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_IS_DIRECTORY != 0
    }

    /// Walks the inline attribute list (does not follow ATTRIBUTE_LIST
    /// entries into other records; see [`crate::enumerator::MftEnumerator`]
    /// for that).
    pub fn attributes(&self) -> Result<Vec<Attribute>> {
        let mut out = Vec::new();
        let mut pos = self.attrs_offset as usize;
        let limit = (self.bytes_used as usize).min(self.data.len());

        while pos + 16 <= limit {
            let type_code = read_u32(&self.data, pos)?;
            let record_length = read_u32(&self.data, pos + 4)?;
            if type_code == ATTR_TYPE_END || record_length == 0 {
                break;
            }
            if pos + record_length as usize > self.data.len() {
                return Err(NtfsError::overrun(pos as u64, record_length as usize, self.data.len()));
            }

            let non_resident = read_u8(&self.data, pos + 8)? != 0;
            let name_length = read_u8(&self.data, pos + 9)? as usize;
            let name_offset = read_u16(&self.data, pos + 10)? as usize;
            let attribute_id = read_u16(&self.data, pos + 14)?;

            let name = if name_length > 0 {
                Some(read_utf16le(&self.data, pos + name_offset, name_length * 2)?)
            } else {
                None
            };

            let body = if non_resident {
                let data_runs_offset = read_u16(&self.data, pos + 0x20)? as usize;
                let compression_unit = read_u16(&self.data, pos + 0x22)?;
                let allocated_size_offset = pos + 0x28;
                let data_size = read_u64(&self.data, allocated_size_offset + 8)?;
                let initialized_size = read_u64(&self.data, allocated_size_offset + 16)?;

                let runs_start = pos + data_runs_offset;
                let runs_end = (pos + record_length as usize).min(self.data.len());
                let runs = decode_runlist(&self.data[runs_start..runs_end])?;

                AttributeBody::NonResident {
                    runs,
                    data_size,
                    initialized_size,
                    compression_unit,
                }
            } else {
                let value_length = read_u32(&self.data, pos + 0x10)? as usize;
                let value_offset = read_u16(&self.data, pos + 0x14)? as usize;
                let value_start = pos + value_offset;
                let value = crate::binary::read_bytes(&self.data, value_start, value_length)?;
                AttributeBody::Resident(value.to_vec())
            };

            out.push(Attribute {
                type_code,
                name,
                attribute_id,
                body,
            });

            pos += record_length as usize;
        }

        Ok(out)
    }

    /// First inline attribute matching `attr_type`, if any.
    pub fn attribute(&self, attr_type: u32) -> Result<Option<Attribute>> {
        Ok(self
            .attributes()?
            .into_iter()
            .find(|a| a.type_code == attr_type))
    }

    pub fn attributes_of_type(&self, attr_type: u32) -> Result<Vec<Attribute>> {
        Ok(self
            .attributes()?
            .into_iter()
            .filter(|a| a.type_code == attr_type)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_record(record_number: u64, flags: u16) -> Vec<u8> {
        let mut data = vec![0u8; 1024];
        data[0..4].copy_from_slice(MFT_RECORD_SIGNATURE);
        data[4..6].copy_from_slice(&0x30u16.to_le_bytes()); // usa_offset
        data[6..8].copy_from_slice(&3u16.to_le_bytes()); // usa_count (1 usn + 2 sectors)
        data[0x10..0x12].copy_from_slice(&1u16.to_le_bytes()); // sequence
        data[0x14..0x16].copy_from_slice(&0x38u16.to_le_bytes()); // attrs_offset
        data[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&56u32.to_le_bytes()); // bytes_used (header+end marker)

        let usn = 0x0001u16.to_le_bytes();
        data[0x30..0x32].copy_from_slice(&usn);
        data[0x32..0x34].copy_from_slice(&[0xAA, 0xBB]);
        data[0x34..0x36].copy_from_slice(&[0xCC, 0xDD]);
        data[510..512].copy_from_slice(&usn);
        data[1022..1024].copy_from_slice(&usn);

        // Attribute terminator at attrs_offset (0x38)
        data[0x38..0x3C].copy_from_slice(&ATTR_TYPE_END.to_le_bytes());

        let _ = record_number;
        data
    }

    #[test]
    fn decodes_header_and_applies_fixup() {
        let raw = build_minimal_record(5, FLAG_IN_USE | FLAG_IS_DIRECTORY);
        let record = MftRecord::decode(&raw, 5).unwrap();
        assert!(record.is_in_use());
        assert!(record.is_directory());
        assert_eq!(record.sequence_number, 1);
    }

    #[test]
    fn fixup_mismatch_is_reported() {
        let mut raw = build_minimal_record(5, FLAG_IN_USE);
        raw[510] = 0xFF;
        let err = MftRecord::decode(&raw, 5).unwrap_err();
        assert!(matches!(err, NtfsError::Fixup { .. }));
    }

    #[test]
    fn zero_attributes_decodes_empty() {
        let raw = build_minimal_record(5, FLAG_IN_USE);
        let record = MftRecord::decode(&raw, 5).unwrap();
        assert_eq!(record.attributes().unwrap().len(), 0);
    }

    #[test]
    fn mft_reference_splits_record_and_sequence() {
        let raw = 0x0003_0000_0000_0005u64;
        let ratio = MftReference::from_raw(raw);
        assert_eq!(ratio.record_number, 5);
        assert_eq!(ratio.sequence_number, 3);
    }
}
