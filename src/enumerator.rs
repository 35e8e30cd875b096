//! Random access into the MFT by record number, full-volume enumeration, and
//! path resolution by walking parent references.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use log::warn;

use crate::error::Result;
use crate::nonresident::NonResidentView;
use crate::record::{
    MftReference, MftRecord, ATTR_TYPE_ATTRIBUTE_LIST, ATTR_TYPE_FILE_NAME, RECORD_ROOT,
};

/// The bytes backing the MFT: either a view over its (possibly fragmented)
/// runlist, or a fully materialized in-memory copy. See the crate's
/// materialization policy in [`crate::filesystem::OpenOptions`].
pub enum MftSource<'a> {
    View(NonResidentView<'a>),
    Materialized(Vec<u8>),
}

impl<'a> MftSource<'a> {
    fn len(&self) -> u64 {
        match self {
            MftSource::View(v) => v.len(),
            MftSource::Materialized(b) => b.len() as u64,
        }
    }

    fn slice(&self, lo: u64, hi: u64) -> Result<Vec<u8>> {
        match self {
            MftSource::View(v) => v.slice(lo, hi),
            MftSource::Materialized(b) => crate::binary::read_bytes(b, lo as usize, (hi - lo) as usize)
                .map(|s| s.to_vec()),
        }
    }
}

/// Enumerates and random-accesses MFT records, and resolves full paths by
/// walking FILENAME_INFORMATION parent references up to the root.
pub struct MftEnumerator<'a> {
    source: MftSource<'a>,
    record_size: u32,
    cache: RefCell<HashMap<u64, MftRecord>>,
}

impl<'a> MftEnumerator<'a> {
    pub fn new(source: MftSource<'a>, record_size: u32) -> Self {
        MftEnumerator {
            source,
            record_size,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn record_count(&self) -> u64 {
        self.source.len() / self.record_size as u64
    }

    /// Decodes and returns the record at `n`, consulting and populating the
    /// internal cache.
    pub fn get_record(&self, n: u64) -> Result<MftRecord> {
        if let Some(cached) = self.cache.borrow().get(&n) {
            return Ok(cached.clone());
        }
        let lo = n * self.record_size as u64;
        let hi = lo + self.record_size as u64;
        let raw = self.source.slice(lo, hi)?;
        let record = MftRecord::decode(&raw, n)?;
        self.cache.borrow_mut().insert(n, record.clone());
        Ok(record)
    }

    /// Looks up `attr_type` on `record`, following its ATTRIBUTE_LIST into
    /// other records when the type isn't found inline.
    pub fn attribute(
        &self,
        record: &MftRecord,
        attr_type: u32,
    ) -> Result<Option<crate::record::Attribute>> {
        if let Some(attr) = record.attribute(attr_type)? {
            return Ok(Some(attr));
        }
        let Some(list_attr) = record.attribute(ATTR_TYPE_ATTRIBUTE_LIST)? else {
            return Ok(None);
        };
        for entry in list_attr.attribute_list()? {
            if entry.attr_type != attr_type {
                continue;
            }
            if entry.owning_record.record_number == record.record_number {
                continue;
            }
            let owning = self.get_record(entry.owning_record.record_number)?;
            if let Some(attr) = owning.attribute(attr_type)? {
                return Ok(Some(attr));
            }
        }
        Ok(None)
    }

    /// Lazily enumerates every record number in the MFT, decoding each in
    /// turn. Records that fail to decode are skipped with a warning rather
    /// than aborting the whole scan.
    pub fn enumerate_records(&self) -> impl Iterator<Item = MftRecord> + '_ {
        (0..self.record_count()).filter_map(move |n| match self.get_record(n) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("skipping unreadable MFT record {n}: {e}");
                None
            }
        })
    }

    /// Full path for `record`, walking FILENAME_INFORMATION parents up to
    /// the root (record #5). Never fails: unresolvable parents or sequence
    /// mismatches produce a `\$ORPHAN\`-prefixed best-effort path, and a
    /// detected cycle produces a `\$CYCLE\`-prefixed one.
    pub fn get_path(&self, record: &MftRecord) -> String {
        if record.record_number == RECORD_ROOT {
            return "\\".to_string();
        }

        let mut components = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(record.record_number);

        let Some(name) = self.preferred_file_name(record) else {
            return format!("\\$ORPHAN\\{}", record.record_number);
        };
        let mut parent_ref = name.parent;
        components.push(name.name);

        loop {
            if parent_ref.record_number == RECORD_ROOT {
                break;
            }
            if !visited.insert(parent_ref.record_number) {
                components.reverse();
                return format!("\\$CYCLE\\{}", components.join("\\"));
            }

            let parent = match self.get_record(parent_ref.record_number) {
                Ok(r) => r,
                Err(_) => {
                    components.reverse();
                    return format!("\\$ORPHAN\\{}", components.join("\\"));
                }
            };
            if parent.sequence_number != parent_ref.sequence_number {
                components.reverse();
                return format!("\\$ORPHAN\\{}", components.join("\\"));
            }

            let Some(parent_name) = self.preferred_file_name(&parent) else {
                components.reverse();
                return format!("\\$ORPHAN\\{}", components.join("\\"));
            };
            parent_ref = parent_name.parent;
            components.push(parent_name.name);
        }

        components.reverse();
        format!("\\{}", components.join("\\"))
    }

    /// Every in-use record paired with its resolved full path.
    pub fn enumerate_paths(&self) -> impl Iterator<Item = (MftRecord, String)> + '_ {
        self.enumerate_records()
            .filter(|r| r.is_in_use())
            .map(|r| {
                let path = self.get_path(&r);
                (r, path)
            })
    }

    /// The FILENAME_INFORMATION used to name this record in its parent
    /// directory: prefers a Win32 or Win32+DOS namespace entry, falling back
    /// to whatever is present.
    fn preferred_file_name(&self, record: &MftRecord) -> Option<crate::record::FileNameInfo> {
        let names: Vec<_> = record
            .attributes_of_type(ATTR_TYPE_FILE_NAME)
            .ok()?
            .into_iter()
            .filter_map(|a| a.file_name().ok())
            .collect();
        names
            .iter()
            .find(|n| matches!(n.namespace, crate::record::Namespace::Win32 | crate::record::Namespace::Win32AndDos))
            .cloned()
            .or_else(|| names.into_iter().next())
    }

    pub fn mft_reference(&self, record: &MftRecord) -> MftReference {
        MftReference {
            record_number: record.record_number,
            sequence_number: record.sequence_number,
        }
    }

    /// The parent directory reference carried by `record`'s preferred
    /// FILENAME_INFORMATION, if it has one.
    pub fn parent_of(&self, record: &MftRecord) -> Option<MftReference> {
        self.preferred_file_name(record).map(|n| n.parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FLAG_IN_USE, FLAG_IS_DIRECTORY, MFT_RECORD_SIGNATURE, ATTR_TYPE_END, ATTR_TYPE_FILE_NAME};

    const RECORD_SIZE: usize = 1024;

    fn empty_record(record_number: u32, flags: u16) -> Vec<u8> {
        let mut data = vec![0u8; RECORD_SIZE];
        data[0..4].copy_from_slice(MFT_RECORD_SIGNATURE);
        data[4..6].copy_from_slice(&0x30u16.to_le_bytes());
        data[6..8].copy_from_slice(&3u16.to_le_bytes());
        data[0x10..0x12].copy_from_slice(&1u16.to_le_bytes());
        data[0x14..0x16].copy_from_slice(&0x38u16.to_le_bytes());
        data[0x16..0x18].copy_from_slice(&flags.to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&56u32.to_le_bytes());
        data[0x2C..0x30].copy_from_slice(&record_number.to_le_bytes());
        let usn = 0x0001u16.to_le_bytes();
        data[0x30..0x32].copy_from_slice(&usn);
        data[0x32..0x34].copy_from_slice(&[0xAA, 0xBB]);
        data[0x34..0x36].copy_from_slice(&[0xCC, 0xDD]);
        data[510..512].copy_from_slice(&usn);
        data[1022..1024].copy_from_slice(&usn);
        data[0x38..0x3C].copy_from_slice(&ATTR_TYPE_END.to_le_bytes());
        data
    }

    fn record_with_filename(record_number: u32, flags: u16, parent: u64, name: &str) -> Vec<u8> {
        let mut data = vec![0u8; RECORD_SIZE];
        data[0..4].copy_from_slice(MFT_RECORD_SIGNATURE);
        data[4..6].copy_from_slice(&0x30u16.to_le_bytes());
        data[6..8].copy_from_slice(&3u16.to_le_bytes());
        data[0x10..0x12].copy_from_slice(&1u16.to_le_bytes());
        data[0x14..0x16].copy_from_slice(&0x38u16.to_le_bytes());
        data[0x16..0x18].copy_from_slice(&flags.to_le_bytes());

        let name_bytes: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let fn_value_len = 66 + name_bytes.len();
        let attr_total_len = 16 + 8 + fn_value_len; // header + resident header + value
        let attr_total_len = align4(attr_total_len);

        let mut pos = 0x38usize;
        data[pos..pos + 4].copy_from_slice(&ATTR_TYPE_FILE_NAME.to_le_bytes());
        data[pos + 4..pos + 8].copy_from_slice(&(attr_total_len as u32).to_le_bytes());
        data[pos + 8] = 0; // resident
        data[pos + 9] = 0; // name_length
        data[pos + 14..pos + 16].copy_from_slice(&0u16.to_le_bytes()); // attribute_id
        data[pos + 16..pos + 20].copy_from_slice(&(fn_value_len as u32).to_le_bytes()); // value_length
        data[pos + 20..pos + 22].copy_from_slice(&24u16.to_le_bytes()); // value_offset

        let value_start = pos + 24;
        data[value_start..value_start + 8].copy_from_slice(&parent.to_le_bytes());
        data[value_start + 56..value_start + 60].copy_from_slice(&0u32.to_le_bytes());
        data[value_start + 64] = name.chars().count() as u8;
        data[value_start + 65] = 1;
        data[value_start + 66..value_start + 66 + name_bytes.len()].copy_from_slice(&name_bytes);

        pos += attr_total_len;
        data[pos..pos + 4].copy_from_slice(&ATTR_TYPE_END.to_le_bytes());
        let bytes_used = pos + 8;

        data[0x18..0x1C].copy_from_slice(&(bytes_used as u32).to_le_bytes());
        data[0x2C..0x30].copy_from_slice(&record_number.to_le_bytes());

        let usn = 0x0001u16.to_le_bytes();
        data[0x30..0x32].copy_from_slice(&usn);
        data[0x32..0x34].copy_from_slice(&[0xAA, 0xBB]);
        data[0x34..0x36].copy_from_slice(&[0xCC, 0xDD]);
        data[510..512].copy_from_slice(&usn);
        data[1022..1024].copy_from_slice(&usn);

        data
    }

    fn align4(v: usize) -> usize {
        (v + 3) & !3
    }

    #[test]
    fn resolves_full_path_through_parent_chain() {
        let mut mft = vec![0u8; RECORD_SIZE * 3];
        mft[0..RECORD_SIZE].copy_from_slice(&empty_record(0, FLAG_IN_USE));
        let seq1 = 1u64 << 48;
        mft[RECORD_SIZE..RECORD_SIZE * 2]
            .copy_from_slice(&record_with_filename(1, FLAG_IN_USE | FLAG_IS_DIRECTORY, 5 | seq1, "docs"));
        mft[RECORD_SIZE * 2..RECORD_SIZE * 3]
            .copy_from_slice(&record_with_filename(2, FLAG_IN_USE, 1 | seq1, "readme.txt"));

        // Extend to include record #5 (root) as an empty in-use directory.
        let mut full = mft;
        full.resize(RECORD_SIZE * 6, 0);
        full[RECORD_SIZE * 5..RECORD_SIZE * 6]
            .copy_from_slice(&empty_record(5, FLAG_IN_USE | FLAG_IS_DIRECTORY));

        let enumerator = MftEnumerator::new(MftSource::Materialized(full), RECORD_SIZE as u32);
        let file_record = enumerator.get_record(2).unwrap();
        assert_eq!(enumerator.get_path(&file_record), "\\docs\\readme.txt");
    }
}
