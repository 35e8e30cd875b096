//! Directory index (B+tree) decoding: INDEX_ROOT and INDEX_ALLOCATION nodes,
//! with both active and slack entry enumeration.

use log::trace;

use crate::binary::{read_u16, read_u32, read_u64, read_u8, read_utf16le};
use crate::error::{NtfsError, Result};
use crate::record::{apply_fixups, MftReference, Namespace};

pub const INDEX_ENTRY_NODE: u16 = 0x01;
pub const INDEX_ENTRY_END: u16 = 0x02;

/// One decoded directory entry: the referenced child plus the FILENAME_INFORMATION
/// fields that were indexed alongside it.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub mft_reference: MftReference,
    pub file_name: String,
    pub namespace: Namespace,
    pub is_directory: bool,
    pub has_subnode: bool,
}

/// FILE_ATTRIBUTE_DIRECTORY, as stored in the FILENAME_INFORMATION copy embedded
/// in each index entry.
const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x1000_0000;

/// One index node's raw entry region: bytes from the first entry through the
/// end of the *allocated* area (not just the used area), so slack entries
/// remain reachable.
pub struct IndexNode {
    data: Vec<u8>,
    used_len: usize,
}

impl IndexNode {
    /// Active entries: the node's entries in collation order, stopping at
    /// (and excluding) the terminal end-marker entry.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        parse_entries(&self.data[..self.used_len.min(self.data.len())], true)
    }

    /// Slack entries: residue found past the used region, out to the
    /// allocated end, filtered for plausibility since nothing guarantees
    /// these bytes still form a valid entry chain.
    pub fn slack_entries(&self) -> Result<Vec<IndexEntry>> {
        if self.used_len >= self.data.len() {
            return Ok(Vec::new());
        }
        parse_entries(&self.data[self.used_len..], false)
    }
}

fn parse_entries(data: &[u8], strict: bool) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + 16 <= data.len() {
        let mft_reference_raw = match read_u64(data, offset) {
            Ok(v) => v,
            Err(_) if !strict => break,
            Err(e) => return Err(e),
        };
        let entry_length = read_u16(data, offset + 8)? as usize;
        let key_length = read_u16(data, offset + 10)? as usize;
        let flags = read_u16(data, offset + 12)?;

        if entry_length == 0 || entry_length < 16 {
            if strict {
                break;
            }
            offset += 8;
            continue;
        }
        if offset + entry_length > data.len() {
            if strict {
                break;
            }
            offset += 8;
            continue;
        }

        if flags & INDEX_ENTRY_END != 0 {
            break;
        }

        let key_offset = offset + 16;
        let result = decode_entry_key(data, key_offset, key_length, mft_reference_raw, flags);
        match result {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(e) if strict => return Err(e),
            Err(_) => {}
        }

        offset += entry_length;
    }

    Ok(entries)
}

fn decode_entry_key(
    data: &[u8],
    key_offset: usize,
    key_length: usize,
    mft_reference_raw: u64,
    flags: u16,
) -> Result<Option<IndexEntry>> {
    // A FILENAME_INFORMATION key is at least 66 bytes before the variable name.
    if key_length < 66 {
        return Ok(None);
    }
    let name_len_chars = read_u8(data, key_offset + 64)? as usize;
    if name_len_chars == 0 || name_len_chars > 255 {
        return Ok(None);
    }
    let namespace = match read_u8(data, key_offset + 65)? {
        1 => Namespace::Win32,
        2 => Namespace::Dos,
        3 => Namespace::Win32AndDos,
        _ => Namespace::Posix,
    };
    let name_bytes_len = name_len_chars * 2;
    if key_offset + 66 + name_bytes_len > data.len() {
        return Err(NtfsError::overrun((key_offset + 66) as u64, name_bytes_len, data.len()));
    }
    let file_name = read_utf16le(data, key_offset + 66, name_bytes_len)?;
    let file_attributes = read_u32(data, key_offset + 56)?;

    Ok(Some(IndexEntry {
        mft_reference: MftReference::from_raw(mft_reference_raw),
        file_name,
        namespace,
        is_directory: file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
        has_subnode: flags & INDEX_ENTRY_NODE != 0,
    }))
}

/// Parses an INDEX_ROOT attribute's value into its single inline node.
pub fn parse_index_root(data: &[u8]) -> Result<IndexNode> {
    // IndexRoot header: attribute_type(4) collation_rule(4) index_block_size(4)
    // clusters_per_block(1) reserved(3) = 16 bytes, followed by a 16-byte
    // IndexHeader: entries_offset(4) index_length(4) allocated_size(4) flags(4).
    if data.len() < 32 {
        return Err(NtfsError::overrun(0, 32, data.len()));
    }
    let header_base = 16;
    let entries_offset = read_u32(data, header_base)? as usize;
    let index_length = read_u32(data, header_base + 4)? as usize;
    let allocated_size = read_u32(data, header_base + 8)? as usize;

    let node_start = header_base + entries_offset;
    let node_end = (header_base + allocated_size).min(data.len()).max(node_start);
    if node_start > data.len() {
        return Err(NtfsError::overrun(node_start as u64, 0, data.len()));
    }
    let used_len = index_length.saturating_sub(entries_offset);

    Ok(IndexNode {
        data: data[node_start..node_end].to_vec(),
        used_len,
    })
}

/// Parses an INDEX_ALLOCATION attribute's non-resident value (already
/// materialized as flat bytes) into its sequence of INDX blocks, applying
/// fixups to each block.
pub fn parse_index_allocation(mut data: Vec<u8>, index_block_size: u32) -> Result<Vec<IndexNode>> {
    let mut nodes = Vec::new();
    let block_size = index_block_size as usize;
    if block_size == 0 {
        return Ok(nodes);
    }

    let mut offset = 0usize;
    while offset + block_size <= data.len() {
        let block = &mut data[offset..offset + block_size];
        if &block[0..4] != b"INDX" {
            trace!("stopping INDX scan: bad signature at block offset {offset}");
            break;
        }
        let usa_offset = read_u16(block, 4)?;
        let usa_count = read_u16(block, 6)?;
        apply_fixups(block, "INDX block", usa_offset, usa_count)?;

        // The IndexHeader begins right after the update sequence array.
        let header_base = usa_offset as usize + usa_count as usize * 2;
        if header_base + 16 > block.len() {
            break;
        }
        let entries_offset = read_u32(block, header_base)? as usize;
        let index_length = read_u32(block, header_base + 4)? as usize;
        let allocated_size = read_u32(block, header_base + 8)? as usize;

        let node_start = header_base + entries_offset;
        let node_end = (header_base + allocated_size).min(block.len()).max(node_start);
        let used_len = index_length.saturating_sub(entries_offset);

        if node_start <= block.len() {
            let owned: Vec<u8> = data[offset + node_start..offset + node_end].to_vec();
            nodes.push(IndexNode {
                data: owned,
                used_len,
            });
        }

        offset += block_size;
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_filename_key(parent: u64, name: &str, is_dir: bool) -> Vec<u8> {
        let mut key = vec![0u8; 66];
        key[0..8].copy_from_slice(&parent.to_le_bytes());
        let attrs: u32 = if is_dir { FILE_ATTRIBUTE_DIRECTORY } else { 0 };
        key[56..60].copy_from_slice(&attrs.to_le_bytes());
        key[64] = name.chars().count() as u8;
        key[65] = 1; // Win32
        let name_bytes: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        key.extend(name_bytes);
        key
    }

    fn build_entry(mft_ref: u64, key: &[u8], flags: u16) -> Vec<u8> {
        let mut e = vec![0u8; 16];
        e[0..8].copy_from_slice(&mft_ref.to_le_bytes());
        let total_len = (16 + key.len()) as u16;
        e[8..10].copy_from_slice(&total_len.to_le_bytes());
        e[10..12].copy_from_slice(&(key.len() as u16).to_le_bytes());
        e[12..14].copy_from_slice(&flags.to_le_bytes());
        e.extend_from_slice(key);
        e
    }

    fn end_marker() -> Vec<u8> {
        let mut e = vec![0u8; 16];
        e[12..14].copy_from_slice(&INDEX_ENTRY_END.to_le_bytes());
        e
    }

    #[test]
    fn active_entries_stop_at_end_marker() {
        let key = build_filename_key(5, "file.txt", false);
        let mut data = build_entry(100, &key, 0);
        data.extend(end_marker());

        let used_len = data.len();
        let node = IndexNode { data, used_len };
        let entries = node.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "file.txt");
        assert!(!entries[0].is_directory);
    }

    #[test]
    fn slack_entries_recover_deleted_residue() {
        let key = build_filename_key(5, "old.txt", false);
        let deleted_entry = build_entry(200, &key, 0);

        let live_key = build_filename_key(5, "new.txt", false);
        let mut used = build_entry(150, &live_key, 0);
        used.extend(end_marker());

        let mut full = used.clone();
        full.extend(deleted_entry);

        let used_len = used.len();
        let node = IndexNode { data: full, used_len };
        let active = node.entries().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].file_name, "new.txt");

        let slack = node.slack_entries().unwrap();
        assert_eq!(slack.len(), 1);
        assert_eq!(slack[0].file_name, "old.txt");
    }
}
