//! Volume Boot Record decoding.

use log::debug;

use crate::binary::{read_i8_at, read_u16, read_u64, read_u8};
use crate::error::{NtfsError, Result};

pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

/// Fields decoded from the first sector of an NTFS volume.
#[derive(Debug, Clone, Copy)]
pub struct Vbr {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mftmirr_lcn: u64,
    clusters_per_file_record_segment: i8,
    clusters_per_index_buffer: i8,
}

impl Vbr {
    /// Decodes a VBR from the first 512 bytes of a volume.
    pub fn decode(sector0: &[u8]) -> Result<Self> {
        if sector0.len() < 512 {
            return Err(NtfsError::InvalidRecord {
                structure: "VBR",
                offset: 0,
                reason: format!("sector is {} bytes, need 512", sector0.len()),
            });
        }

        let oem_id = &sector0[3..11];
        if oem_id != NTFS_OEM_ID {
            return Err(NtfsError::InvalidRecord {
                structure: "VBR",
                offset: 3,
                reason: "OEM id is not \"NTFS    \"".to_string(),
            });
        }

        let bytes_per_sector = read_u16(sector0, 0x0B)?;
        let sectors_per_cluster = read_u8(sector0, 0x0D)?;
        let total_sectors = read_u64(sector0, 0x28)?;
        let mft_lcn = read_u64(sector0, 0x30)?;
        let mftmirr_lcn = read_u64(sector0, 0x38)?;
        let clusters_per_file_record_segment = read_i8_at(sector0, 0x40)?;
        let clusters_per_index_buffer = read_i8_at(sector0, 0x44)?;

        let vbr = Vbr {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_lcn,
            mftmirr_lcn,
            clusters_per_file_record_segment,
            clusters_per_index_buffer,
        };

        debug!(
            "decoded VBR: bytes/sector={} sectors/cluster={} cluster_size={} mft_lcn={} mftmirr_lcn={} record_size={}",
            vbr.bytes_per_sector,
            vbr.sectors_per_cluster,
            vbr.cluster_size(),
            vbr.mft_lcn,
            vbr.mftmirr_lcn,
            vbr.mft_record_size(),
        );

        Ok(vbr)
    }

    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// Size of one MFT record in bytes. A positive `clusters_per_file_record_segment`
    /// counts clusters; a negative value encodes `2^|n|` bytes directly.
    pub fn mft_record_size(&self) -> u32 {
        signed_size(self.clusters_per_file_record_segment, self.cluster_size())
    }

    /// Size of one INDX block in bytes, same signed-size encoding as above.
    pub fn index_buffer_size(&self) -> u32 {
        signed_size(self.clusters_per_index_buffer, self.cluster_size())
    }

    pub fn mft_offset(&self) -> u64 {
        self.mft_lcn * self.cluster_size() as u64
    }

    pub fn mftmirr_offset(&self) -> u64 {
        self.mftmirr_lcn * self.cluster_size() as u64
    }
}

fn signed_size(value: i8, cluster_size: u32) -> u32 {
    if value > 0 {
        value as u32 * cluster_size
    } else {
        1u32 << (-(value as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sector0() -> Vec<u8> {
        let mut data = vec![0u8; 512];
        data[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
        data[3..11].copy_from_slice(NTFS_OEM_ID);
        data[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        data[0x0D] = 8;
        data[0x28..0x30].copy_from_slice(&1_000_000u64.to_le_bytes());
        data[0x30..0x38].copy_from_slice(&0x4000u64.to_le_bytes());
        data[0x38..0x40].copy_from_slice(&0x8000u64.to_le_bytes());
        data[0x40] = 0xF6_u8; // -10 -> 1024 byte records
        data[0x44] = 0xF6_u8;
        data[0x1FE..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());
        data
    }

    #[test]
    fn decodes_geometry_and_offsets() {
        let vbr = Vbr::decode(&sample_sector0()).unwrap();
        assert_eq!(vbr.cluster_size(), 4096);
        assert_eq!(vbr.mft_offset(), 0x4000 * 4096);
        assert_eq!(vbr.mft_record_size(), 1024);
    }

    #[test]
    fn rejects_wrong_oem_id() {
        let mut data = sample_sector0();
        data[3..11].copy_from_slice(b"FAT32   ");
        assert!(Vbr::decode(&data).is_err());
    }
}
