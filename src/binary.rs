//! Bounds-checked primitive reads over a byte slice.
//!
//! Every read here fails with [`NtfsError::Overrun`] instead of panicking,
//! which is the one place this crate deliberately generalizes past the
//! `#[repr(C, packed)]` + `unsafe { ptr::read_unaligned }` reads the rest of
//! this codebase's filesystem family modules use: those can't express an
//! overrun as a typed, recoverable error.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{NtfsError, Result};

/// Windows FILETIME epoch (1601-01-01) expressed as seconds before the Unix epoch.
const WINDOWS_EPOCH_DIFF_SECS: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

fn check(data: &[u8], offset: usize, len: usize) -> Result<()> {
    if offset.checked_add(len).map_or(true, |end| end > data.len()) {
        return Err(NtfsError::overrun(offset as u64, len, data.len()));
    }
    Ok(())
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    check(data, offset, 1)?;
    Ok(data[offset])
}

pub fn read_i8_at(data: &[u8], offset: usize) -> Result<i8> {
    check(data, offset, 1)?;
    Ok(data[offset] as i8)
}

pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    check(data, offset, 2)?;
    Ok(LittleEndian::read_u16(&data[offset..offset + 2]))
}

pub fn read_i16(data: &[u8], offset: usize) -> Result<i16> {
    check(data, offset, 2)?;
    Ok(LittleEndian::read_i16(&data[offset..offset + 2]))
}

pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    check(data, offset, 4)?;
    Ok(LittleEndian::read_u32(&data[offset..offset + 4]))
}

pub fn read_i32(data: &[u8], offset: usize) -> Result<i32> {
    check(data, offset, 4)?;
    Ok(LittleEndian::read_i32(&data[offset..offset + 4]))
}

pub fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    check(data, offset, 8)?;
    Ok(LittleEndian::read_u64(&data[offset..offset + 8]))
}

pub fn read_i64(data: &[u8], offset: usize) -> Result<i64> {
    check(data, offset, 8)?;
    Ok(LittleEndian::read_i64(&data[offset..offset + 8]))
}

pub fn read_bytes<'a>(data: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8]> {
    check(data, offset, len)?;
    Ok(&data[offset..offset + len])
}

/// Reads `len` bytes at `offset` and decodes them as UTF-16LE, lossily
/// substituting U+FFFD for unpaired surrogates (matching how Windows
/// filenames are rendered by every viewer that tolerates corrupt metadata).
pub fn read_utf16le(data: &[u8], offset: usize, len_bytes: usize) -> Result<String> {
    let raw = read_bytes(data, offset, len_bytes)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Decodes a Windows FILETIME (100ns ticks since 1601-01-01) into a UTC
/// timestamp. Returns `None` for values that underflow or overflow the
/// representable civil-time range; callers substitute the 1970 epoch
/// sentinel (see [`epoch_sentinel`]) rather than propagating the gap.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    let ticks = i64::try_from(filetime).ok()?;
    let total_seconds = ticks / FILETIME_TICKS_PER_SECOND - WINDOWS_EPOCH_DIFF_SECS;
    let nanos = ((ticks % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(total_seconds, nanos).single()
}

/// The sentinel timestamp substituted for an out-of-range FILETIME.
pub fn epoch_sentinel() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().expect("unix epoch is representable")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_in_bounds() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u8(&data, 0).unwrap(), 0x01);
        assert_eq!(read_u16(&data, 0).unwrap(), 0x0201);
        assert_eq!(read_u32(&data, 0).unwrap(), 0x04030201);
        assert_eq!(read_u64(&data, 0).unwrap(), 0x0807060504030201);
    }

    #[test]
    fn overrun_is_reported() {
        let data = [0x01, 0x02];
        let err = read_u32(&data, 0).unwrap_err();
        match err {
            NtfsError::Overrun {
                offset,
                requested,
                source_len,
            } => {
                assert_eq!(offset, 0);
                assert_eq!(requested, 4);
                assert_eq!(source_len, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn filetime_round_trip_year_2000() {
        let unix_seconds: i64 = 946_684_800;
        let filetime = ((unix_seconds + WINDOWS_EPOCH_DIFF_SECS) * FILETIME_TICKS_PER_SECOND) as u64;
        let dt = filetime_to_datetime(filetime).unwrap();
        assert_eq!(dt.timestamp(), unix_seconds);
    }

    #[test]
    fn filetime_before_unix_epoch_is_none() {
        assert!(filetime_to_datetime(0).is_none());
    }

    #[test]
    fn utf16le_decodes_ascii_name() {
        let data = "cmd.exe".encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<u8>>();
        let s = read_utf16le(&data, 0, data.len()).unwrap();
        assert_eq!(s, "cmd.exe");
    }
}
