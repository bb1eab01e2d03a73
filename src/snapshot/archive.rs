//! Minimal ZIP container for snapshot bundles.
//!
//! Writes and reads standard ZIP archives (local headers, central
//! directory, end-of-central-directory) with deflate-compressed entries.
//! Compression and CRC-32 come from `flate2`; the container framing is
//! assembled here so snapshots stay readable by ordinary unzip tooling.

use crate::error::{DawnError, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

const LOCAL_HEADER_SIG: u32 = 0x0403_4B50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4B50;
const EOCD_SIG: u32 = 0x0605_4B50;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

struct EntryRecord {
    name: String,
    crc: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    local_offset: u32,
    dos_time: u16,
    dos_date: u16,
}

/// Write `entries` as a ZIP archive at `path`, atomically (temp + rename).
pub fn write_archive(
    path: &Path,
    entries: &[(String, Vec<u8>)],
    stamp: DateTime<Utc>,
) -> Result<()> {
    let (dos_time, dos_date) = dos_datetime(stamp);

    let mut buffer: Vec<u8> = Vec::new();
    let mut records: Vec<EntryRecord> = Vec::with_capacity(entries.len());

    for (name, data) in entries {
        let mut crc = Crc::new();
        crc.update(data);

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let local_offset = buffer.len() as u32;
        let record = EntryRecord {
            name: name.clone(),
            crc: crc.sum(),
            compressed_size: compressed.len() as u32,
            uncompressed_size: data.len() as u32,
            local_offset,
            dos_time,
            dos_date,
        };

        buffer.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        buffer.extend_from_slice(&20u16.to_le_bytes()); // version needed
        buffer.extend_from_slice(&0u16.to_le_bytes()); // flags
        buffer.extend_from_slice(&METHOD_DEFLATE.to_le_bytes());
        buffer.extend_from_slice(&record.dos_time.to_le_bytes());
        buffer.extend_from_slice(&record.dos_date.to_le_bytes());
        buffer.extend_from_slice(&record.crc.to_le_bytes());
        buffer.extend_from_slice(&record.compressed_size.to_le_bytes());
        buffer.extend_from_slice(&record.uncompressed_size.to_le_bytes());
        buffer.extend_from_slice(&(record.name.len() as u16).to_le_bytes());
        buffer.extend_from_slice(&0u16.to_le_bytes()); // extra len
        buffer.extend_from_slice(record.name.as_bytes());
        buffer.extend_from_slice(&compressed);

        records.push(record);
    }

    let central_offset = buffer.len() as u32;
    for record in &records {
        buffer.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
        buffer.extend_from_slice(&20u16.to_le_bytes()); // version made by
        buffer.extend_from_slice(&20u16.to_le_bytes()); // version needed
        buffer.extend_from_slice(&0u16.to_le_bytes()); // flags
        buffer.extend_from_slice(&METHOD_DEFLATE.to_le_bytes());
        buffer.extend_from_slice(&record.dos_time.to_le_bytes());
        buffer.extend_from_slice(&record.dos_date.to_le_bytes());
        buffer.extend_from_slice(&record.crc.to_le_bytes());
        buffer.extend_from_slice(&record.compressed_size.to_le_bytes());
        buffer.extend_from_slice(&record.uncompressed_size.to_le_bytes());
        buffer.extend_from_slice(&(record.name.len() as u16).to_le_bytes());
        buffer.extend_from_slice(&0u16.to_le_bytes()); // extra len
        buffer.extend_from_slice(&0u16.to_le_bytes()); // comment len
        buffer.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        buffer.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        buffer.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        buffer.extend_from_slice(&record.local_offset.to_le_bytes());
        buffer.extend_from_slice(record.name.as_bytes());
    }
    let central_size = buffer.len() as u32 - central_offset;

    buffer.extend_from_slice(&EOCD_SIG.to_le_bytes());
    buffer.extend_from_slice(&0u16.to_le_bytes()); // disk number
    buffer.extend_from_slice(&0u16.to_le_bytes()); // central directory disk
    buffer.extend_from_slice(&(records.len() as u16).to_le_bytes());
    buffer.extend_from_slice(&(records.len() as u16).to_le_bytes());
    buffer.extend_from_slice(&central_size.to_le_bytes());
    buffer.extend_from_slice(&central_offset.to_le_bytes());
    buffer.extend_from_slice(&0u16.to_le_bytes()); // comment len

    let tmp = path.with_extension("zip.tmp");
    fs::write(&tmp, &buffer)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read every entry of a ZIP archive written by [`write_archive`] (or any
/// single-disk archive with stored/deflate entries).
pub fn read_archive(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let data = fs::read(path)?;
    let eocd = find_eocd(&data)?;

    let entry_count = read_u16(&data, eocd + 10)? as usize;
    let central_offset = read_u32(&data, eocd + 16)? as usize;

    let mut entries = Vec::with_capacity(entry_count);
    let mut cursor = central_offset;

    for _ in 0..entry_count {
        if read_u32(&data, cursor)? != CENTRAL_HEADER_SIG {
            return Err(DawnError::Snapshot(
                "malformed central directory entry".to_string(),
            ));
        }

        let method = read_u16(&data, cursor + 10)?;
        let crc = read_u32(&data, cursor + 16)?;
        let compressed_size = read_u32(&data, cursor + 20)? as usize;
        let name_len = read_u16(&data, cursor + 28)? as usize;
        let extra_len = read_u16(&data, cursor + 30)? as usize;
        let comment_len = read_u16(&data, cursor + 32)? as usize;
        let local_offset = read_u32(&data, cursor + 42)? as usize;

        let name_bytes = slice(&data, cursor + 46, name_len)?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| DawnError::Snapshot("non-UTF-8 entry name".to_string()))?;

        // Locate the data behind the local header.
        if read_u32(&data, local_offset)? != LOCAL_HEADER_SIG {
            return Err(DawnError::Snapshot("malformed local header".to_string()));
        }
        let local_name_len = read_u16(&data, local_offset + 26)? as usize;
        let local_extra_len = read_u16(&data, local_offset + 28)? as usize;
        let data_start = local_offset + 30 + local_name_len + local_extra_len;
        let compressed = slice(&data, data_start, compressed_size)?;

        let payload = match method {
            METHOD_DEFLATE => {
                let mut decoder = DeflateDecoder::new(compressed);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| DawnError::Snapshot(format!("inflate failed: {e}")))?;
                out
            }
            METHOD_STORED => compressed.to_vec(),
            other => {
                return Err(DawnError::Snapshot(format!(
                    "unsupported compression method {other}"
                )))
            }
        };

        let mut check = Crc::new();
        check.update(&payload);
        if check.sum() != crc {
            return Err(DawnError::Snapshot(format!(
                "CRC mismatch for entry {name}"
            )));
        }

        entries.push((name, payload));
        cursor += 46 + name_len + extra_len + comment_len;
    }

    Ok(entries)
}

fn find_eocd(data: &[u8]) -> Result<usize> {
    let sig = EOCD_SIG.to_le_bytes();
    if data.len() < 22 {
        return Err(DawnError::Snapshot("archive too small".to_string()));
    }

    let mut i = data.len() - 22;
    loop {
        if data[i..i + 4] == sig {
            return Ok(i);
        }
        if i == 0 {
            return Err(DawnError::Snapshot(
                "end of central directory not found".to_string(),
            ));
        }
        i -= 1;
    }
}

fn dos_datetime(stamp: DateTime<Utc>) -> (u16, u16) {
    let time = ((stamp.hour() as u16) << 11)
        | ((stamp.minute() as u16) << 5)
        | ((stamp.second() as u16) / 2);
    let year = (stamp.year().clamp(1980, 2107) - 1980) as u16;
    let date = (year << 9) | ((stamp.month() as u16) << 5) | (stamp.day() as u16);
    (time, date)
}

fn slice(data: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    data.get(start..start + len)
        .ok_or_else(|| DawnError::Snapshot("archive truncated".to_string()))
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
