//! Binary chunk format
//!
//! A chunk is the unit pushed to LogBroker:
//!
//! ```text
//! [8 bytes LE: chunk_id][8 bytes LE: seqno][8 bytes LE: line_count][gzip(newline-joined TSKV rows)]
//! ```
//!
//! On the push stream each chunk travels inside an HTTP chunked-transfer
//! frame (`<HEX LEN>\r\n<chunk>\r\n`), see [`frame_chunk`].

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::Row;
use crate::error::{CodecError, CodecResult};
use crate::tskv::{decode_row, encode_row};

/// Size of the fixed binary header (three u64 fields)
pub const CHUNK_HEADER_SIZE: usize = 24;

/// Terminator of the chunked-transfer length line
const ENVELOPE_TERMINATOR: &[u8] = b"\r\n";

/// Fixed header preceding every compressed chunk body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Reserved, always 0
    pub chunk_id: u64,
    /// Sequence number correlating this push with later acknowledgements
    pub seqno: u64,
    /// Number of rows in the body
    pub line_count: u64,
}

impl ChunkHeader {
    /// Append the little-endian header to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.chunk_id);
        buf.put_u64_le(self.seqno);
        buf.put_u64_le(self.line_count);
    }

    /// Unpack a header from the first [`CHUNK_HEADER_SIZE`] bytes of `data`
    pub fn read_from(data: &[u8]) -> CodecResult<Self> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(CodecError::malformed_chunk(format!(
                "header needs {CHUNK_HEADER_SIZE} bytes, have {}",
                data.len()
            )));
        }
        let mut buf = &data[..CHUNK_HEADER_SIZE];
        Ok(Self {
            chunk_id: buf.get_u64_le(),
            seqno: buf.get_u64_le(),
            line_count: buf.get_u64_le(),
        })
    }
}

/// A decoded chunk: header plus rows
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub rows: Vec<Row>,
}

impl Chunk {
    /// Create a chunk for `seqno` with the reserved chunk id and the row count as line count
    pub fn new(seqno: u64, rows: Vec<Row>) -> Self {
        Self {
            header: ChunkHeader {
                chunk_id: 0,
                seqno,
                line_count: rows.len() as u64,
            },
            rows,
        }
    }

    /// Serialize to the binary chunk format
    pub fn encode(&self) -> CodecResult<Bytes> {
        serialize_chunk(
            self.header.chunk_id,
            self.header.seqno,
            self.header.line_count,
            &self.rows,
        )
    }

    /// Parse a raw chunk (no transfer envelope)
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        let header = ChunkHeader::read_from(data)?;
        let body = gzip_decompress(&data[CHUNK_HEADER_SIZE..])?;
        let text = String::from_utf8(body)
            .map_err(|e| CodecError::malformed_chunk(format!("body is not UTF-8: {e}")))?;

        let rows = text
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(decode_row)
            .collect::<CodecResult<Vec<_>>>()?;

        Ok(Self { header, rows })
    }
}

/// Gzip-compress a byte slice
pub fn gzip_compress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a gzip stream
pub fn gzip_decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Build a binary chunk: fixed header followed by gzip-compressed TSKV rows
pub fn serialize_chunk(
    chunk_id: u64,
    seqno: u64,
    line_count: u64,
    rows: &[Row],
) -> CodecResult<Bytes> {
    let lines = rows
        .iter()
        .map(encode_row)
        .collect::<CodecResult<Vec<_>>>()?;
    let body = gzip_compress(lines.join("\n").as_bytes())?;

    let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + body.len());
    ChunkHeader {
        chunk_id,
        seqno,
        line_count,
    }
    .write_to(&mut buf);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Wrap a payload in a chunked-transfer frame: `<HEX LEN>\r\n<payload>\r\n`
pub fn frame_chunk(payload: &[u8]) -> Bytes {
    let prefix = format!("{:X}\r\n", payload.len());
    let mut buf = BytesMut::with_capacity(prefix.len() + payload.len() + 2);
    buf.put_slice(prefix.as_bytes());
    buf.put_slice(payload);
    buf.put_slice(ENVELOPE_TERMINATOR);
    buf.freeze()
}

/// Parse the rows of a chunk as seen on the push stream
///
/// `data` starts with the chunked-transfer length line. The header is read
/// right after the line terminator and the remainder of the frame is
/// decompressed.
pub fn parse_chunk(data: &[u8]) -> CodecResult<Vec<Row>> {
    let line_end = data
        .windows(ENVELOPE_TERMINATOR.len())
        .position(|w| w == ENVELOPE_TERMINATOR)
        .ok_or_else(|| CodecError::malformed_chunk("envelope terminator not found"))?;

    let length_line = std::str::from_utf8(&data[..line_end])
        .map_err(|_| CodecError::malformed_chunk("length line is not ASCII"))?;
    let length = usize::from_str_radix(length_line.trim(), 16)
        .map_err(|_| CodecError::malformed_chunk(format!("bad length line {length_line:?}")))?;

    let start = line_end + ENVELOPE_TERMINATOR.len();
    let payload = start
        .checked_add(length)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            CodecError::malformed_chunk(format!(
                "frame announces {length} bytes, have {}",
                data.len().saturating_sub(start)
            ))
        })?;

    Ok(Chunk::decode(payload)?.rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                json!({"id": i, "event_type": "job_completed", "pool": format!("pool-{i}")})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let data = serialize_chunk(0, 7, 2, &rows(2)).unwrap();
        assert_eq!(&data[0..8], &0u64.to_le_bytes());
        assert_eq!(&data[8..16], &7u64.to_le_bytes());
        assert_eq!(&data[16..24], &2u64.to_le_bytes());
    }

    #[test]
    fn test_chunk_roundtrip() {
        let chunk = Chunk::new(42, rows(5));
        let decoded = Chunk::decode(&chunk.encode().unwrap()).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_empty_chunk() {
        let data = serialize_chunk(0, 1, 0, &[]).unwrap();
        let decoded = Chunk::decode(&data).unwrap();
        assert_eq!(decoded.header.line_count, 0);
        assert!(decoded.rows.is_empty());
        assert!(parse_chunk(&frame_chunk(&data)).unwrap().is_empty());
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let mut buf = BytesMut::new();
        ChunkHeader {
            chunk_id: 0,
            seqno: 3,
            line_count: 1,
        }
        .write_to(&mut buf);
        buf.put_slice(&gzip_compress(b"tskv\ta=1\n").unwrap());
        let decoded = Chunk::decode(&buf).unwrap();
        assert_eq!(decoded.rows.len(), 1);
    }

    #[test]
    fn test_frame_format() {
        let framed = frame_chunk(b"0123456789ABCDEFG");
        assert_eq!(&framed[..], b"11\r\n0123456789ABCDEFG\r\n");
    }

    #[test]
    fn test_parse_framed_chunk() {
        let data = serialize_chunk(0, 9, 3, &rows(3)).unwrap();
        let parsed = parse_chunk(&frame_chunk(&data)).unwrap();
        assert_eq!(parsed, rows(3));
    }

    #[test]
    fn test_parse_chunk_without_terminator() {
        assert!(matches!(
            parse_chunk(b"1F no terminator here"),
            Err(CodecError::MalformedChunk(_))
        ));
    }

    #[test]
    fn test_parse_chunk_short_header() {
        assert!(matches!(
            parse_chunk(b"4\r\nabcd\r\n"),
            Err(CodecError::MalformedChunk(_))
        ));
    }

    #[test]
    fn test_parse_chunk_truncated_frame() {
        assert!(matches!(
            parse_chunk(b"FF\r\nshort"),
            Err(CodecError::MalformedChunk(_))
        ));
    }
}
