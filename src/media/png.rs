//! PNG text-chunk reader.
//!
//! PNG chunks are `length (u32 BE) | type (4 bytes) | data | crc`. Generation
//! tools store their metadata in `tEXt` (`keyword\0text`), `zTXt`
//! (`keyword\0method zlib-data`) or `iTXt`
//! (`keyword\0flag method language\0translated\0text`) chunks.

use flate2::read::ZlibDecoder;
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

/// PNG file signature (8 bytes).
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Inflated chunks larger than this are dropped.
const MAX_INFLATED_LEN: u64 = 64 * 1024 * 1024;

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

/// Collect keyword → text from every text chunk in `bytes`.
///
/// Non-PNG input yields an empty map. A truncated file stops the scan but
/// keeps whatever was read before the damage. The first chunk wins when a
/// keyword repeats.
pub fn read_text_chunks(bytes: &[u8]) -> HashMap<String, String> {
    let mut chunks = HashMap::new();
    if !is_png(bytes) {
        return chunks;
    }

    let mut offset = PNG_SIGNATURE.len();
    while offset + 8 <= bytes.len() {
        let len = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let kind = &bytes[offset + 4..offset + 8];
        let data_start = offset + 8;
        let Some(data_end) = data_start.checked_add(len).filter(|end| *end <= bytes.len()) else {
            debug!("Truncated PNG chunk, stopping text scan");
            break;
        };
        let data = &bytes[data_start..data_end];

        let parsed = match kind {
            b"tEXt" => parse_text(data),
            b"zTXt" => parse_ztxt(data),
            b"iTXt" => parse_itxt(data),
            b"IEND" => break,
            _ => None,
        };
        if let Some((keyword, text)) = parsed {
            chunks.entry(keyword).or_insert(text);
        }

        // data + 4-byte CRC
        offset = data_end + 4;
    }

    chunks
}

fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = data.iter().position(|&b| b == 0)?;
    Some((&data[..pos], &data[pos + 1..]))
}

fn keyword(raw: &[u8]) -> Option<String> {
    let keyword = String::from_utf8_lossy(raw).into_owned();
    (!keyword.is_empty()).then_some(keyword)
}

/// tEXt is Latin-1 by the standard, but tools write UTF-8 in practice.
fn parse_text(data: &[u8]) -> Option<(String, String)> {
    let (key, text) = split_nul(data)?;
    Some((keyword(key)?, String::from_utf8_lossy(text).into_owned()))
}

fn parse_ztxt(data: &[u8]) -> Option<(String, String)> {
    let (key, rest) = split_nul(data)?;
    // compression method 0 (zlib) is the only one defined
    let (&method, compressed) = rest.split_first()?;
    if method != 0 {
        return None;
    }
    Some((keyword(key)?, inflate(compressed)?))
}

fn parse_itxt(data: &[u8]) -> Option<(String, String)> {
    let (key, rest) = split_nul(data)?;
    let (&flag, rest) = rest.split_first()?;
    let (&method, rest) = rest.split_first()?;
    let (_language, rest) = split_nul(rest)?;
    let (_translated, text) = split_nul(rest)?;

    let text = match (flag, method) {
        (0, _) => String::from_utf8_lossy(text).into_owned(),
        (1, 0) => inflate(text)?,
        _ => return None,
    };
    Some((keyword(key)?, text))
}

fn inflate(compressed: &[u8]) -> Option<String> {
    let mut out = Vec::new();
    ZlibDecoder::new(compressed)
        .take(MAX_INFLATED_LEN)
        .read_to_end(&mut out)
        .ok()?;
    Some(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    /// Chunk with a zero CRC; the reader doesn't verify CRCs.
    fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    fn png(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        out.extend(chunk(b"IHDR", &[0; 13]));
        for c in chunks {
            out.extend_from_slice(c);
        }
        out.extend(chunk(b"IEND", &[]));
        out
    }

    fn zlib(text: &str) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_reads_text_chunk() {
        let bytes = png(&[chunk(b"tEXt", b"parameters\0a cat\nSteps: 20")]);
        let chunks = read_text_chunks(&bytes);
        assert_eq!(chunks.get("parameters").map(String::as_str), Some("a cat\nSteps: 20"));
    }

    #[test]
    fn test_reads_compressed_chunks() {
        let mut ztxt = b"workflow\0\0".to_vec();
        ztxt.extend(zlib(r#"{"nodes": []}"#));

        let mut itxt = b"parameters\0\x01\0en\0\0".to_vec();
        itxt.extend(zlib("a dog"));

        let chunks = read_text_chunks(&png(&[chunk(b"zTXt", &ztxt), chunk(b"iTXt", &itxt)]));
        assert_eq!(chunks.get("workflow").map(String::as_str), Some(r#"{"nodes": []}"#));
        assert_eq!(chunks.get("parameters").map(String::as_str), Some("a dog"));
    }

    #[test]
    fn test_reads_uncompressed_itxt() {
        let bytes = png(&[chunk(b"iTXt", "prompt\0\0\0\0\0ネコ".as_bytes())]);
        assert_eq!(read_text_chunks(&bytes).get("prompt").map(String::as_str), Some("ネコ"));
    }

    #[test]
    fn test_first_keyword_wins() {
        let bytes = png(&[
            chunk(b"tEXt", b"parameters\0first"),
            chunk(b"tEXt", b"parameters\0second"),
        ]);
        assert_eq!(read_text_chunks(&bytes)["parameters"], "first");
    }

    #[test]
    fn test_non_png_and_truncated_input() {
        assert!(read_text_chunks(b"GIF89a....").is_empty());

        let mut bytes = png(&[chunk(b"tEXt", b"parameters\0kept")]);
        bytes.truncate(bytes.len() - 12);
        bytes.extend_from_slice(&[0, 0, 1, 0, b't', b'E', b'X', b't', b'x']);
        assert_eq!(read_text_chunks(&bytes)["parameters"], "kept");
    }
}
