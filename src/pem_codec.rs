//! PEM framing for certificates, certificate requests and PKCS#1 keys.
//!
//! Encoding goes through the `pem` crate with LF line endings. Decoding
//! locates each `-----BEGIN ...-----` / `-----END ...-----` pair by byte
//! offset first and only then decodes the body, so callers scanning a
//! concatenated chain can copy any block's original bytes untouched.

use std::ops::Range;

use pem::{EncodeConfig, LineEnding, Pem};

pub const CERTIFICATE_TAG: &str = "CERTIFICATE";
pub const RSA_PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";
pub const CERTIFICATE_REQUEST_TAG: &str = "CERTIFICATE REQUEST";

const BEGIN_MARKER: &[u8] = b"-----BEGIN ";
const END_MARKER: &[u8] = b"-----END ";
const DASHES: &[u8] = b"-----";

/// Wrap DER certificate bytes in a `CERTIFICATE` block.
pub fn encode_certificate(der: &[u8]) -> Vec<u8> {
    encode_block(CERTIFICATE_TAG, der)
}

/// Wrap PKCS#1 DER key bytes in an `RSA PRIVATE KEY` block.
pub fn encode_rsa_private_key(der: &[u8]) -> Vec<u8> {
    encode_block(RSA_PRIVATE_KEY_TAG, der)
}

pub fn encode_certificate_request(der: &[u8]) -> Vec<u8> {
    encode_block(CERTIFICATE_REQUEST_TAG, der)
}

fn encode_block(tag: &str, der: &[u8]) -> Vec<u8> {
    let block = Pem::new(tag, der.to_vec());
    pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF)).into_bytes()
}

/// One framed block inside a PEM byte string.
#[derive(Debug, Clone)]
pub struct PemBlock<'a> {
    /// Byte range of the block in the scanned input, from the BEGIN line up
    /// to and including the line break after the END line.
    pub range: Range<usize>,
    pub raw: &'a [u8],
    /// Decoded block, `None` when the body is not valid base64 or the
    /// labels do not match.
    pub pem: Option<Pem>,
}

impl PemBlock<'_> {
    pub fn contents(&self) -> Option<&[u8]> {
        self.pem.as_ref().map(|p| p.contents())
    }
}

/// Iterator over the framed blocks of a concatenated PEM byte string.
///
/// Text outside of blocks is skipped. Iteration stops at the first BEGIN
/// line without a matching END line.
pub struct PemBlocks<'a> {
    data: &'a [u8],
    offset: usize,
}

pub fn blocks(data: &[u8]) -> PemBlocks<'_> {
    PemBlocks { data, offset: 0 }
}

impl<'a> Iterator for PemBlocks<'a> {
    type Item = PemBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let range = find_block(self.data, self.offset)?;
        self.offset = range.end;
        let raw = &self.data[range.clone()];
        let pem = pem::parse(raw).ok();
        Some(PemBlock { range, raw, pem })
    }
}

/// Decode the first block of `data`, returning it with the undecoded
/// remainder that follows it.
pub fn decode_first(data: &[u8]) -> Option<(Pem, &[u8])> {
    let block = blocks(data).next()?;
    let end = block.range.end;
    block.pem.map(|pem| (pem, &data[end..]))
}

fn find_block(data: &[u8], from: usize) -> Option<Range<usize>> {
    let start = from + find(&data[from..], BEGIN_MARKER)?;
    let label_start = start + BEGIN_MARKER.len();
    let label_len = find(&data[label_start..], DASHES)?;
    let label = &data[label_start..label_start + label_len];
    if label.contains(&b'\n') {
        return None;
    }

    let mut end_line = END_MARKER.to_vec();
    end_line.extend_from_slice(label);
    end_line.extend_from_slice(DASHES);

    let search_from = label_start + label_len + DASHES.len();
    let mut end = search_from + find(&data[search_from..], &end_line)? + end_line.len();
    if data[end..].starts_with(b"\r\n") {
        end += 2;
    } else if data[end..].starts_with(b"\n") {
        end += 1;
    }
    Some(start..end)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
