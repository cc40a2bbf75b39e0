//! PEM certificate block extraction.
//!
//! Scans a byte buffer holding any number of concatenated PEM blocks and
//! returns the raw bytes of each well-formed, unencrypted `CERTIFICATE`
//! block.  The returned slices are the exact input bytes (header line through
//! footer line, including its newline), never a re-encoding, so later
//! integrity checks see what was on disk.

use tracing::debug;

const BEGIN_MARKER: &str = "-----BEGIN ";
const END_MARKER: &str = "-----END ";
const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Extract every `CERTIFICATE` block found in `data`.
///
/// Blocks of any other type, blocks carrying headers (e.g. `Proc-Type` on an
/// encrypted key) and blocks whose body does not decode are skipped with a
/// debug note.  Text outside blocks is ignored.
pub fn certificate_blocks(data: &[u8]) -> Vec<&[u8]> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while let Some((start, end)) = next_block(data, offset) {
        let raw = &data[start..end];
        offset = match classify(raw) {
            Ok(()) => {
                blocks.push(raw);
                end
            }
            // A truncated block swallows everything up to the next footer;
            // rescan from the line after its BEGIN marker.
            Err(Skip::Undecodable) => {
                debug!(reason = ?Skip::Undecodable, "skipping PEM block");
                line_end(data, start)
            }
            Err(reason) => {
                debug!(?reason, "skipping PEM block");
                end
            }
        };
    }

    blocks
}

#[derive(Debug)]
enum Skip {
    Undecodable,
    NotCertificate,
    HasHeaders,
}

/// Locate the next `-----BEGIN` .. `-----END ...-----\n` span at or after
/// `offset`.  Returns byte offsets into `data`.
fn next_block(data: &[u8], offset: usize) -> Option<(usize, usize)> {
    let start = offset + find(&data[offset..], BEGIN_MARKER.as_bytes())?;
    let end_pos = start + find(&data[start..], END_MARKER.as_bytes())?;
    Some((start, line_end(data, end_pos)))
}

/// Offset just past the newline ending the line that contains `pos`.
fn line_end(data: &[u8], pos: usize) -> usize {
    match data[pos..].iter().position(|&b| b == b'\n') {
        Some(nl) => pos + nl + 1,
        None => data.len(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn classify(raw: &[u8]) -> Result<(), Skip> {
    let parsed = ::pem::parse(raw).map_err(|_| Skip::Undecodable)?;
    if parsed.tag() != CERTIFICATE_TAG {
        return Err(Skip::NotCertificate);
    }
    if has_headers(raw) {
        return Err(Skip::HasHeaders);
    }
    Ok(())
}

/// RFC 1421 headers are `Key: value` lines between the BEGIN line and the
/// base64 body.  Base64 never contains `:`.
fn has_headers(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    text.lines()
        .skip(1)
        .take_while(|line| !line.starts_with(END_MARKER))
        .any(|line| line.contains(':'))
}
