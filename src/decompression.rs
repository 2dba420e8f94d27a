use flate2::read::MultiGzDecoder;
use std::io::{Chain, Cursor, Read};

/// Wrap a stream in gzip decompression when the gzip magic (1F 8B 08) is
/// present, passing everything else through untouched.
///
/// The sniffed bytes are chained back in front so no data is lost. The
/// returned reader borrows no longer than the input stream, which lets
/// archive-entry streams (that borrow a pooled handle) pass through.
pub fn maybe_decompress<'a, R: Read + 'a>(mut reader: R) -> std::io::Result<Box<dyn Read + 'a>> {
    let mut head = [0u8; 3];
    let mut n = 0;
    while n < head.len() {
        let read = reader.read(&mut head[n..])?;
        if read == 0 {
            break;
        }
        n += read;
    }

    let prefix = Cursor::new(head[..n].to_vec());
    let chained: Chain<Cursor<Vec<u8>>, R> = prefix.chain(reader);

    let is_gzip = n >= 3 && head[0] == 0x1F && head[1] == 0x8B && head[2] == 0x08;

    if is_gzip {
        Ok(Box::new(MultiGzDecoder::new(chained)))
    } else {
        Ok(Box::new(chained))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_passthrough_keeps_sniffed_bytes() {
        let data = b"plain text line\n";
        let mut reader = maybe_decompress(&data[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_short_input_passthrough() {
        let data = b"ab";
        let mut reader = maybe_decompress(&data[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_gzip_detected_and_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed line\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut reader = maybe_decompress(&compressed[..]).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "compressed line\n");
    }
}
