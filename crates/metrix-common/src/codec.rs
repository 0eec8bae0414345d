use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("gzip compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("gzip decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_payload_has_gzip_magic() {
        let packed = gzip_compress(br#"[{"id":"a","type":"counter","delta":1}]"#).unwrap();
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        let unpacked = gzip_decompress(&packed).unwrap();
        assert_eq!(unpacked, br#"[{"id":"a","type":"counter","delta":1}]"#);
    }

    #[test]
    fn decompress_rejects_plain_bytes() {
        assert!(matches!(
            gzip_decompress(b"plain json"),
            Err(CodecError::Decompress(_))
        ));
    }
}
