use derive_more::Display;
use flate2::read::GzDecoder;
use io_enum::Read;
use liblzma::read::XzDecoder;
use serde::{Deserialize, Serialize};
use std::io;

/// Compression applied by `tar` to the archive.
#[derive(Clone, Copy, Default, Debug, Display, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    #[display("gzip")]
    Gzip,
    #[display("xz")]
    Xz,
}

#[derive(Read)]
pub enum Decoder<R: io::Read> {
    Gzip(GzDecoder<R>),
    Xz(XzDecoder<R>),
}

impl Compression {
    /// Short option selecting the filter in `tar -c<flag>f`.
    pub fn tar_flag(&self) -> char {
        match self {
            Compression::Gzip => 'z',
            Compression::Xz => 'J',
        }
    }

    pub fn file_ext(&self) -> &'static str {
        match self {
            Compression::Gzip => "tar.gz",
            Compression::Xz => "tar.xz",
        }
    }

    pub fn decoder<R: io::Read>(&self, reader: R) -> Decoder<R> {
        match self {
            Compression::Gzip => Decoder::Gzip(GzDecoder::new(reader)),
            Compression::Xz => Decoder::Xz(XzDecoder::new(reader)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use io::{Read as _, Write as _};
    use liblzma::write::XzEncoder;

    #[test]
    fn test_tar_flag_and_ext() {
        assert_eq!(Compression::Gzip.tar_flag(), 'z');
        assert_eq!(Compression::Xz.tar_flag(), 'J');
        assert_eq!(Compression::Gzip.file_ext(), "tar.gz");
        assert_eq!(Compression::Xz.file_ext(), "tar.xz");
    }

    #[test]
    fn test_default_is_gzip() {
        assert_eq!(Compression::default(), Compression::Gzip);
    }

    #[test]
    fn test_compression_deserialization() {
        let compression: Compression = serde_yml::from_str("xz").unwrap();
        assert_eq!(compression, Compression::Xz);
        assert!(serde_yml::from_str::<Compression>("zstd").is_err());
    }

    #[test]
    fn test_gzip_decoder() {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"gzip payload").unwrap();
        let bytes = encoder.finish().unwrap();

        let mut content = String::new();
        Compression::Gzip
            .decoder(bytes.as_slice())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "gzip payload");
    }

    #[test]
    fn test_xz_decoder() {
        let mut encoder = XzEncoder::new(Vec::new(), 3);
        encoder.write_all(b"xz payload").unwrap();
        let bytes = encoder.finish().unwrap();

        let mut content = String::new();
        Compression::Xz
            .decoder(bytes.as_slice())
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "xz payload");
    }
}
