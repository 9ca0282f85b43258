use crate::stream::BlobWrite;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

/// Compression applied to a blob, recorded per FileContent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    #[default]
    Zstd,
}

impl Compression {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// Wrap `inner` so that bytes written are compressed before reaching it.
    pub fn wrap_writer(
        self,
        inner: Box<dyn BlobWrite>,
        level: Option<i32>,
    ) -> io::Result<Box<dyn BlobWrite>> {
        Ok(match self {
            Compression::None => inner,
            Compression::Gzip => {
                let level = level.map(|l| l.clamp(0, 9) as u32).unwrap_or(6);
                Box::new(GzipWriter(GzEncoder::new(
                    inner,
                    flate2::Compression::new(level),
                )))
            }
            Compression::Zstd => {
                let level = level.unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL);
                Box::new(ZstdWriter(zstd::stream::write::Encoder::new(inner, level)?))
            }
        })
    }

    /// Wrap `inner` so that reads yield decompressed bytes.
    pub fn wrap_reader<'a>(self, inner: Box<dyn Read + 'a>) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => inner,
            Compression::Gzip => Box::new(GzDecoder::new(inner)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(inner)?),
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression tag '{}'", other)),
        }
    }
}

struct GzipWriter(GzEncoder<Box<dyn BlobWrite>>);

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl BlobWrite for GzipWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.finish()?.finish()
    }
}

struct ZstdWriter(zstd::stream::write::Encoder<'static, Box<dyn BlobWrite>>);

impl Write for ZstdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl BlobWrite for ZstdWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.finish()?.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Captures what reaches the bottom of the chain.
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl BlobWrite for Capture {
        fn finish(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    fn compress(compression: Compression, data: &[u8]) -> Vec<u8> {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut writer = compression
            .wrap_writer(Box::new(Capture(sink.clone())), None)
            .unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
        let out = sink.lock().unwrap().clone();
        out
    }

    #[test]
    fn test_each_algorithm_restores_original_bytes() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(200);
        for compression in [Compression::None, Compression::Gzip, Compression::Zstd] {
            let stored = compress(compression, &data);
            let mut reader = compression.wrap_reader(Box::new(&stored[..])).unwrap();
            let mut restored = Vec::new();
            reader.read_to_end(&mut restored).unwrap();
            assert_eq!(restored, data, "{} did not restore input", compression);
        }
    }

    #[test]
    fn test_compressed_output_is_smaller_for_repetitive_data() {
        let data = vec![b'a'; 64 * 1024];
        assert!(compress(Compression::Gzip, &data).len() < data.len() / 10);
        assert!(compress(Compression::Zstd, &data).len() < data.len() / 10);
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!("bzip2".parse::<Compression>().is_err());
    }
}
