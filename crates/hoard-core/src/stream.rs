use std::fs::File;
use std::io::{self, Write};

/// A writer in the blob write chain that must be finalized explicitly.
///
/// Compression trailers and interceptor footers are only emitted on `finish`,
/// so dropping a chain without finishing it leaves a truncated blob behind.
pub trait BlobWrite: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl BlobWrite for File {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()?;
        self.sync_all()
    }
}

impl BlobWrite for Vec<u8> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
