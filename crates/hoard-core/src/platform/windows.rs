use std::ffi::OsStr;
use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::iter::once;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::fs::{MetadataExt, OpenOptionsExt};
use std::path::Path;
use winapi::um::fileapi::{GetFileAttributesW, SetFileAttributesW, INVALID_FILE_ATTRIBUTES};
use winapi::um::winbase::FILE_FLAG_BACKUP_SEMANTICS;
use winapi::um::winnt::FILE_ATTRIBUTE_HIDDEN;

pub fn is_hidden(_path: &Path, metadata: &Metadata) -> bool {
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

pub fn set_hidden(path: &Path, hidden: bool) -> io::Result<()> {
    let wide: Vec<u16> = OsStr::new(path).encode_wide().chain(once(0)).collect();
    // SAFETY: `wide` is a NUL-terminated UTF-16 buffer that outlives both calls.
    unsafe {
        let attributes = GetFileAttributesW(wide.as_ptr());
        if attributes == INVALID_FILE_ATTRIBUTES {
            return Err(io::Error::last_os_error());
        }
        let updated = if hidden {
            attributes | FILE_ATTRIBUTE_HIDDEN
        } else {
            attributes & !FILE_ATTRIBUTE_HIDDEN
        };
        if updated != attributes && SetFileAttributesW(wide.as_ptr(), updated) == 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Folders can only be opened with backup semantics.
pub fn open_for_times(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(FILE_FLAG_BACKUP_SEMANTICS)
        .open(path)
}
