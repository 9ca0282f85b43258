#[cfg(target_os = "windows")]
pub mod windows;

use std::fs::{File, FileTimes, Metadata};
use std::io;
use std::path::Path;
use std::time::SystemTime;

#[cfg(target_os = "windows")]
pub fn is_hidden(path: &Path, metadata: &Metadata) -> bool {
    windows::is_hidden(path, metadata)
}

/// Dot files are the only notion of hidden outside Windows.
#[cfg(not(target_os = "windows"))]
pub fn is_hidden(path: &Path, _metadata: &Metadata) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(target_os = "windows")]
pub fn set_hidden(path: &Path, hidden: bool) -> io::Result<()> {
    windows::set_hidden(path, hidden)
}

/// The restored name already carries its leading dot.
#[cfg(not(target_os = "windows"))]
pub fn set_hidden(_path: &Path, _hidden: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "windows")]
fn open_for_times(path: &Path) -> io::Result<File> {
    windows::open_for_times(path)
}

#[cfg(not(target_os = "windows"))]
fn open_for_times(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Set the modification time of a file or folder.
pub fn set_modified(path: &Path, modified: SystemTime) -> io::Result<()> {
    open_for_times(path)?.set_times(FileTimes::new().set_modified(modified))
}

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;

    #[test]
    fn test_dot_files_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let visible = dir.path().join("notes.txt");
        let hidden = dir.path().join(".profile");
        std::fs::write(&visible, b"x").unwrap();
        std::fs::write(&hidden, b"x").unwrap();

        assert!(!is_hidden(&visible, &std::fs::metadata(&visible).unwrap()));
        assert!(is_hidden(&hidden, &std::fs::metadata(&hidden).unwrap()));
    }

    #[test]
    fn test_set_modified_on_file_and_folder() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);

        set_modified(&file, when).unwrap();
        set_modified(dir.path(), when).unwrap();
        assert_eq!(std::fs::metadata(&file).unwrap().modified().unwrap(), when);
        assert_eq!(std::fs::metadata(dir.path()).unwrap().modified().unwrap(), when);
    }
}
