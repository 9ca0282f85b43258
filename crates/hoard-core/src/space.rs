use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskUsage {
    pub available: u64,
    pub total: u64,
}

impl DiskUsage {
    pub fn free_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.available as f64 * 100.0 / self.total as f64
    }
}

/// Reports usable space of the volume holding a path.
pub trait SpaceProbe: Send + Sync {
    fn usage(&self, path: &Path) -> io::Result<DiskUsage>;
}

/// Queries the operating system through `fs4`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn usage(&self, path: &Path) -> io::Result<DiskUsage> {
        Ok(DiskUsage {
            available: fs4::available_space(path)?,
            total: fs4::total_space(path)?,
        })
    }
}
