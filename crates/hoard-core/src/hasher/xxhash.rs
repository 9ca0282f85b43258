use super::Checksum;
use std::hash::Hasher as _;
use twox_hash::XxHash64;

/// XxHash64 with seed 0. Older catalogs keyed content on it; it is only
/// recomputed now to verify those rows before upgrading them.
pub struct LegacyHasher(XxHash64);

impl LegacyHasher {
    pub fn new() -> Self {
        Self(XxHash64::with_seed(0))
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.write(data);
    }

    pub fn finalize(&self) -> Checksum {
        Checksum::new(format!("{:016x}", self.0.finish()))
    }
}

impl Default for LegacyHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_data(data: &[u8]) -> Checksum {
    let mut hasher = LegacyHasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = LegacyHasher::new();
        hasher.update(b"split ");
        hasher.update(b"input");
        assert_eq!(hasher.finalize(), hash_data(b"split input"));
        assert_eq!(hash_data(b"").as_str().len(), 16);
    }
}
