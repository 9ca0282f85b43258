use super::Checksum;

/// BLAKE3, the hash every new FileContent row is keyed on.
pub struct StrongHasher(blake3::Hasher);

impl StrongHasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(&self) -> Checksum {
        Checksum::new(self.0.finalize().to_hex().to_string())
    }
}

impl Default for StrongHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_data(data: &[u8]) -> Checksum {
    Checksum::new(blake3::hash(data).to_hex().to_string())
}
