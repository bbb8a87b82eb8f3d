use {
    crate::{CHECKSUM_CRC32, UdifChecksum},
    byteorder::{BigEndian, ByteOrder},
};

/// `cSum` resource type for [`MkBlock`].
pub const CHECKSUM_MKBLOCK: u32 = 0x0002;

/// Running checksum fed with the bytes of an image as it is built.
pub trait Checksum {
    fn update(&mut self, data: &[u8]);

    fn value(&self) -> u32;
}

#[derive(Clone, Default)]
pub struct Crc32(crc32fast::Hasher);

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn udif(&self) -> UdifChecksum {
        UdifChecksum::new(CHECKSUM_CRC32, self.value())
    }
}

impl Checksum for Crc32 {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn value(&self) -> u32 {
        self.0.clone().finalize()
    }
}

/// The UDIF block checksum: every big-endian word is added to the running
/// value rotated left by one. Trailing bytes that do not fill a word are
/// carried into the next update.
#[derive(Clone, Debug, Default)]
pub struct MkBlock {
    value: u32,
    pending: [u8; 4],
    pending_len: usize,
}

impl MkBlock {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_word(&mut self, word: u32) {
        self.value = word.wrapping_add(self.value.rotate_left(1));
    }
}

impl Checksum for MkBlock {
    fn update(&mut self, mut data: &[u8]) {
        if self.pending_len > 0 {
            let take = (4 - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < 4 {
                return;
            }
            let word = BigEndian::read_u32(&self.pending);
            self.add_word(word);
            self.pending_len = 0;
        }
        let mut words = data.chunks_exact(4);
        for word in &mut words {
            self.add_word(BigEndian::read_u32(word));
        }
        let rest = words.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    fn value(&self) -> u32 {
        self.value
    }
}

/// CRC32 over the big-endian first checksum word of every CRC32 table.
pub fn master_checksum<'a>(checksums: impl IntoIterator<Item = &'a UdifChecksum>) -> u32 {
    let mut crc = Crc32::new();
    for checksum in checksums {
        if checksum.ty == CHECKSUM_CRC32 {
            crc.update(&checksum.value().to_be_bytes());
        }
    }
    crc.value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkblock_rotates_and_adds() {
        let mut ck = MkBlock::new();
        ck.update(&[0, 0, 0, 1, 0x80, 0, 0, 0]);
        // 1, then 0x80000000 + rol(1) = 0x80000002
        assert_eq!(ck.value(), 0x8000_0002);
        ck.update(&[0, 0, 0, 0]);
        assert_eq!(ck.value(), 0x0000_0005);
    }

    #[test]
    fn mkblock_is_split_invariant() {
        let data: Vec<u8> = (0..1027u32).map(|i| (i * 13) as u8).collect();
        let mut whole = MkBlock::new();
        whole.update(&data);
        let mut split = MkBlock::new();
        for piece in data.chunks(7) {
            split.update(piece);
        }
        assert_eq!(whole.value(), split.value());
    }

    #[test]
    fn crc32_matches_crc32fast() {
        let mut crc = Crc32::new();
        crc.update(b"hello ");
        crc.update(b"world");
        assert_eq!(crc.value(), crc32fast::hash(b"hello world"));
        assert_eq!(crc.udif().ty, CHECKSUM_CRC32);
    }

    #[test]
    fn master_checksum_skips_other_types() {
        let a = UdifChecksum::crc32(0x0102_0304);
        let b = UdifChecksum::new(0, 0xFFFF_FFFF);
        let c = UdifChecksum::crc32(0x0506_0708);
        assert_eq!(
            master_checksum([&a, &b, &c]),
            crc32fast::hash(&[1, 2, 3, 4, 5, 6, 7, 8])
        );
    }
}
