use hfsplus::{Cursor, Read, ReadExt, Result, Write, WriteExt};

/// `"encrcdsa"`
pub const FILEVAULT_V2_SIGNATURE: u64 = 0x656e_6372_6364_7361;

pub const HEADER_SIZE: usize = 832;

const PADDING_SIZE: usize = 0x260;

/// The version 2 container header, stored big-endian at offset 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileVaultV2Header {
    pub signature: u64,
    pub version: u32,
    pub enc_iv_size: u32,
    pub unknown: [u32; 5],
    pub uuid: [u8; 16],
    pub block_size: u32,
    pub data_size: u64,
    pub data_offset: u64,
    pub kdf_algorithm: u32,
    pub kdf_prng_algorithm: u32,
    pub kdf_iteration_count: u32,
    pub kdf_salt_len: u32,
    pub kdf_salt: [u8; 32],
    pub blob_enc_iv_size: u32,
    pub blob_enc_iv: [u8; 32],
    pub blob_enc_key_bits: u32,
    pub blob_enc_algorithm: u32,
    pub blob_enc_padding: u32,
    pub blob_enc_mode: u32,
    pub encrypted_keyblob_size: u32,
    pub encrypted_keyblob: [u8; 0x30],
}

impl FileVaultV2Header {
    /// A header for an empty container whose data starts at `data_offset`.
    pub fn new(block_size: u32, data_offset: u64) -> Self {
        Self {
            signature: FILEVAULT_V2_SIGNATURE,
            version: 2,
            enc_iv_size: 16,
            unknown: [0; 5],
            uuid: [0; 16],
            block_size,
            data_size: 0,
            data_offset,
            kdf_algorithm: 0,
            kdf_prng_algorithm: 0,
            kdf_iteration_count: 0,
            kdf_salt_len: 0,
            kdf_salt: [0; 32],
            blob_enc_iv_size: 0,
            blob_enc_iv: [0; 32],
            blob_enc_key_bits: 128,
            blob_enc_algorithm: 0,
            blob_enc_padding: 0,
            blob_enc_mode: 0,
            encrypted_keyblob_size: 0,
            encrypted_keyblob: [0; 0x30],
        }
    }

    pub fn import(bytes: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(bytes);
        let signature = r.read_u64_be()?;
        let version = r.read_u32_be()?;
        let enc_iv_size = r.read_u32_be()?;
        let mut unknown = [0u32; 5];
        for word in unknown.iter_mut() {
            *word = r.read_u32_be()?;
        }
        let mut uuid = [0u8; 16];
        r.read_exact(&mut uuid)?;
        let block_size = r.read_u32_be()?;
        let data_size = r.read_u64_be()?;
        let data_offset = r.read_u64_be()?;
        let mut padding = [0u8; PADDING_SIZE];
        r.read_exact(&mut padding)?;
        let kdf_algorithm = r.read_u32_be()?;
        let kdf_prng_algorithm = r.read_u32_be()?;
        let kdf_iteration_count = r.read_u32_be()?;
        let kdf_salt_len = r.read_u32_be()?;
        let mut kdf_salt = [0u8; 32];
        r.read_exact(&mut kdf_salt)?;
        let blob_enc_iv_size = r.read_u32_be()?;
        let mut blob_enc_iv = [0u8; 32];
        r.read_exact(&mut blob_enc_iv)?;
        let blob_enc_key_bits = r.read_u32_be()?;
        let blob_enc_algorithm = r.read_u32_be()?;
        let blob_enc_padding = r.read_u32_be()?;
        let blob_enc_mode = r.read_u32_be()?;
        let encrypted_keyblob_size = r.read_u32_be()?;
        let mut encrypted_keyblob = [0u8; 0x30];
        r.read_exact(&mut encrypted_keyblob)?;
        Ok(Self {
            signature,
            version,
            enc_iv_size,
            unknown,
            uuid,
            block_size,
            data_size,
            data_offset,
            kdf_algorithm,
            kdf_prng_algorithm,
            kdf_iteration_count,
            kdf_salt_len,
            kdf_salt,
            blob_enc_iv_size,
            blob_enc_iv,
            blob_enc_key_bits,
            blob_enc_algorithm,
            blob_enc_padding,
            blob_enc_mode,
            encrypted_keyblob_size,
            encrypted_keyblob,
        })
    }

    pub fn export(&self) -> Result<Vec<u8>> {
        let mut w = Vec::with_capacity(HEADER_SIZE);
        w.write_u64_be(self.signature)?;
        w.write_u32_be(self.version)?;
        w.write_u32_be(self.enc_iv_size)?;
        for word in self.unknown {
            w.write_u32_be(word)?;
        }
        w.write_all(&self.uuid)?;
        w.write_u32_be(self.block_size)?;
        w.write_u64_be(self.data_size)?;
        w.write_u64_be(self.data_offset)?;
        w.write_all(&[0u8; PADDING_SIZE])?;
        w.write_u32_be(self.kdf_algorithm)?;
        w.write_u32_be(self.kdf_prng_algorithm)?;
        w.write_u32_be(self.kdf_iteration_count)?;
        w.write_u32_be(self.kdf_salt_len)?;
        w.write_all(&self.kdf_salt)?;
        w.write_u32_be(self.blob_enc_iv_size)?;
        w.write_all(&self.blob_enc_iv)?;
        w.write_u32_be(self.blob_enc_key_bits)?;
        w.write_u32_be(self.blob_enc_algorithm)?;
        w.write_u32_be(self.blob_enc_padding)?;
        w.write_u32_be(self.blob_enc_mode)?;
        w.write_u32_be(self.encrypted_keyblob_size)?;
        w.write_all(&self.encrypted_keyblob)?;
        Ok(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() -> anyhow::Result<()> {
        let mut header = FileVaultV2Header::new(4096, 4096);
        header.data_size = 0x1234_5678;
        header.kdf_iteration_count = 1000;
        header.encrypted_keyblob[0x2F] = 0xAB;
        let bytes = header.export()?;
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..8], b"encrcdsa");
        assert_eq!(&bytes[52..56], &4096u32.to_be_bytes());
        assert_eq!(&bytes[56..64], &0x1234_5678u64.to_be_bytes());
        assert_eq!(&bytes[688..692], &1000u32.to_be_bytes());
        assert_eq!(bytes[HEADER_SIZE - 1], 0xAB);
        assert_eq!(FileVaultV2Header::import(&bytes)?, header);
        Ok(())
    }
}
