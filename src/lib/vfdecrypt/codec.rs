use aes::Aes128;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{Error, Result};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

pub const AES_KEY_SIZE: usize = 16;
pub const HMAC_KEY_SIZE: usize = 20;
const IV_SIZE: usize = 16;

/// The unwrapped container key: an AES-128 key followed by an HMAC-SHA1 key.
#[derive(Clone, PartialEq, Eq)]
pub struct FileVaultKey {
    pub aes: [u8; AES_KEY_SIZE],
    pub hmac: [u8; HMAC_KEY_SIZE],
}

impl FileVaultKey {
    /// Parses the 72 hex digit form used by `vfdecrypt -k`.
    pub fn from_hex(key: &str) -> Result<Self> {
        let key = key.trim();
        if key.len() != 2 * (AES_KEY_SIZE + HMAC_KEY_SIZE) || !key.is_ascii() {
            return Err(Error::BadKey);
        }
        let mut bytes = [0u8; AES_KEY_SIZE + HMAC_KEY_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&key[i * 2..i * 2 + 2], 16).map_err(|_| Error::BadKey)?;
        }
        let mut aes = [0u8; AES_KEY_SIZE];
        let mut hmac = [0u8; HMAC_KEY_SIZE];
        aes.copy_from_slice(&bytes[..AES_KEY_SIZE]);
        hmac.copy_from_slice(&bytes[AES_KEY_SIZE..]);
        Ok(Self { aes, hmac })
    }
}

impl core::fmt::Debug for FileVaultKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FileVaultKey(..)")
    }
}

/// Per-chunk AES-128-CBC. Every chunk is encrypted on its own, with the IV
/// taken from HMAC-SHA1 over its big-endian index.
#[derive(Clone)]
pub struct ChunkCipher {
    aes_key: [u8; AES_KEY_SIZE],
    hmac: Hmac<Sha1>,
}

impl ChunkCipher {
    pub fn new(key: &FileVaultKey) -> Result<Self> {
        let hmac = Hmac::<Sha1>::new_from_slice(&key.hmac).map_err(|_| Error::BadKey)?;
        Ok(Self {
            aes_key: key.aes,
            hmac,
        })
    }

    pub fn iv(&self, chunk: u32) -> [u8; IV_SIZE] {
        let mut mac = self.hmac.clone();
        mac.update(&chunk.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&digest[..IV_SIZE]);
        iv
    }

    pub fn decrypt_chunk(&self, chunk: u32, buf: &mut [u8]) -> Result<()> {
        let iv = self.iv(chunk);
        Aes128CbcDec::new_from_slices(&self.aes_key, &iv)
            .map_err(|_| Error::BadKey)?
            .decrypt_padded_mut::<NoPadding>(buf)
            .map_err(|_| Error::Cipher)?;
        Ok(())
    }

    pub fn encrypt_chunk(&self, chunk: u32, buf: &mut [u8]) -> Result<()> {
        let iv = self.iv(chunk);
        let len = buf.len();
        Aes128CbcEnc::new_from_slices(&self.aes_key, &iv)
            .map_err(|_| Error::BadKey)?
            .encrypt_padded_mut::<NoPadding>(buf, len)
            .map_err(|_| Error::Cipher)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = concat!(
        "000102030405060708090a0b0c0d0e0f",
        "101112131415161718191a1b1c1d1e1f20212223"
    );

    #[test]
    fn parse_hex_key() -> anyhow::Result<()> {
        let key = FileVaultKey::from_hex(KEY)?;
        assert_eq!(key.aes[15], 0x0f);
        assert_eq!(key.hmac[0], 0x10);
        assert_eq!(key.hmac[19], 0x23);
        assert!(matches!(FileVaultKey::from_hex("abcd"), Err(Error::BadKey)));
        let bad = KEY.replace('a', "g");
        assert!(matches!(FileVaultKey::from_hex(&bad), Err(Error::BadKey)));
        Ok(())
    }

    #[test]
    fn chunk_round_trip() -> anyhow::Result<()> {
        let cipher = ChunkCipher::new(&FileVaultKey::from_hex(KEY)?)?;
        let plain: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();

        let mut buf = plain.clone();
        cipher.encrypt_chunk(5, &mut buf)?;
        assert_ne!(buf, plain);

        let mut decrypted = buf.clone();
        cipher.decrypt_chunk(5, &mut decrypted)?;
        assert_eq!(decrypted, plain);

        let mut wrong_iv = buf.clone();
        cipher.decrypt_chunk(6, &mut wrong_iv)?;
        assert_ne!(wrong_iv, plain);
        Ok(())
    }

    #[test]
    fn ivs_differ_per_chunk() -> anyhow::Result<()> {
        let cipher = ChunkCipher::new(&FileVaultKey::from_hex(KEY)?)?;
        assert_ne!(cipher.iv(0), cipher.iv(1));
        assert_eq!(cipher.iv(9), cipher.iv(9));
        Ok(())
    }

    #[test]
    fn partial_blocks_are_rejected() -> anyhow::Result<()> {
        let cipher = ChunkCipher::new(&FileVaultKey::from_hex(KEY)?)?;
        let mut buf = [0u8; 20];
        assert!(matches!(cipher.decrypt_chunk(0, &mut buf), Err(Error::Cipher)));
        Ok(())
    }
}
