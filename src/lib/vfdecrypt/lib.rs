//! FileVault v2 (`encrcdsa`) containers as a [`VirtualIo`] layer.
//!
//! The payload is split into `blockSize` chunks, each encrypted on its own
//! with AES-128-CBC. One decrypted chunk is cached; writes dirty it and it is
//! re-encrypted when another chunk is loaded or the container is flushed.

use hfsplus::VirtualIo;
use log::{debug, info, trace};
use rayon::prelude::*;

mod codec;
mod header;

pub use crate::codec::{ChunkCipher, FileVaultKey};
pub use crate::header::{FILEVAULT_V2_SIGNATURE, FileVaultV2Header, HEADER_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not a FileVault v2 container")]
    BadSignature,
    #[error("unsupported FileVault version {0}")]
    UnsupportedVersion(u32),
    #[error("key must be 72 hex digits (AES-128 key followed by HMAC-SHA1 key)")]
    BadKey,
    #[error("chunk length is not a multiple of the cipher block size")]
    Cipher,
    #[error(transparent)]
    Hfs(#[from] hfsplus::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<Error> for hfsplus::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Hfs(e) => e,
            e => hfsplus::Error::InvalidData(e.to_string()),
        }
    }
}

/// Chunks decrypted per batch by [`FileVault::decrypt_all`].
const DECRYPT_BATCH: usize = 256;

#[derive(Debug, Default)]
struct ChunkCache {
    index: Option<u32>,
    data: Vec<u8>,
    dirty: bool,
}

impl ChunkCache {
    fn contains(&self, chunk: u32) -> bool {
        self.index == Some(chunk)
    }
}

/// Returns whether `io` starts with the FileVault v2 signature.
pub fn is_filevault<IO: VirtualIo + ?Sized>(io: &mut IO) -> hfsplus::Result<bool> {
    let mut signature = [0u8; 8];
    if io.size()? < signature.len() as u64 {
        return Ok(false);
    }
    io.read_exact_at(0, &mut signature)?;
    Ok(u64::from_be_bytes(signature) == FILEVAULT_V2_SIGNATURE)
}

pub struct FileVault<IO: VirtualIo> {
    io: IO,
    header: FileVaultV2Header,
    cipher: ChunkCipher,
    cache: ChunkCache,
    header_dirty: bool,
}

impl<IO: VirtualIo> FileVault<IO> {
    pub fn open(mut io: IO, key: &FileVaultKey) -> Result<Self> {
        if !is_filevault(&mut io)? {
            return Err(Error::BadSignature);
        }
        let mut bytes = vec![0u8; HEADER_SIZE];
        io.read_exact_at(0, &mut bytes)?;
        let header = FileVaultV2Header::import(&bytes)?;
        if header.version != 2 {
            return Err(Error::UnsupportedVersion(header.version));
        }
        check_block_size(header.block_size)?;
        info!(
            "FileVault v2: {} bytes in {}-byte chunks at offset {}",
            header.data_size, header.block_size, header.data_offset
        );
        Ok(Self {
            io,
            cipher: ChunkCipher::new(key)?,
            cache: ChunkCache {
                data: vec![0; header.block_size as usize],
                ..Default::default()
            },
            header,
            header_dirty: false,
        })
    }

    /// Starts an empty container on `io`, writing a fresh header.
    pub fn create(mut io: IO, key: &FileVaultKey, block_size: u32) -> Result<Self> {
        check_block_size(block_size)?;
        let data_offset = (HEADER_SIZE as u64).div_ceil(block_size as u64) * block_size as u64;
        let header = FileVaultV2Header::new(block_size, data_offset);
        io.write_all_at(0, &header.export()?)?;
        debug!("created FileVault v2 container, data at {data_offset}");
        Ok(Self {
            io,
            cipher: ChunkCipher::new(key)?,
            cache: ChunkCache {
                data: vec![0; block_size as usize],
                ..Default::default()
            },
            header,
            header_dirty: false,
        })
    }

    pub fn header(&self) -> &FileVaultV2Header {
        &self.header
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub fn data_size(&self) -> u64 {
        self.header.data_size
    }

    fn chunk_offset(&self, chunk: u32) -> u64 {
        self.header.data_offset + chunk as u64 * self.header.block_size as u64
    }

    /// Number of whole chunks present on the underlying device.
    fn chunks_on_disk(&mut self) -> Result<u64> {
        let size = self.io.size()?;
        Ok(size.saturating_sub(self.header.data_offset) / self.header.block_size as u64)
    }

    fn flush_chunk(&mut self) -> Result<()> {
        let Some(index) = self.cache.index else {
            return Ok(());
        };
        if !self.cache.dirty {
            return Ok(());
        }
        // Chunks skipped over would otherwise decrypt from the zero bytes
        // the device is extended with.
        let on_disk = self.chunks_on_disk()?;
        if on_disk < index as u64 {
            let zeros = vec![0u8; self.header.block_size as usize];
            for hole in on_disk as u32..index {
                let mut encrypted = zeros.clone();
                self.cipher.encrypt_chunk(hole, &mut encrypted)?;
                let offset = self.chunk_offset(hole);
                self.io.write_all_at(offset, &encrypted)?;
            }
            debug!("filled chunks {on_disk}..{index} with zeros");
        }
        let mut encrypted = self.cache.data.clone();
        self.cipher.encrypt_chunk(index, &mut encrypted)?;
        let offset = self.chunk_offset(index);
        self.io.write_all_at(offset, &encrypted)?;
        self.cache.dirty = false;
        debug!("flushed chunk {index}");
        Ok(())
    }

    fn load_chunk(&mut self, chunk: u32) -> Result<()> {
        if self.cache.contains(chunk) {
            return Ok(());
        }
        self.flush_chunk()?;
        if (chunk as u64) < self.chunks_on_disk()? {
            let offset = self.chunk_offset(chunk);
            self.io.read_exact_at(offset, &mut self.cache.data)?;
            self.cipher.decrypt_chunk(chunk, &mut self.cache.data)?;
        } else {
            self.cache.data.fill(0);
        }
        self.cache.index = Some(chunk);
        trace!("cached chunk {chunk}");
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.flush_chunk()?;
        if self.header_dirty {
            self.io.write_all_at(0, &self.header.export()?)?;
            self.header_dirty = false;
            debug!("rewrote FileVault header, data size {}", self.header.data_size);
        }
        self.io.flush()?;
        Ok(())
    }

    /// Flushes the cached chunk and the header, and releases the device.
    pub fn close(mut self) -> Result<IO> {
        self.sync()?;
        Ok(self.io)
    }

    /// Decrypts the whole payload into `sink` at offset 0, fanning chunk
    /// decryption out over the rayon pool. Returns the bytes written.
    pub fn decrypt_all<S: VirtualIo + ?Sized>(&mut self, sink: &mut S) -> Result<u64> {
        self.sync()?;
        let block_size = self.header.block_size as usize;
        let data_size = self.header.data_size;
        let total = data_size.div_ceil(block_size as u64);
        let on_disk = self.chunks_on_disk()?;
        let mut buf = vec![0u8; block_size * DECRYPT_BATCH];
        let mut chunk = 0u64;
        while chunk < total {
            let count = core::cmp::min(DECRYPT_BATCH as u64, total - chunk) as usize;
            let present = on_disk.saturating_sub(chunk).min(count as u64) as usize;
            let batch = &mut buf[..count * block_size];
            batch.fill(0);
            if present > 0 {
                let offset = self.chunk_offset(chunk as u32);
                self.io
                    .read_exact_at(offset, &mut batch[..present * block_size])?;
            }
            let cipher = &self.cipher;
            let first = chunk as u32;
            batch[..present * block_size]
                .par_chunks_mut(block_size)
                .enumerate()
                .try_for_each(|(i, data)| cipher.decrypt_chunk(first + i as u32, data))?;

            let start = chunk * block_size as u64;
            let len = core::cmp::min(batch.len() as u64, data_size - start) as usize;
            sink.write_all_at(start, &batch[..len])?;
            chunk += count as u64;
        }
        debug!("decrypted {total} chunks");
        Ok(data_size)
    }
}

fn check_block_size(block_size: u32) -> Result<()> {
    if block_size == 0 || block_size % 16 != 0 {
        return Err(Error::Hfs(hfsplus::Error::InvalidData(format!(
            "FileVault block size {block_size} is not a multiple of 16"
        ))));
    }
    Ok(())
}

impl<IO: VirtualIo> VirtualIo for FileVault<IO> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> hfsplus::Result<usize> {
        if offset >= self.header.data_size {
            return Ok(0);
        }
        let len = core::cmp::min(buf.len() as u64, self.header.data_size - offset) as usize;
        let block_size = self.header.block_size as u64;
        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let chunk = (pos / block_size) as u32;
            let in_chunk = (pos % block_size) as usize;
            self.load_chunk(chunk)?;
            let n = core::cmp::min(len - done, block_size as usize - in_chunk);
            buf[done..done + n].copy_from_slice(&self.cache.data[in_chunk..in_chunk + n]);
            done += n;
        }
        Ok(len)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> hfsplus::Result<usize> {
        let block_size = self.header.block_size as u64;
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let chunk = (pos / block_size) as u32;
            let in_chunk = (pos % block_size) as usize;
            self.load_chunk(chunk)?;
            let n = core::cmp::min(buf.len() - done, block_size as usize - in_chunk);
            self.cache.data[in_chunk..in_chunk + n].copy_from_slice(&buf[done..done + n]);
            self.cache.dirty = true;
            done += n;
        }
        let end = offset + buf.len() as u64;
        if end > self.header.data_size {
            self.header.data_size = end;
            self.header_dirty = true;
        }
        Ok(buf.len())
    }

    fn size(&mut self) -> hfsplus::Result<u64> {
        Ok(self.header.data_size)
    }

    fn flush(&mut self) -> hfsplus::Result<()> {
        Ok(self.sync()?)
    }
}
