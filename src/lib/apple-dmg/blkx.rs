use {
    crate::{DmgError, Result, UdifChecksum},
    byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
    std::io::{Read, Write},
};

pub const BLKX_SIGNATURE: u32 = 0x6D69_7368;
pub const SECTOR_SIZE: u64 = 512;

pub const DDM_DESCRIPTOR: u32 = 0xFFFF_FFFF;
pub const ENTIRE_DEVICE_DESCRIPTOR: u32 = 0xFFFF_FFFE;

/// Sectors the decompressor must be able to hold for one run.
pub const DECOMPRESS_BUFFER_REQUESTED: u32 = 0x208;

const TABLE_HEADER_SIZE: usize = 204;
const CHUNK_SIZE: usize = 40;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ChunkType {
    Zero = 0,
    Raw = 1,
    Ignore = 2,
    Comment = 0x7FFF_FFFE,
    Adc = 0x8000_0004,
    Zlib = 0x8000_0005,
    Bzlib = 0x8000_0006,
    Lzfse = 0x8000_0007,
    Term = 0xFFFF_FFFF,
}

impl ChunkType {
    pub fn from_u32(ty: u32) -> Option<Self> {
        Some(match ty {
            0 => Self::Zero,
            1 => Self::Raw,
            2 => Self::Ignore,
            0x7FFF_FFFE => Self::Comment,
            0x8000_0004 => Self::Adc,
            0x8000_0005 => Self::Zlib,
            0x8000_0006 => Self::Bzlib,
            0x8000_0007 => Self::Lzfse,
            0xFFFF_FFFF => Self::Term,
            _ => return None,
        })
    }
}

/// One run of a blkx table. Sector numbers are relative to the table's first
/// sector and offsets to its `data_offset`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlkxChunk {
    pub ty: u32,
    pub comment: u32,
    pub sector_number: u64,
    pub sector_count: u64,
    pub compressed_offset: u64,
    pub compressed_length: u64,
}

impl BlkxChunk {
    pub fn new(
        ty: ChunkType,
        sector_number: u64,
        sector_count: u64,
        compressed_offset: u64,
        compressed_length: u64,
    ) -> Self {
        Self {
            ty: ty as u32,
            comment: 0,
            sector_number,
            sector_count,
            compressed_offset,
            compressed_length,
        }
    }

    pub fn term(sector_number: u64, compressed_offset: u64) -> Self {
        Self::new(ChunkType::Term, sector_number, 0, compressed_offset, 0)
    }

    pub fn ty(&self) -> Option<ChunkType> {
        ChunkType::from_u32(self.ty)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            ty: r.read_u32::<BigEndian>()?,
            comment: r.read_u32::<BigEndian>()?,
            sector_number: r.read_u64::<BigEndian>()?,
            sector_count: r.read_u64::<BigEndian>()?,
            compressed_offset: r.read_u64::<BigEndian>()?,
            compressed_length: r.read_u64::<BigEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(self.ty)?;
        w.write_u32::<BigEndian>(self.comment)?;
        w.write_u64::<BigEndian>(self.sector_number)?;
        w.write_u64::<BigEndian>(self.sector_count)?;
        w.write_u64::<BigEndian>(self.compressed_offset)?;
        w.write_u64::<BigEndian>(self.compressed_length)?;
        Ok(())
    }
}

/// A `mish` block map describing one partition of the image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlkxTable {
    pub version: u32,
    pub sector_number: u64,
    pub sector_count: u64,
    pub data_offset: u64,
    pub buffers_needed: u32,
    pub block_descriptor: u32,
    pub reserved: [u32; 6],
    pub checksum: UdifChecksum,
    pub chunks: Vec<BlkxChunk>,
}

impl BlkxTable {
    pub fn new(block_descriptor: u32, sector_number: u64, sector_count: u64) -> Self {
        Self {
            version: 1,
            sector_number,
            sector_count,
            data_offset: 0,
            buffers_needed: DECOMPRESS_BUFFER_REQUESTED,
            block_descriptor,
            reserved: [0; 6],
            checksum: UdifChecksum::default(),
            chunks: vec![],
        }
    }

    pub fn add_chunk(&mut self, chunk: BlkxChunk) {
        self.chunks.push(chunk);
    }

    /// Parses a table and checks that its runs tile `[0, sector_count)` and
    /// end with a terminator.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TABLE_HEADER_SIZE {
            return Err(DmgError::BadBlkx(format!("{} byte table", bytes.len())));
        }
        let r = &mut &bytes[..];
        let signature = r.read_u32::<BigEndian>()?;
        if signature != BLKX_SIGNATURE {
            return Err(DmgError::BadBlkx(format!("signature {signature:#x}")));
        }
        let version = r.read_u32::<BigEndian>()?;
        let sector_number = r.read_u64::<BigEndian>()?;
        let sector_count = r.read_u64::<BigEndian>()?;
        let data_offset = r.read_u64::<BigEndian>()?;
        let buffers_needed = r.read_u32::<BigEndian>()?;
        let block_descriptor = r.read_u32::<BigEndian>()?;
        let mut reserved = [0; 6];
        r.read_u32_into::<BigEndian>(&mut reserved)?;
        let checksum = UdifChecksum::read_from(r)?;
        let count = r.read_u32::<BigEndian>()? as usize;
        if r.len() / CHUNK_SIZE < count {
            return Err(DmgError::BadBlkx(format!(
                "{count} runs but only {} bytes",
                r.len()
            )));
        }
        let mut chunks = Vec::with_capacity(count);
        for _ in 0..count {
            chunks.push(BlkxChunk::read_from(r)?);
        }
        let table = Self {
            version,
            sector_number,
            sector_count,
            data_offset,
            buffers_needed,
            block_descriptor,
            reserved,
            checksum,
            chunks,
        };
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<()> {
        let end = self.sector_number.checked_add(self.sector_count);
        if end.and_then(|end| end.checked_mul(SECTOR_SIZE)).is_none() {
            return Err(DmgError::BadBlkx(format!(
                "{} sectors at sector {} overflow the device",
                self.sector_count, self.sector_number
            )));
        }
        let max_run = u64::from(self.buffers_needed.max(DECOMPRESS_BUFFER_REQUESTED));
        let mut next = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.sector_count == 0 {
                continue;
            }
            if chunk.sector_number != next {
                return Err(DmgError::BadBlkx(format!(
                    "run {i} starts at sector {} instead of {next}",
                    chunk.sector_number
                )));
            }
            let decoded = !matches!(
                chunk.ty(),
                Some(ChunkType::Zero | ChunkType::Ignore | ChunkType::Comment | ChunkType::Term)
            );
            if decoded && chunk.sector_count > max_run {
                return Err(DmgError::BadBlkx(format!(
                    "run {i} holds {} sectors, buffer is {max_run}",
                    chunk.sector_count
                )));
            }
            next = next.checked_add(chunk.sector_count).ok_or_else(|| {
                DmgError::BadBlkx(format!("run {i} overflows the sector count"))
            })?;
        }
        if next > self.sector_count {
            return Err(DmgError::BadBlkx(format!(
                "runs cover {next} sectors of {}",
                self.sector_count
            )));
        }
        match self.chunks.last().and_then(BlkxChunk::ty) {
            Some(ChunkType::Term) => Ok(()),
            _ => Err(DmgError::BadBlkx(String::from("missing terminator run"))),
        }
    }

    /// Checks that every stored run lies within the first `image_size` bytes
    /// of the image.
    pub fn check_data(&self, image_size: u64) -> Result<()> {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.compressed_length == 0 {
                continue;
            }
            let end = self
                .data_offset
                .checked_add(chunk.compressed_offset)
                .and_then(|start| start.checked_add(chunk.compressed_length));
            match end {
                Some(end) if end <= image_size => {}
                _ => {
                    return Err(DmgError::Corruption(format!(
                        "run {i} stores {} bytes at {:#x}, image is {image_size} bytes",
                        chunk.compressed_length,
                        self.data_offset.wrapping_add(chunk.compressed_offset)
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(BLKX_SIGNATURE)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_u64::<BigEndian>(self.sector_number)?;
        w.write_u64::<BigEndian>(self.sector_count)?;
        w.write_u64::<BigEndian>(self.data_offset)?;
        w.write_u32::<BigEndian>(self.buffers_needed)?;
        w.write_u32::<BigEndian>(self.block_descriptor)?;
        for word in self.reserved {
            w.write_u32::<BigEndian>(word)?;
        }
        self.checksum.write_to(w)?;
        w.write_u32::<BigEndian>(self.chunks.len() as u32)?;
        for chunk in &self.chunks {
            chunk.write_to(w)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(TABLE_HEADER_SIZE + self.chunks.len() * CHUNK_SIZE);
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Index of the run holding `sector`, relative to the table start.
    pub fn find_chunk(&self, sector: u64) -> Option<usize> {
        let idx = self
            .chunks
            .partition_point(|c| c.sector_number.saturating_add(c.sector_count) <= sector);
        let chunk = self.chunks.get(idx)?;
        (chunk.sector_number <= sector && sector - chunk.sector_number < chunk.sector_count)
            .then_some(idx)
    }

    pub fn end_sector(&self) -> u64 {
        self.sector_number.saturating_add(self.sector_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BlkxTable {
        let mut table = BlkxTable::new(1, 64, 300);
        table.add_chunk(BlkxChunk::new(ChunkType::Comment, 0, 0, 0, 0));
        table.add_chunk(BlkxChunk::new(ChunkType::Zlib, 0, 100, 0, 40));
        table.add_chunk(BlkxChunk::new(ChunkType::Ignore, 100, 150, 40, 0));
        table.add_chunk(BlkxChunk::new(ChunkType::Raw, 250, 50, 40, 50 * 512));
        table.add_chunk(BlkxChunk::term(300, 40 + 50 * 512));
        table.checksum = UdifChecksum::crc32(0x1234_5678);
        table
    }

    #[test]
    fn table_bytes() -> anyhow::Result<()> {
        let table = table();
        let bytes = table.to_bytes()?;
        assert_eq!(bytes.len(), 204 + 5 * 40);
        assert_eq!(&bytes[..4], b"mish");
        assert_eq!(&bytes[200..204], &5u32.to_be_bytes());
        assert_eq!(BlkxTable::read_from(&bytes)?, table);
        Ok(())
    }

    #[test]
    fn find_chunk_skips_empty_runs() {
        let table = table();
        assert_eq!(table.find_chunk(0), Some(1));
        assert_eq!(table.find_chunk(99), Some(1));
        assert_eq!(table.find_chunk(100), Some(2));
        assert_eq!(table.find_chunk(299), Some(3));
        assert_eq!(table.find_chunk(300), None);
    }

    #[test]
    fn rejects_gaps_and_missing_terminator() -> anyhow::Result<()> {
        let mut gap = table();
        gap.chunks[3].sector_number = 260;
        assert!(matches!(
            BlkxTable::read_from(&gap.to_bytes()?),
            Err(DmgError::BadBlkx(_))
        ));

        let mut open = table();
        open.chunks.pop();
        assert!(matches!(
            BlkxTable::read_from(&open.to_bytes()?),
            Err(DmgError::BadBlkx(_))
        ));

        let bytes = table().to_bytes()?;
        assert!(BlkxTable::read_from(&bytes[..bytes.len() - 8]).is_err());
        Ok(())
    }

    #[test]
    fn rejects_overflowing_runs() -> anyhow::Result<()> {
        let mut wide = BlkxTable::new(1, 0, 1 << 56);
        wide.add_chunk(BlkxChunk::new(ChunkType::Zero, 0, 1 << 56, 0, 0));
        wide.add_chunk(BlkxChunk::term(1 << 56, 0));
        assert!(matches!(
            BlkxTable::read_from(&wide.to_bytes()?),
            Err(DmgError::BadBlkx(_))
        ));

        let mut wrap = BlkxTable::new(1, 0, 16);
        wrap.add_chunk(BlkxChunk::new(ChunkType::Zero, 0, u64::MAX, 0, 0));
        wrap.add_chunk(BlkxChunk::new(ChunkType::Zero, u64::MAX, 2, 0, 0));
        wrap.add_chunk(BlkxChunk::term(1, 0));
        assert!(matches!(
            BlkxTable::read_from(&wrap.to_bytes()?),
            Err(DmgError::BadBlkx(_))
        ));
        Ok(())
    }

    #[test]
    fn bounds_decoded_runs_by_buffer_size() -> anyhow::Result<()> {
        let mut table = BlkxTable::new(1, 0, 0x1000);
        table.add_chunk(BlkxChunk::new(ChunkType::Zlib, 0, 0x1000, 0, 16));
        table.add_chunk(BlkxChunk::term(0x1000, 16));
        assert!(matches!(
            BlkxTable::read_from(&table.to_bytes()?),
            Err(DmgError::BadBlkx(_))
        ));

        table.buffers_needed = 0x1000;
        BlkxTable::read_from(&table.to_bytes()?)?;

        let mut zeros = BlkxTable::new(1, 0, 0x10_0000);
        zeros.add_chunk(BlkxChunk::new(ChunkType::Zero, 0, 0x10_0000, 0, 0));
        zeros.add_chunk(BlkxChunk::term(0x10_0000, 0));
        BlkxTable::read_from(&zeros.to_bytes()?)?;
        Ok(())
    }

    #[test]
    fn stored_runs_must_fit_the_image() {
        let table = table();
        assert!(table.check_data(40 + 50 * 512).is_ok());
        assert!(matches!(
            table.check_data(40 + 50 * 512 - 1),
            Err(DmgError::Corruption(_))
        ));

        let mut far = table;
        far.chunks[3].compressed_offset = u64::MAX;
        assert!(far.check_data(u64::MAX).is_err());
    }
}
