//! Read access to the decompressed contents of a UDIF image.

use {
    crate::{
        BlkxTable, ChunkType, DmgError, KolyTrailer, ResourceDirectory, Result, SECTOR_SIZE, adc,
        cache::RunCache,
    },
    flate2::bufread::ZlibDecoder,
    hfsplus::{VioStream, VirtualIo},
    log::{debug, info, trace},
    std::io::Read,
};

/// A UDIF image as a flat, read-only device. One run is decompressed at a
/// time; zero and ignored runs are served without touching the cache.
pub struct DmgFile<IO: VirtualIo> {
    io: IO,
    koly: KolyTrailer,
    resources: ResourceDirectory,
    tables: Vec<BlkxTable>,
    size: u64,
    cache: RunCache,
    compressed: Vec<u8>,
}

impl<IO: VirtualIo> DmgFile<IO> {
    pub fn open(mut io: IO) -> Result<Self> {
        let koly = KolyTrailer::read_from(&mut VioStream::new(&mut io))?;
        let resources = ResourceDirectory::read_from(&mut io, &koly)?;
        let mut tables: Vec<BlkxTable> = resources
            .blkx_tables()?
            .into_iter()
            .map(|(_, table)| table)
            .collect();
        let image_size = io.size()?;
        for table in &tables {
            table.check_data(image_size)?;
        }
        tables.sort_by_key(|t| t.sector_number);
        let size = tables.iter().map(BlkxTable::end_sector).max().unwrap_or(0) * SECTOR_SIZE;
        info!(
            "udif image: {} blkx tables, {} sectors",
            tables.len(),
            size / SECTOR_SIZE
        );
        Ok(Self {
            io,
            koly,
            resources,
            tables,
            size,
            cache: RunCache::new(),
            compressed: vec![],
        })
    }

    pub fn koly(&self) -> &KolyTrailer {
        &self.koly
    }

    pub fn resources(&self) -> &ResourceDirectory {
        &self.resources
    }

    /// Tables in sector order.
    pub fn tables(&self) -> &[BlkxTable] {
        &self.tables
    }

    pub fn into_inner(self) -> IO {
        self.io
    }

    /// Table and run holding `sector`.
    fn locate(&self, sector: u64) -> Option<(usize, usize)> {
        let t = self.tables.partition_point(|t| t.end_sector() <= sector);
        let table = self.tables.get(t)?;
        if sector < table.sector_number {
            return None;
        }
        let run = table.find_chunk(sector - table.sector_number)?;
        Some((t, run))
    }

    fn cache_run(&mut self, t: usize, r: usize) -> Result<()> {
        let table = &self.tables[t];
        let chunk = table.chunks[r];
        let ty = chunk.ty().ok_or(DmgError::UnknownRun(chunk.ty))?;
        let start = (table.sector_number + chunk.sector_number) * SECTOR_SIZE;
        let len = (chunk.sector_count * SECTOR_SIZE) as usize;
        let source = table.data_offset + chunk.compressed_offset;
        trace!(
            "caching {ty:?} run at sector {} ({} sectors)",
            start / SECTOR_SIZE,
            chunk.sector_count
        );
        if matches!(ty, ChunkType::Bzlib | ChunkType::Lzfse) {
            return Err(DmgError::UnsupportedRun(ty));
        }

        self.compressed.resize(chunk.compressed_length as usize, 0);
        self.io.read_exact_at(source, &mut self.compressed)?;
        let compressed = &self.compressed[..];
        self.cache
            .refill(start, len, |out| decode_run(ty, compressed, out))
    }

    fn read_run(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if !self.cache.contains(pos) {
            let sector = pos / SECTOR_SIZE;
            let Some((t, r)) = self.locate(sector) else {
                // not described by any table
                let next = self
                    .tables
                    .iter()
                    .map(|t| t.sector_number * SECTOR_SIZE)
                    .find(|&s| s > pos)
                    .unwrap_or(self.size);
                let n = buf.len().min((next - pos) as usize);
                buf[..n].fill(0);
                return Ok(n);
            };
            let table = &self.tables[t];
            let chunk = table.chunks[r];
            if matches!(chunk.ty(), Some(ChunkType::Zero | ChunkType::Ignore)) {
                let end = (table.sector_number + chunk.sector_number + chunk.sector_count)
                    * SECTOR_SIZE;
                let n = buf.len().min((end - pos) as usize);
                buf[..n].fill(0);
                return Ok(n);
            }
            self.cache_run(t, r)?;
        }
        let cached = self.cache.slice(pos);
        let n = buf.len().min(cached.len());
        buf[..n].copy_from_slice(&cached[..n]);
        Ok(n)
    }

    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let len = buf.len().min((self.size - offset) as usize);
        let mut done = 0;
        while done < len {
            done += self.read_run(offset + done as u64, &mut buf[done..len])?;
        }
        Ok(len)
    }
}

/// Expands one stored run into `out`, which is zeroed and sized to the run.
pub(crate) fn decode_run(ty: ChunkType, compressed: &[u8], out: &mut [u8]) -> Result<()> {
    match ty {
        ChunkType::Zero | ChunkType::Ignore | ChunkType::Comment | ChunkType::Term => Ok(()),
        ChunkType::Raw => {
            let n = compressed.len().min(out.len());
            out[..n].copy_from_slice(&compressed[..n]);
            Ok(())
        }
        ChunkType::Adc => adc::decompress(compressed, out).map(|_| ()),
        ChunkType::Zlib => inflate(compressed, out),
        ChunkType::Bzlib | ChunkType::Lzfse => Err(DmgError::UnsupportedRun(ty)),
    }
}

/// Inflates one zlib run. Output past the end of the stream stays zero.
fn inflate(compressed: &[u8], out: &mut [u8]) -> Result<()> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut filled = 0;
    while filled < out.len() {
        match decoder.read(&mut out[filled..])? {
            0 => {
                debug!("zlib run ended {} bytes short", out.len() - filled);
                break;
            }
            n => filled += n,
        }
    }
    Ok(())
}

impl<IO: VirtualIo> VirtualIo for DmgFile<IO> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> hfsplus::Result<usize> {
        Ok(self.read(offset, buf)?)
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> hfsplus::Result<usize> {
        Err(hfsplus::Error::ReadOnly)
    }

    fn size(&mut self) -> hfsplus::Result<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{BlkxChunk, UdifChecksum, adc::tests::compress as adc_compress},
        flate2::{Compression, write::ZlibEncoder},
        hfsplus::MemIo,
        std::io::{Cursor, Write},
    };

    /// Deterministic data that does not compress.
    pub(crate) fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut x = seed | 1;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                x as u8
            })
            .collect()
    }

    fn sectors(count: u64, seed: u8) -> Vec<u8> {
        (0..count * SECTOR_SIZE)
            .map(|i| ((i / SECTOR_SIZE) as u8).wrapping_mul(31) ^ seed ^ (i % 7) as u8)
            .collect()
    }

    /// Builds a single-table image from `(type, plaintext)` runs.
    fn image(runs: &[(ChunkType, &[u8])]) -> anyhow::Result<MemIo> {
        let mut data_fork = vec![];
        let total: u64 = runs.iter().map(|(_, d)| d.len() as u64 / SECTOR_SIZE).sum();
        let mut table = BlkxTable::new(0, 0, total);
        let mut sector = 0;
        for (ty, plain) in runs {
            let count = plain.len() as u64 / SECTOR_SIZE;
            let stored = match ty {
                ChunkType::Zlib => {
                    let mut encoder = ZlibEncoder::new(vec![], Compression::best());
                    encoder.write_all(plain)?;
                    encoder.finish()?
                }
                ChunkType::Adc => adc_compress(plain),
                ChunkType::Raw => plain.to_vec(),
                _ => vec![],
            };
            table.add_chunk(BlkxChunk::new(
                *ty,
                sector,
                count,
                data_fork.len() as u64,
                stored.len() as u64,
            ));
            data_fork.extend_from_slice(&stored);
            sector += count;
        }
        table.add_chunk(BlkxChunk::term(sector, data_fork.len() as u64));
        wrap(&table, data_fork)
    }

    /// Appends the resource directory and trailer for `table` to `data_fork`.
    fn wrap(table: &BlkxTable, mut data_fork: Vec<u8>) -> anyhow::Result<MemIo> {
        let mut table = table.clone();
        table.checksum = UdifChecksum::crc32(0);
        let mut resources = ResourceDirectory::new();
        resources.insert("blkx", 0, "whole disk (unknown partition : 0)", table.to_bytes()?, 0x50);
        let xml = resources.to_xml();
        let koly = KolyTrailer::new(
            data_fork.len() as u64,
            table.sector_count,
            data_fork.len() as u64,
            xml.len() as u64,
            0,
            0,
        );
        data_fork.extend_from_slice(xml.as_bytes());
        koly.write_to(&mut data_fork)?;
        Ok(MemIo::new(data_fork))
    }

    #[test]
    fn reads_across_zlib_runs() -> anyhow::Result<()> {
        let plain = [sectors(100, 1), sectors(150, 2), sectors(50, 3)];
        let io = image(&[
            (ChunkType::Zlib, &plain[0][..]),
            (ChunkType::Zlib, &plain[1][..]),
            (ChunkType::Zlib, &plain[2][..]),
        ])?;
        let all = plain.concat();
        let mut dmg = DmgFile::open(io)?;
        assert_eq!(dmg.size()?, 300 * SECTOR_SIZE);

        let mut buf = vec![0; 20 * SECTOR_SIZE as usize];
        dmg.read_exact_at(90 * SECTOR_SIZE, &mut buf)?;
        assert_eq!(buf, all[90 * 512..110 * 512]);
        assert_eq!(
            dmg.cache.range(),
            Some(100 * SECTOR_SIZE..250 * SECTOR_SIZE)
        );

        let mut last = [0; 512];
        dmg.read_exact_at(299 * SECTOR_SIZE, &mut last)?;
        assert_eq!(last[..], all[299 * 512..]);
        assert!(dmg.cache.contains(299 * SECTOR_SIZE));
        assert!(!dmg.cache.contains(90 * SECTOR_SIZE));

        assert_eq!(dmg.read_at(300 * SECTOR_SIZE, &mut last)?, 0);
        Ok(())
    }

    #[test]
    fn mixed_runs_read_back() -> anyhow::Result<()> {
        let zeros = vec![0; 40 * SECTOR_SIZE as usize];
        let mut text = vec![];
        while text.len() < 30 * SECTOR_SIZE as usize {
            text.extend_from_slice(b"Apple_HFS partition map entry ");
        }
        text.truncate(30 * SECTOR_SIZE as usize);
        let raw = noise(10 * SECTOR_SIZE as usize, 9);
        let io = image(&[
            (ChunkType::Adc, &text[..]),
            (ChunkType::Ignore, &zeros[..]),
            (ChunkType::Raw, &raw[..]),
            (ChunkType::Zero, &zeros[..]),
        ])?;
        let expected = [text.clone(), zeros.clone(), raw, zeros].concat();
        let mut dmg = DmgFile::open(io)?;

        let mut whole = vec![0; expected.len()];
        dmg.read_exact_at(0, &mut whole)?;
        assert_eq!(whole, expected);

        let mut pieces = vec![];
        let mut offset = 0;
        let mut buf = [0; 1000];
        loop {
            let n = dmg.read_at(offset, &mut buf)?;
            if n == 0 {
                break;
            }
            pieces.extend_from_slice(&buf[..n]);
            offset += n as u64;
        }
        assert_eq!(pieces, expected);
        Ok(())
    }

    #[test]
    fn writes_are_rejected() -> anyhow::Result<()> {
        let plain = sectors(4, 5);
        let mut dmg = DmgFile::open(image(&[(ChunkType::Raw, &plain[..])])?)?;
        assert!(matches!(
            dmg.write_at(0, b"data"),
            Err(hfsplus::Error::ReadOnly)
        ));
        Ok(())
    }

    #[test]
    fn unsupported_runs_fail_reads() -> anyhow::Result<()> {
        let plain = sectors(4, 5);
        let mut dmg = DmgFile::open(image(&[(ChunkType::Bzlib, &plain[..])])?)?;
        let mut buf = [0; 512];
        assert!(dmg.read_at(0, &mut buf).is_err());
        assert!(matches!(
            dmg.read(0, &mut buf),
            Err(DmgError::UnsupportedRun(ChunkType::Bzlib))
        ));
        Ok(())
    }

    #[test]
    fn rejects_images_without_trailer() {
        let io = MemIo::new(vec![0; 4096]);
        assert!(matches!(DmgFile::open(io), Err(DmgError::BadKoly(0))));
    }

    #[test]
    fn rejects_property_list_past_the_end() -> anyhow::Result<()> {
        let plain = sectors(2, 9);
        let mut bytes = image(&[(ChunkType::Raw, &plain[..])])?.into_inner();
        let at = bytes.len() - 512;
        for (offset, length) in [(0, u64::MAX), (u64::MAX, 2), (at as u64, 4096)] {
            let mut koly = KolyTrailer::read_from(&mut Cursor::new(&bytes))?;
            koly.plist_offset = offset;
            koly.plist_length = length;
            bytes.truncate(at);
            koly.write_to(&mut bytes)?;
            assert!(matches!(
                DmgFile::open(MemIo::new(bytes.clone())),
                Err(DmgError::Corruption(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn rejects_tables_past_the_device_limit() -> anyhow::Result<()> {
        let mut table = BlkxTable::new(0, 0, 1 << 56);
        table.add_chunk(BlkxChunk::new(ChunkType::Zero, 0, 1 << 56, 0, 0));
        table.add_chunk(BlkxChunk::term(1 << 56, 0));
        assert!(matches!(
            DmgFile::open(wrap(&table, vec![])?),
            Err(DmgError::BadBlkx(_))
        ));
        Ok(())
    }

    #[test]
    fn rejects_runs_stored_past_the_end() -> anyhow::Result<()> {
        let mut table = BlkxTable::new(0, 0, 4);
        table.add_chunk(BlkxChunk::new(ChunkType::Zlib, 0, 4, 0, 1 << 40));
        table.add_chunk(BlkxChunk::term(4, 1 << 40));
        assert!(matches!(
            DmgFile::open(wrap(&table, vec![0; 64])?),
            Err(DmgError::Corruption(_))
        ));

        table.chunks[0].compressed_length = 16;
        table.chunks[0].compressed_offset = u64::MAX - 8;
        assert!(matches!(
            DmgFile::open(wrap(&table, vec![0; 64])?),
            Err(DmgError::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn oversized_runs_fail_to_open() -> anyhow::Result<()> {
        let mut table = BlkxTable::new(0, 0, 1 << 30);
        table.add_chunk(BlkxChunk::new(ChunkType::Raw, 0, 1 << 30, 0, 64));
        table.add_chunk(BlkxChunk::term(1 << 30, 64));
        assert!(matches!(
            DmgFile::open(wrap(&table, vec![0; 64])?),
            Err(DmgError::BadBlkx(_))
        ));
        Ok(())
    }
}
