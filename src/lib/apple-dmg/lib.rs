// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use {
    crate::{
        checksum::{CHECKSUM_MKBLOCK, Checksum, Crc32, MkBlock, master_checksum},
        resources::write_xml,
    },
    flate2::{Compression, bufread::ZlibEncoder},
    hfsplus::{
        Cursor, HFSP_SIGNATURE, HFSPlusVolumeHeader, HFSX_SIGNATURE, SubIo, VirtualIo, Volume,
    },
    log::{debug, info},
    sha1::{Digest, Sha1},
    std::io::Read,
    vfdecrypt::FileVault,
};

pub mod adc;
pub mod base64;
mod blkx;
mod cache;
pub mod checksum;
mod config;
mod dmgfile;
mod koly;
mod partition;
mod resources;

pub use crate::{
    blkx::*, cache::RunCache, config::*, dmgfile::DmgFile, koly::*, partition::*, resources::*,
};

#[derive(Debug, thiserror::Error)]
pub enum DmgError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Hfs(#[from] hfsplus::Error),
    #[error("filevault: {0}")]
    FileVault(#[from] vfdecrypt::Error),
    #[error("bad koly signature {0:#010x}")]
    BadKoly(u32),
    #[error("bad blkx table: {0}")]
    BadBlkx(String),
    #[error("image has no blkx resources")]
    MissingBlkx,
    #[error("resource plist: {0}")]
    Plist(#[from] plist::Error),
    #[error("unknown run type {0:#010x}")]
    UnknownRun(u32),
    #[error("{0:?} runs are not supported")]
    UnsupportedRun(ChunkType),
    #[error("image is corrupt: {0}")]
    Corruption(String),
    #[error("compressed images are read-only")]
    ReadOnly,
    #[error("partition not found: {0}")]
    NoPartition(String),
    #[error("invalid options: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DmgError>;

impl From<DmgError> for hfsplus::Error {
    fn from(e: DmgError) -> Self {
        match e {
            DmgError::Hfs(e) => e,
            DmgError::ReadOnly => Self::ReadOnly,
            DmgError::Corruption(message) => Self::Corruption(message),
            e => Self::InvalidData(e.to_string()),
        }
    }
}

/// Reads `buf.len()` bytes at `offset`, zero filling past the end of `io`.
fn read_padded<R: VirtualIo + ?Sized>(io: &mut R, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match io.read_at(offset + done as u64, &mut buf[done..])? {
            0 => break,
            n => done += n,
        }
    }
    buf[done..].fill(0);
    Ok(())
}

fn detect_volume<R: VirtualIo + ?Sized>(
    io: &mut R,
    offset: u64,
    sectors: u64,
) -> Result<Option<HFSPlusVolumeHeader>> {
    if sectors * SECTOR_SIZE < 1024 + 512 {
        return Ok(None);
    }
    let mut bytes = [0u8; 512];
    read_padded(io, offset + 1024, &mut bytes)?;
    let header = HFSPlusVolumeHeader::import(&mut Cursor::new(&bytes[..]))?;
    Ok(matches!(header.signature, HFSP_SIGNATURE | HFSX_SIGNATURE).then_some(header))
}

/// Builds a UDIF image one partition at a time. Run data is written as it
/// is compressed; the resource directory and trailer follow in
/// [`DmgWriter::finish`].
pub struct DmgWriter<W: VirtualIo> {
    out: W,
    options: WriterOptions,
    resources: ResourceDirectory,
    table_checksums: Vec<UdifChecksum>,
    data_fork: Crc32,
    position: u64,
    sector_count: u64,
    image_variant: u32,
}

impl<W: VirtualIo> DmgWriter<W> {
    pub fn new(out: W, options: WriterOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            out,
            options,
            resources: ResourceDirectory::new(),
            table_checksums: vec![],
            data_fork: Crc32::new(),
            position: 0,
            sector_count: 0,
            image_variant: IMAGE_VARIANT_DEVICE,
        })
    }

    pub fn resources(&self) -> &ResourceDirectory {
        &self.resources
    }

    pub fn set_image_variant(&mut self, variant: u32) {
        self.image_variant = variant;
    }

    /// Compresses `count` sectors of `input`, starting at byte `offset`, into
    /// runs of at most `sectors_per_run` sectors. A run is stored raw when
    /// deflating it does not pay off. `observe` sees every uncompressed run.
    pub fn insert_blkx<R: VirtualIo + ?Sized>(
        &mut self,
        input: &mut R,
        offset: u64,
        first_sector: u64,
        count: u64,
        descriptor: u32,
        observe: &mut dyn FnMut(&[u8]),
    ) -> Result<BlkxTable> {
        let per_run = self.options.sectors_per_run;
        let mut table = BlkxTable::new(descriptor, first_sector, count);
        table.buffers_needed = DECOMPRESS_BUFFER_REQUESTED.max(per_run.min(u32::MAX as u64) as u32);
        let level = Compression::new(self.options.compression_level);
        let mut crc = Crc32::new();
        let mut run = vec![0; (per_run.min(count).max(1) * SECTOR_SIZE) as usize];
        let mut compressed = vec![];
        let mut sector = 0;
        while sector < count {
            let sectors = per_run.min(count - sector);
            let plain = &mut run[..(sectors * SECTOR_SIZE) as usize];
            read_padded(input, offset + sector * SECTOR_SIZE, plain)?;
            let plain = &*plain;
            crc.update(plain);
            observe(plain);

            compressed.clear();
            ZlibEncoder::new(plain, level).read_to_end(&mut compressed)?;
            let (ty, stored) = if compressed.len() > plain.len() {
                (ChunkType::Raw, plain)
            } else {
                (ChunkType::Zlib, &compressed[..])
            };
            self.out.write_all_at(self.position, stored)?;
            self.data_fork.update(stored);
            table.add_chunk(BlkxChunk::new(
                ty,
                sector,
                sectors,
                self.position,
                stored.len() as u64,
            ));
            self.position += stored.len() as u64;
            sector += sectors;
        }
        table.add_chunk(BlkxChunk::term(sector, self.position));
        table.checksum = match self.options.checksum {
            ChecksumKind::Crc32 => crc.udif(),
            ChecksumKind::None => UdifChecksum::new(CHECKSUM_NONE, 0),
        };
        self.sector_count = self.sector_count.max(first_sector + count);
        debug!(
            "blkx at sector {first_sector}: {} runs, {} bytes stored",
            table.chunks.len() - 1,
            table.chunks.iter().map(|c| c.compressed_length).sum::<u64>()
        );
        Ok(table)
    }

    /// Adds a partition with its `blkx`, `cSum` and `nsiz` resources. HFS+
    /// volumes also get their digest and a `size` resource.
    #[allow(clippy::too_many_arguments)]
    pub fn add_partition<R: VirtualIo + ?Sized>(
        &mut self,
        id: i32,
        name: &str,
        input: &mut R,
        offset: u64,
        first_sector: u64,
        count: u64,
        descriptor: u32,
    ) -> Result<()> {
        let volume = detect_volume(input, offset, count)?;
        let mut block = MkBlock::new();
        let mut sha = volume.as_ref().map(|_| Sha1::new());
        let mut observe = |run: &[u8]| {
            block.update(run);
            if let Some(sha) = sha.as_mut() {
                sha.update(run);
            }
        };
        let table = self.insert_blkx(input, offset, first_sector, count, descriptor, &mut observe)?;
        self.table_checksums.push(table.checksum);
        self.resources
            .insert("blkx", id, name, table.to_bytes()?, ATTRIBUTE_HDIUTIL);
        self.resources
            .insert_csum(id, &CsumResource::new(CHECKSUM_MKBLOCK, block.value()));

        let mut nsiz = NsizResource::new(id, block.value());
        if let (Some(header), Some(sha)) = (volume, sha) {
            nsiz.sha1_digest = Some(serde_bytes::ByteBuf::from(sha.finalize().to_vec()));
            nsiz.bytes = Some(header.totalBlocks as i64 * header.blockSize as i64);
            nsiz.date = Some(header.modifyDate as i32 as i64);
            nsiz.volume_signature = Some(header.signature as i64);
            self.resources
                .insert_size(&SizeResource::for_volume(header.modifyDate, header.signature));
            info!("partition {id} {name:?} holds an HFS+ volume");
        }
        self.resources.insert_nsiz(&nsiz)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.resources.insert_plst();
        let (plist_offset, plist_length) = write_xml(&self.resources, &mut self.out, self.position)?;
        let segment_id = match self.options.segment_id {
            Some(id) => id,
            None => {
                let mut id = [0; 16];
                getrandom::fill(&mut id).map_err(|e| std::io::Error::other(e.to_string()))?;
                id
            }
        };
        let mut koly = KolyTrailer::new(
            self.position,
            self.sector_count,
            plist_offset,
            plist_length,
            self.data_fork.value(),
            master_checksum(&self.table_checksums),
        );
        if self.options.checksum == ChecksumKind::None {
            koly.data_fork_digest = UdifChecksum::new(CHECKSUM_NONE, 0);
            koly.main_digest = UdifChecksum::new(CHECKSUM_NONE, 0);
        }
        koly.segment_id = segment_id;
        koly.image_variant = self.image_variant;
        self.out
            .write_all_at(plist_offset + plist_length, &koly.to_bytes()?)?;
        self.out.flush()?;
        info!(
            "wrote udif image: {} sectors, {} byte data fork",
            self.sector_count, self.position
        );
        Ok(self.out)
    }
}

/// Decompresses the runs of `table` into `output`, placing relative sector
/// 0 at byte `base`. Returns the number of bytes the table covers.
pub fn extract_blkx<R: VirtualIo + ?Sized, W: VirtualIo + ?Sized>(
    input: &mut R,
    output: &mut W,
    table: &BlkxTable,
    base: u64,
) -> Result<u64> {
    table.check_data(input.size()?)?;
    let length = table.sector_count * SECTOR_SIZE;
    if length > 0 {
        output.write_all_at(base + length - 1, &[0])?;
    }
    let mut compressed = vec![];
    let mut plain = vec![];
    for chunk in &table.chunks {
        let ty = chunk.ty().ok_or(DmgError::UnknownRun(chunk.ty))?;
        match ty {
            ChunkType::Term => break,
            ChunkType::Zero | ChunkType::Ignore | ChunkType::Comment => continue,
            _ if chunk.compressed_length == 0 => continue,
            _ => {}
        }
        compressed.resize(chunk.compressed_length as usize, 0);
        input.read_exact_at(table.data_offset + chunk.compressed_offset, &mut compressed)?;
        let len = (chunk.sector_count * SECTOR_SIZE) as usize;
        plain.clear();
        plain
            .try_reserve_exact(len)
            .map_err(|_| DmgError::Corruption(format!("cannot hold a {len} byte run")))?;
        plain.resize(len, 0);
        dmgfile::decode_run(ty, &compressed, &mut plain)?;
        output.write_all_at(base + chunk.sector_number * SECTOR_SIZE, &plain)?;
    }
    Ok(length)
}

fn read_directory<R: VirtualIo + ?Sized>(input: &mut R) -> Result<ResourceDirectory> {
    let koly = KolyTrailer::read_from(&mut hfsplus::VioStream::new(&mut *input))?;
    ResourceDirectory::read_from(input, &koly)
}

/// Writes one partition of a UDIF image as a flat image. `Auto` picks the
/// first table named after an `Apple_HFS` partition, `Index` a table by its
/// resource id and `Whole` dumps the full device.
pub fn extract_dmg<R: VirtualIo + ?Sized, W: VirtualIo + ?Sized>(
    input: &mut R,
    output: &mut W,
    partition: PartitionChoice,
) -> Result<u64> {
    let resources = read_directory(input)?;
    let tables = resources.blkx_tables()?;
    let (resource, table) = match partition {
        PartitionChoice::Whole => return convert_to_iso(input, output),
        PartitionChoice::Auto => tables
            .iter()
            .find(|(r, _)| r.name.contains(HFS_PARTITION_TYPE))
            .ok_or_else(|| DmgError::NoPartition(String::from("no Apple_HFS blkx")))?,
        PartitionChoice::Index(n) => tables
            .iter()
            .find(|(r, _)| r.id == n as i32)
            .ok_or_else(|| DmgError::NoPartition(format!("no blkx with id {n}")))?,
    };
    info!("extracting blkx {} {:?}", resource.id, resource.name);
    let length = extract_blkx(input, output, table, 0)?;
    output.flush()?;
    Ok(length)
}

pub fn convert_to_iso<R: VirtualIo + ?Sized, W: VirtualIo + ?Sized>(
    input: &mut R,
    output: &mut W,
) -> Result<u64> {
    let resources = read_directory(input)?;
    let mut end = 0;
    for (_, table) in resources.blkx_tables()? {
        extract_blkx(input, output, &table, table.sector_number * SECTOR_SIZE)?;
        end = end.max(table.end_sector() * SECTOR_SIZE);
    }
    output.flush()?;
    Ok(end)
}

/// Compresses a flat device image into a UDIF image. A device with a driver
/// descriptor gets one table for the descriptor and one per partition map
/// entry; anything else becomes a single whole-device table.
pub fn convert_to_dmg<R: VirtualIo + ?Sized, W: VirtualIo>(
    input: &mut R,
    out: W,
    options: WriterOptions,
) -> Result<W> {
    let mut writer = DmgWriter::new(out, options)?;
    match PartitionMap::read_from(input)? {
        Some(map) => {
            let scale = map.block_size() / SECTOR_SIZE;
            writer.add_partition(
                -1,
                "Driver Descriptor Map (DDM : 0)",
                input,
                0,
                0,
                scale,
                DDM_DESCRIPTOR,
            )?;
            for (i, entry) in map.entries.iter().enumerate() {
                let name = format!(
                    "{} ({} : {})",
                    entry.name(),
                    entry.partition_type(),
                    i + 1
                );
                let first = entry.pm_py_part_start as u64 * scale;
                let count = entry.pm_part_blk_cnt as u64 * scale;
                writer.add_partition(
                    i as i32,
                    &name,
                    input,
                    first * SECTOR_SIZE,
                    first,
                    count,
                    i as u32,
                )?;
            }
            writer.set_image_variant(IMAGE_VARIANT_DEVICE);
        }
        None => {
            let sectors = input.size()? / SECTOR_SIZE;
            writer.add_partition(
                0,
                "whole disk (unknown partition : 0)",
                input,
                0,
                0,
                sectors,
                ENTIRE_DEVICE_DESCRIPTOR,
            )?;
            writer.set_image_variant(IMAGE_VARIANT_PARTITION);
        }
    }
    writer.finish()
}

fn is_udif<R: VirtualIo + ?Sized>(io: &mut R) -> Result<bool> {
    let size = io.size()?;
    if size < KOLY_SIZE {
        return Ok(false);
    }
    let mut magic = [0u8; 4];
    io.read_exact_at(size - KOLY_SIZE, &mut magic)?;
    Ok(u32::from_be_bytes(magic) == KOLY_SIGNATURE)
}

/// Mounts the HFS+ volume inside `io`, peeling off FileVault encryption and
/// UDIF compression first and then selecting a partition.
pub fn open_image<IO: VirtualIo + 'static>(
    io: IO,
    options: &OpenOptions,
) -> Result<Volume<Box<dyn VirtualIo>>> {
    options.validate()?;
    let mut io: Box<dyn VirtualIo> = Box::new(io);
    if vfdecrypt::is_filevault(&mut io)? {
        let key = options
            .filevault_key()?
            .ok_or_else(|| DmgError::Config(String::from("encrypted image needs a key")))?;
        io = Box::new(FileVault::open(io, &key)?);
    }
    let mut read_only = options.read_only;
    if is_udif(&mut io)? {
        io = Box::new(DmgFile::open(io)?);
        read_only = true;
    }

    let size = io.size()?;
    let (offset, length) = match options.partition {
        PartitionChoice::Whole => (0, size),
        choice => match PartitionMap::read_from(&mut io)? {
            Some(map) => map.select(choice)?,
            None if choice == PartitionChoice::Auto => (0, size),
            None => {
                return Err(DmgError::NoPartition(String::from(
                    "device has no partition map",
                )));
            }
        },
    };
    if offset != 0 || length != size {
        io = Box::new(SubIo::new(io, offset, length));
    }
    let volume = if read_only {
        Volume::open_read_only(io)?
    } else {
        Volume::open(io)?
    };
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::dmgfile::tests::noise,
        hfsplus::{FormatOptions, MemIo, format_volume},
        vfdecrypt::FileVaultKey,
    };

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20212223";

    fn text(len: usize) -> Vec<u8> {
        let mut out = vec![];
        let mut line = 0;
        while out.len() < len {
            out.extend_from_slice(format!("catalog record {line} of the volume\n").as_bytes());
            line += 1;
        }
        out.truncate(len);
        out
    }

    fn read_all<IO: VirtualIo>(io: &mut IO) -> anyhow::Result<Vec<u8>> {
        let mut out = vec![0; io.size()? as usize];
        io.read_exact_at(0, &mut out)?;
        Ok(out)
    }

    fn fixed_options() -> WriterOptions {
        WriterOptions {
            segment_id: Some([0x42; 16]),
            ..Default::default()
        }
    }

    fn partitioned_disk() -> anyhow::Result<(MemIo, Vec<u8>)> {
        let mut volume = MemIo::zeroed(64 * 4096);
        let options = FormatOptions {
            volume_name: String::from("Install"),
            ..Default::default()
        };
        format_volume(
            &mut volume,
            64 * 4096,
            &options,
            &[("readme.txt", b"read me first"), ("big.bin", &text(20_000))],
        )?;
        let volume = volume.into_inner();
        let sectors = volume.len() as u32 / 512;

        let mut map = PartitionMap::new(512, 64 + sectors + 16);
        map.push(ApplePartition::new("disk image", HFS_PARTITION_TYPE, 64, sectors));
        map.push(ApplePartition::new("", "Apple_Free", 64 + sectors, 16));
        let mut disk = MemIo::zeroed(((64 + sectors + 16) * 512) as usize);
        map.write_to(&mut disk)?;
        disk.write_all_at(64 * 512, &volume)?;
        Ok((disk, volume))
    }

    #[test]
    fn writer_stores_incompressible_runs_raw() -> anyhow::Result<()> {
        let mut input = noise(3 * 512, 7);
        input.extend(std::iter::repeat_n(0u8, 5 * 512));
        let mut source = MemIo::new(input.clone());

        let options = WriterOptions {
            sectors_per_run: 3,
            ..fixed_options()
        };
        let mut writer = DmgWriter::new(MemIo::default(), options)?;
        writer.add_partition(0, "whole disk (unknown partition : 0)", &mut source, 0, 0, 8, 0)?;
        let mut out = writer.finish()?;

        let mut dmg = DmgFile::open(&mut out)?;
        let table = &dmg.tables()[0];
        let types: Vec<_> = table.chunks.iter().map(|c| c.ty()).collect();
        assert_eq!(
            types,
            [
                Some(ChunkType::Raw),
                Some(ChunkType::Zlib),
                Some(ChunkType::Zlib),
                Some(ChunkType::Term)
            ]
        );
        assert_eq!(table.chunks[0].compressed_length, 3 * 512);
        assert_eq!(table.checksum, UdifChecksum::crc32(crc32fast::hash(&input)));
        let koly = *dmg.koly();
        assert_eq!(koly.segment_id, [0x42; 16]);
        assert_eq!(koly.sector_count, 8);
        assert_eq!(read_all(&mut dmg)?, input);

        let bytes = out.into_inner();
        let data_fork = &bytes[..koly.data_fork_length as usize];
        assert_eq!(koly.data_fork_digest, UdifChecksum::crc32(crc32fast::hash(data_fork)));
        assert_eq!(
            koly.main_digest.value(),
            crc32fast::hash(&crc32fast::hash(&input).to_be_bytes())
        );
        Ok(())
    }

    #[test]
    fn whole_disk_conversion() -> anyhow::Result<()> {
        let input = text(300 * 512 + 100);
        let mut source = MemIo::new(input.clone());
        let mut out = convert_to_dmg(&mut source, MemIo::default(), fixed_options())?;

        let directory = read_directory(&mut out)?;
        let tables = directory.blkx_tables()?;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].0.name, "whole disk (unknown partition : 0)");
        assert_eq!(tables[0].1.block_descriptor, ENTIRE_DEVICE_DESCRIPTOR);
        assert!(directory.get_by_id("cSum", 0).is_some());
        assert!(directory.get_by_id("plst", 0).is_some());
        let nsiz = directory.nsiz()?;
        assert_eq!(nsiz.len(), 1);
        assert!(!nsiz[0].is_volume());

        let mut iso = MemIo::default();
        assert_eq!(convert_to_iso(&mut out, &mut iso)?, 300 * 512);
        assert_eq!(iso.as_slice(), &input[..300 * 512]);

        let dmg = DmgFile::open(&mut out)?;
        assert_eq!(dmg.koly().image_variant, IMAGE_VARIANT_PARTITION);
        Ok(())
    }

    #[test]
    fn partitioned_disk_round_trip() -> anyhow::Result<()> {
        let (mut disk, volume) = partitioned_disk()?;
        let original = disk.as_slice().to_vec();
        let mut out = convert_to_dmg(&mut disk, MemIo::default(), fixed_options())?;

        let directory = read_directory(&mut out)?;
        let names: Vec<_> = directory
            .get("blkx")
            .unwrap_or_default()
            .iter()
            .map(|r| (r.id, r.name.clone()))
            .collect();
        assert_eq!(
            names,
            [
                (-1, String::from("Driver Descriptor Map (DDM : 0)")),
                (0, String::from("Apple (Apple_partition_map : 1)")),
                (1, String::from("disk image (Apple_HFS : 2)")),
                (2, String::from(" (Apple_Free : 3)")),
            ]
        );
        let nsiz = directory.nsiz()?;
        let hfs = nsiz.iter().find(|n| n.part_num == 1);
        assert_eq!(hfs.map(NsizResource::is_volume), Some(true));
        assert_eq!(
            hfs.and_then(|n| n.sha1_digest.as_ref()).map(|d| d.to_vec()),
            Some(Sha1::digest(&volume).to_vec())
        );
        assert!(directory.get_by_id("size", 0).is_some());

        let mut flat = MemIo::default();
        extract_dmg(&mut out, &mut flat, PartitionChoice::Auto)?;
        assert!(flat.as_slice() == &volume[..]);

        let mut iso = MemIo::default();
        convert_to_iso(&mut out, &mut iso)?;
        assert!(iso.as_slice() == &original[..]);

        let mut dmg = DmgFile::open(&mut out)?;
        assert_eq!(dmg.koly().image_variant, IMAGE_VARIANT_DEVICE);
        assert!(read_all(&mut dmg)? == original);
        Ok(())
    }

    #[test]
    fn opens_volume_inside_dmg() -> anyhow::Result<()> {
        let (mut disk, _) = partitioned_disk()?;
        let out = convert_to_dmg(&mut disk, MemIo::default(), fixed_options())?;

        let mut volume = open_image(out, &OpenOptions::default())?;
        assert!(volume.is_read_only());
        let names: Vec<String> = volume.list_dir("/")?.into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["big.bin", "readme.txt"]);
        assert_eq!(volume.read_file("/readme.txt")?, b"read me first");
        assert_eq!(volume.read_file("/big.bin")?, text(20_000));
        Ok(())
    }

    #[test]
    fn opens_partitions_of_flat_disks() -> anyhow::Result<()> {
        let (disk, _) = partitioned_disk()?;
        let options = OpenOptions {
            partition: PartitionChoice::Index(1),
            ..Default::default()
        };
        let mut volume = open_image(disk.clone(), &options)?;
        assert!(!volume.is_read_only());
        assert_eq!(volume.read_file("/readme.txt")?, b"read me first");

        let options = OpenOptions {
            partition: PartitionChoice::Index(0),
            ..Default::default()
        };
        assert!(open_image(disk, &options).is_err());
        Ok(())
    }

    #[test]
    fn opens_volume_inside_filevault() -> anyhow::Result<()> {
        let (disk, _) = partitioned_disk()?;
        let key = FileVaultKey::from_hex(KEY)?;
        let mut vault = FileVault::create(MemIo::default(), &key, 4096)?;
        vault.write_all_at(0, disk.as_slice())?;
        let container = vault.close()?;

        let options = OpenOptions {
            key: Some(KEY.to_string()),
            ..Default::default()
        };
        let mut volume = open_image(container.clone(), &options)?;
        assert_eq!(volume.read_file("/readme.txt")?, b"read me first");

        assert!(matches!(
            open_image(container, &OpenOptions::default()),
            Err(DmgError::Config(_))
        ));
        Ok(())
    }
}
