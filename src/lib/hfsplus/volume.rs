//! Mounting, resizing and closing HFS+ volumes.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use log::{debug, info, warn};
use spin::Mutex;
use unicode_normalization::UnicodeNormalization;

use crate::extents::{ExtentsFile, ExtentsOverflow};
use crate::rawfile::{Allocator, CatalogRef, RawFile};
use crate::{
    BTree, CatalogBody, CatalogKey, CatalogRecord, Cursor, Error, HFSCatalogNodeID,
    HFSPlusForkData, HFSPlusVolumeHeader, HFSString, HFSStringBinary, HFSStringTrait,
    HFSP_SIGNATURE, HFSX_SIGNATURE, Result, VirtualIo, kHFSAllocationFileID,
    kHFSAttributesFileID, kHFSBadBlockFileID, kHFSBinaryCompare, kHFSCatalogFileID,
    kHFSDataForkType, kHFSExtentsFileID, kHFSResourceForkType,
    kHFSRootFolderID, kHFSStartupFileID, kHFSVolumeHeaderOffset, kHFSVolumeHeaderSize,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VolumeAttributes: u32 {
        const HARDWARE_LOCK = 1 << 7;
        const UNMOUNTED = 1 << 8;
        const SPARED_BLOCKS = 1 << 9;
        const NO_CACHE_REQUIRED = 1 << 10;
        const BOOT_VOLUME_INCONSISTENT = 1 << 11;
        const CATALOG_NODE_IDS_REUSED = 1 << 12;
        const JOURNALED = 1 << 13;
        const SOFTWARE_LOCK = 1 << 15;
    }
}

enum CatalogTree<IO: VirtualIo> {
    CaseFolding(BTree<RawFile<IO>, CatalogKey<HFSString>, CatalogRecord<HFSString>>),
    Binary(BTree<RawFile<IO>, CatalogKey<HFSStringBinary>, CatalogRecord<HFSStringBinary>>),
}

impl<IO: VirtualIo> CatalogTree<IO> {
    fn open(file: RawFile<IO>) -> Result<Self> {
        let tree = BTree::<_, CatalogKey<HFSString>, CatalogRecord<HFSString>>::open(file)?;
        if tree.header.header.keyCompareType == kHFSBinaryCompare {
            Ok(CatalogTree::Binary(BTree::open(tree.fork)?))
        } else {
            Ok(CatalogTree::CaseFolding(tree))
        }
    }
}

fn convert_key(k: CatalogKey<HFSStringBinary>) -> CatalogKey<HFSString> {
    CatalogKey {
        _case_match: k._case_match,
        parent_id: k.parent_id,
        node_name: HFSString(k.node_name.0),
    }
}

fn convert_record(rec: CatalogRecord<HFSStringBinary>) -> CatalogRecord<HFSString> {
    CatalogRecord {
        key: convert_key(rec.key),
        body: match rec.body {
            CatalogBody::Folder(f) => CatalogBody::Folder(f),
            CatalogBody::File(f) => CatalogBody::File(f),
            CatalogBody::FolderThread(k) => CatalogBody::FolderThread(convert_key(k)),
            CatalogBody::FileThread(k) => CatalogBody::FileThread(convert_key(k)),
        },
    }
}

fn is_special_file(id: HFSCatalogNodeID) -> bool {
    matches!(
        id,
        kHFSExtentsFileID
            | kHFSCatalogFileID
            | kHFSBadBlockFileID
            | kHFSAllocationFileID
            | kHFSStartupFileID
            | kHFSAttributesFileID
    )
}

fn get_path_record_impl<IO, S>(
    filename: &str,
    btree: &mut BTree<RawFile<IO>, CatalogKey<S>, CatalogRecord<S>>,
) -> Result<CatalogRecord<S>>
where
    IO: VirtualIo,
    S: HFSStringTrait,
{
    let parts: Vec<&str> = filename.split('/').filter(|s| !s.is_empty()).collect();

    if parts.is_empty() {
        // The root folder is found through its thread (2, "") -> (1, volume name).
        let thread_key = CatalogKey::new(kHFSRootFolderID, Vec::new());
        let record = btree.get_record(&thread_key)?;
        return match &record.body {
            CatalogBody::FolderThread(real_key) => Ok((*btree.get_record(real_key)?).clone()),
            _ => Err(Error::InvalidRecordType),
        };
    }

    let mut current_folder_id = kHFSRootFolderID;
    let mut current_record: Option<CatalogRecord<S>> = None;
    for (i, part) in parts.iter().enumerate() {
        let name_utf16: Vec<u16> = part.nfd().collect::<String>().encode_utf16().collect();
        let record = btree.get_record(&CatalogKey::new(current_folder_id, name_utf16))?;
        match &record.body {
            CatalogBody::Folder(f) => current_folder_id = f.folderID,
            CatalogBody::File(_) if i == parts.len() - 1 => {}
            CatalogBody::File(_) => return Err(Error::KeyNotFound),
            _ => return Err(Error::InvalidRecordType),
        }
        current_record = Some((*record).clone());
    }

    current_record.ok_or(Error::KeyNotFound)
}

fn list_dir_impl<IO, S>(
    folder_id: HFSCatalogNodeID,
    btree: &mut BTree<RawFile<IO>, CatalogKey<S>, CatalogRecord<S>>,
) -> Result<Vec<(String, CatalogRecord<S>)>>
where
    IO: VirtualIo,
    S: HFSStringTrait,
{
    let first_key = CatalogKey::new(folder_id, Vec::new());
    let last_key = CatalogKey::new(folder_id + 1, Vec::new());

    let records = btree.get_record_range(&first_key, &last_key)?;
    Ok(records
        .into_iter()
        .filter(|r| r.key.parent_id == folder_id)
        .filter(|r| matches!(r.body, CatalogBody::Folder(_) | CatalogBody::File(_)))
        .map(|r| (format!("{}", r.key.node_name), (*r).clone()))
        .collect())
}

fn store_fork_in_catalog<IO, S>(
    btree: &mut BTree<RawFile<IO>, CatalogKey<S>, CatalogRecord<S>>,
    reference: &CatalogRef,
    fork_type: u8,
    fork: HFSPlusForkData,
) -> Result<()>
where
    IO: VirtualIo,
    S: HFSStringTrait,
{
    let key = CatalogKey::new(reference.parent_id, reference.name.clone());
    let mut record = (*btree.get_record(&key)?).clone();
    match &mut record.body {
        CatalogBody::File(file) if fork_type == kHFSResourceForkType => file.resourceFork = fork,
        CatalogBody::File(file) => file.dataFork = fork,
        _ => return Err(Error::InvalidRecordType),
    }
    btree.replace_record(&record)
}

/// A mounted HFS+ or HFSX volume.
///
/// The volume owns its device. Raw files opened from it share the device
/// and must be dropped before [`Volume::close`].
pub struct Volume<IO: VirtualIo> {
    io: Arc<Mutex<IO>>,
    header: HFSPlusVolumeHeader,
    extents: Option<Box<dyn ExtentsOverflow>>,
    catalog: Option<CatalogTree<IO>>,
    allocation: Option<RawFile<IO>>,
    read_only: bool,
}

impl<IO: VirtualIo + 'static> Volume<IO> {
    pub fn open(io: IO) -> Result<Self> {
        Self::open_with(io, false, |file| Ok(Box::new(ExtentsFile::open(file)?)))
    }

    pub fn open_read_only(io: IO) -> Result<Self> {
        Self::open_with(io, true, |file| Ok(Box::new(ExtentsFile::open(file)?)))
    }

    /// Mounts the volume, letting the caller decide how the extents-overflow
    /// file is represented.
    pub fn open_with<F>(mut io: IO, read_only: bool, make_extents: F) -> Result<Self>
    where
        F: FnOnce(RawFile<IO>) -> Result<Box<dyn ExtentsOverflow>>,
    {
        let mut buffer = [0u8; kHFSVolumeHeaderSize];
        io.read_exact_at(kHFSVolumeHeaderOffset, &mut buffer)?;
        let header = HFSPlusVolumeHeader::import(&mut Cursor::new(&buffer[..]))?;

        if header.signature != HFSP_SIGNATURE && header.signature != HFSX_SIGNATURE {
            return Err(Error::InvalidData(String::from("Invalid volume signature")));
        }
        if header.blockSize < 512 || !header.blockSize.is_power_of_two() {
            return Err(Error::Corruption(format!(
                "invalid allocation block size {}",
                header.blockSize
            )));
        }
        if VolumeAttributes::from_bits_retain(header.attributes).contains(VolumeAttributes::JOURNALED) {
            warn!("volume is journaled; the journal will not be replayed");
        }

        let mut volume = Volume {
            io: Arc::new(Mutex::new(io)),
            header,
            extents: None,
            catalog: None,
            allocation: None,
            read_only,
        };

        let extents_file = volume.open_special_file(kHFSExtentsFileID)?;
        volume.extents = Some(make_extents(extents_file)?);
        let catalog_file = volume.open_special_file(kHFSCatalogFileID)?;
        volume.catalog = Some(CatalogTree::open(catalog_file)?);
        volume.allocation = Some(volume.open_special_file(kHFSAllocationFileID)?);

        info!(
            "mounted {} volume: {} blocks of {} bytes, {} free",
            if volume.header.signature == HFSX_SIGNATURE { "HFSX" } else { "HFS+" },
            volume.header.totalBlocks,
            volume.header.blockSize,
            volume.header.freeBlocks
        );
        Ok(volume)
    }
}

impl<IO: VirtualIo> Volume<IO> {
    pub fn header(&self) -> &HFSPlusVolumeHeader {
        &self.header
    }

    pub fn attributes(&self) -> VolumeAttributes {
        VolumeAttributes::from_bits_retain(self.header.attributes)
    }

    pub fn block_size(&self) -> u32 {
        self.header.blockSize
    }

    pub fn free_blocks(&self) -> u32 {
        self.header.freeBlocks
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn open_raw_file(
        &mut self,
        id: HFSCatalogNodeID,
        fork_type: u8,
        fork: HFSPlusForkData,
        catalog: Option<CatalogRef>,
    ) -> Result<RawFile<IO>> {
        RawFile::open(
            Arc::clone(&self.io),
            self.header.blockSize,
            id,
            fork_type,
            fork,
            catalog,
            &mut self.extents,
        )
    }

    pub fn open_special_file(&mut self, id: HFSCatalogNodeID) -> Result<RawFile<IO>> {
        let fork = match id {
            kHFSExtentsFileID => self.header.extentsFile,
            kHFSCatalogFileID => self.header.catalogFile,
            kHFSAllocationFileID => self.header.allocationFile,
            kHFSStartupFileID => self.header.startupFile,
            kHFSAttributesFileID => self.header.attributesFile,
            _ => {
                return Err(Error::InvalidData(format!(
                    "file {} has no fork in the volume header",
                    id
                )));
            }
        };
        self.open_raw_file(id, kHFSDataForkType, fork, None)
    }

    fn allocator(&mut self) -> Result<Allocator<'_, IO>> {
        let bitmap = self
            .allocation
            .as_mut()
            .ok_or_else(|| Error::InvalidData(String::from("allocation file is not open")))?;
        Ok(Allocator {
            header: &mut self.header,
            bitmap,
        })
    }

    pub fn is_block_used(&mut self, block: u32) -> Result<bool> {
        self.allocator()?.is_block_used(block)
    }

    /// Flips one bit of the allocation bitmap. The header's free-block count
    /// is left alone.
    pub fn set_block_used(&mut self, block: u32, used: bool) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.allocator()?.set_block_used(block, used)
    }

    /// Resizes `file` to `size` bytes, allocating or freeing whole blocks,
    /// and records the new fork where it belongs.
    pub fn allocate(&mut self, file: &mut RawFile<IO>, size: u64) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        if !is_special_file(file.id()) && (file.catalog().is_none() || self.catalog.is_none()) {
            return Err(Error::UnsupportedOperation);
        }

        let block_size = self.header.blockSize as u64;
        let free = self.header.freeBlocks;
        let blocks_needed = u32::try_from(size.div_ceil(block_size)).map_err(|_| Error::NoSpace {
            needed: size.div_ceil(block_size),
            free: free as u64,
        })?;
        let current = file.total_blocks();

        let mut allocator = self.allocator()?;
        if blocks_needed > current {
            let to_allocate = blocks_needed - current;
            if to_allocate > free {
                warn!(
                    "cannot grow file {} by {} blocks: {} free",
                    file.id(),
                    to_allocate,
                    free
                );
                return Err(Error::NoSpace {
                    needed: to_allocate as u64,
                    free: free as u64,
                });
            }
            debug!("growing file {} by {} blocks", file.id(), to_allocate);
            allocator.grow(file, to_allocate)?;
        } else if blocks_needed < current {
            debug!(
                "shrinking file {} from {} to {} blocks",
                file.id(),
                current,
                blocks_needed
            );
            allocator.shrink(file, blocks_needed)?;
        }

        if let Err(err) = file.write_extents(&mut self.extents) {
            if blocks_needed > current {
                warn!("cannot record extents of file {}, releasing new blocks", file.id());
                self.allocator()?.shrink(file, current)?;
            }
            return Err(err);
        }
        file.set_logical_size(size);
        self.store_fork(file)?;
        self.update()
    }

    fn store_fork(&mut self, file: &RawFile<IO>) -> Result<()> {
        let fork = *file.fork();
        match file.id() {
            kHFSExtentsFileID => self.header.extentsFile = fork,
            kHFSCatalogFileID => self.header.catalogFile = fork,
            kHFSAllocationFileID => self.header.allocationFile = fork,
            kHFSStartupFileID => self.header.startupFile = fork,
            kHFSAttributesFileID => self.header.attributesFile = fork,
            _ => {
                let reference = file.catalog().ok_or(Error::UnsupportedOperation)?;
                match self.catalog.as_mut().ok_or(Error::UnsupportedOperation)? {
                    CatalogTree::CaseFolding(btree) => {
                        store_fork_in_catalog(btree, reference, file.fork_type(), fork)?
                    }
                    CatalogTree::Binary(btree) => {
                        store_fork_in_catalog(btree, reference, file.fork_type(), fork)?
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes `data` at `offset`, growing the file first when the write
    /// ends past its logical size.
    pub fn write_file(&mut self, file: &mut RawFile<IO>, offset: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let end = offset + data.len() as u64;
        if end > file.logical_size() {
            self.allocate(file, end)?;
        }
        file.write_at(offset, data)
    }

    /// Writes the header to the alternate location and then to the primary.
    pub fn update(&mut self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let bytes = self.header.to_bytes()?;
        let mut io = self.io.lock();
        io.write_all_at(self.header.mirror_offset(), &bytes)?;
        io.write_all_at(kHFSVolumeHeaderOffset, &bytes)
    }

    pub fn get_path_record(&mut self, filename: &str) -> Result<CatalogRecord> {
        match self.catalog.as_mut().ok_or(Error::UnsupportedOperation)? {
            CatalogTree::CaseFolding(btree) => get_path_record_impl(filename, btree),
            CatalogTree::Binary(btree) => Ok(convert_record(get_path_record_impl(filename, btree)?)),
        }
    }

    pub fn list_dir(&mut self, path: &str) -> Result<Vec<(String, CatalogRecord)>> {
        let folder_id = match self.get_path_record(path)?.body {
            CatalogBody::Folder(f) => f.folderID,
            _ => return Err(Error::InvalidRecordType),
        };
        match self.catalog.as_mut().ok_or(Error::UnsupportedOperation)? {
            CatalogTree::CaseFolding(btree) => list_dir_impl(folder_id, btree),
            CatalogTree::Binary(btree) => Ok(list_dir_impl(folder_id, btree)?
                .into_iter()
                .map(|(n, r)| (n, convert_record(r)))
                .collect()),
        }
    }

    pub fn open_file(&mut self, path: &str) -> Result<RawFile<IO>> {
        let record = self.get_path_record(path)?;
        let file = match record.body {
            CatalogBody::File(f) => f,
            _ => return Err(Error::InvalidRecordType),
        };
        let reference = CatalogRef {
            parent_id: record.key.parent_id,
            name: record.key.node_name.0,
        };
        self.open_raw_file(file.fileID, kHFSDataForkType, file.dataFork, Some(reference))
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.open_file(path)?.read_all()
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        if let Some(extents) = self.extents.as_mut() {
            extents.flush()?;
        }
        self.update()?;
        self.io.lock().flush()
    }

    pub fn close(mut self) -> Result<IO> {
        self.flush()?;
        let Volume {
            io,
            extents,
            catalog,
            allocation,
            ..
        } = self;
        drop(allocation);
        drop(catalog);
        drop(extents);

        let io = Arc::try_unwrap(io).map_err(|_| {
            Error::InvalidData(String::from("raw files of this volume are still open"))
        })?;
        debug!("volume closed");
        Ok(io.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatOptions, format_volume};
    use crate::io::MemIo;
    use crate::{MemoryExtents, kHFSFirstUserCatalogNodeID};
    use alloc::vec;

    const BLOCK: u64 = 4096;

    fn formatted(total_blocks: u64, files: &[(&str, &[u8])]) -> anyhow::Result<MemIo> {
        let mut io = MemIo::zeroed((total_blocks * BLOCK) as usize);
        let options = FormatOptions {
            volume_name: String::from("Test"),
            ..Default::default()
        };
        format_volume(&mut io, total_blocks * BLOCK, &options, files)?;
        Ok(io)
    }

    #[test]
    fn lists_and_reads_files() -> anyhow::Result<()> {
        let io = formatted(64, &[("hello.txt", b"hello, world"), ("b.bin", &[7u8; 5000])])?;
        let mut volume = Volume::open(io)?;
        assert!(volume.attributes().contains(VolumeAttributes::UNMOUNTED));

        let root = volume.get_path_record("/")?;
        match root.body {
            CatalogBody::Folder(f) => assert_eq!(f.folderID, kHFSRootFolderID),
            other => panic!("unexpected root {other:?}"),
        }
        assert_eq!(format!("{}", root.key.node_name), "Test");

        let names: Vec<String> = volume.list_dir("/")?.into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![String::from("b.bin"), String::from("hello.txt")]);
        assert_eq!(volume.read_file("/HELLO.TXT")?, b"hello, world");
        assert_eq!(volume.read_file("/b.bin")?, vec![7u8; 5000]);
        assert!(matches!(volume.read_file("/missing"), Err(Error::KeyNotFound)));
        Ok(())
    }

    #[test]
    fn close_without_changes_keeps_the_image() -> anyhow::Result<()> {
        let io = formatted(64, &[("a", b"abc")])?;
        let before = io.as_slice().to_vec();
        let volume = Volume::open(io)?;
        let after = volume.close()?.into_inner();
        assert!(before == after);
        let mirror = (64 * BLOCK - 1024) as usize;
        assert_eq!(after[1024..1536], after[mirror..mirror + 512]);
        Ok(())
    }

    #[test]
    fn growth_beyond_free_space_changes_nothing() -> anyhow::Result<()> {
        // 14 metadata blocks at the front and the mirror block leave 12 free.
        let mut volume = Volume::open(formatted(27, &[])?)?;
        assert_eq!(volume.free_blocks(), 12);

        let mut startup = volume.open_special_file(kHFSStartupFileID)?;
        volume.allocate(&mut startup, 10 * BLOCK)?;
        assert_eq!(volume.free_blocks(), 2);
        assert_eq!(volume.header().startupFile.totalBlocks, 10);
        let extents = startup.extents().to_vec();

        let result = volume.allocate(&mut startup, 15 * BLOCK);
        assert!(matches!(result, Err(Error::NoSpace { needed: 5, free: 2 })));
        assert_eq!(startup.extents(), &extents[..]);
        assert_eq!(volume.free_blocks(), 2);
        assert_eq!(startup.logical_size(), 10 * BLOCK);
        Ok(())
    }

    #[test]
    fn extents_that_overflow_one_leaf_are_refused() -> anyhow::Result<()> {
        let mut volume = Volume::open(formatted(1000, &[])?)?;
        // Pin every even block so each new block becomes its own extent.
        for block in (0..1000).step_by(2) {
            if !volume.is_block_used(block)? {
                volume.set_block_used(block, true)?;
            }
        }
        let free = volume.free_blocks();
        let mut startup = volume.open_special_file(kHFSStartupFileID)?;

        // 8 inline extents plus 54 overflow records; one 4096-byte leaf holds 52.
        let result = volume.allocate(&mut startup, 440 * BLOCK);
        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert!(startup.extents().is_empty());
        assert_eq!(volume.free_blocks(), free);
        assert_eq!(volume.header().startupFile.totalBlocks, 0);
        assert!(!volume.is_block_used(15)?);

        volume.allocate(&mut startup, 100 * BLOCK)?;
        assert_eq!(startup.extents().len(), 100);
        drop(startup);

        let mut volume = Volume::open(volume.close()?)?;
        let startup = volume.open_special_file(kHFSStartupFileID)?;
        assert_eq!(startup.total_blocks(), 100);
        assert_eq!(startup.extents().len(), 100);
        Ok(())
    }

    #[test]
    fn shrinking_frees_the_tail() -> anyhow::Result<()> {
        let mut volume = Volume::open(formatted(64, &[])?)?;
        let free = volume.free_blocks();
        let mut startup = volume.open_special_file(kHFSStartupFileID)?;
        volume.allocate(&mut startup, 10 * BLOCK)?;
        let blocks: Vec<u32> = startup.blocks().collect();
        assert_eq!(blocks.len(), 10);

        volume.allocate(&mut startup, 3 * BLOCK + 1)?;
        assert_eq!(startup.total_blocks(), 4);
        assert_eq!(volume.free_blocks(), free - 4);
        for &block in &blocks[..4] {
            assert!(volume.is_block_used(block)?);
        }
        for &block in &blocks[4..] {
            assert!(!volume.is_block_used(block)?);
        }

        volume.allocate(&mut startup, 0)?;
        assert!(startup.extents().is_empty());
        assert_eq!(volume.header().startupFile.totalBlocks, 0);
        assert_eq!(volume.free_blocks(), free);
        Ok(())
    }

    #[test]
    fn fragmented_file_survives_remount() -> anyhow::Result<()> {
        let mut volume = Volume::open(formatted(64, &[])?)?;
        let first_free = volume.header().nextAllocation;
        // Leave only every other block free.
        for block in (first_free..63).step_by(2) {
            volume.set_block_used(block, true)?;
        }

        let data: Vec<u8> = (0..12 * BLOCK as usize).map(|i| (i / 7) as u8).collect();
        let mut startup = volume.open_special_file(kHFSStartupFileID)?;
        volume.write_file(&mut startup, 0, &data)?;
        assert_eq!(startup.extents().len(), 12);
        assert!(startup.extents().iter().all(|e| e.block_count == 1));
        drop(startup);
        let io = volume.close()?;

        let mut volume = Volume::open(io)?;
        let mut startup = volume.open_special_file(kHFSStartupFileID)?;
        assert_eq!(startup.extents().len(), 12);
        assert_eq!(startup.read_all()?, data);
        drop(startup);

        let io = volume.close()?;
        let mut count = 0;
        let volume = Volume::open_with(io, true, |file| {
            let tree = ExtentsFile::open(file)?;
            count = tree.records().len();
            let mut copy = MemoryExtents::new();
            for record in tree.records().records() {
                copy.add(record)?;
            }
            Ok(Box::new(copy))
        })?;
        assert_eq!(count, 1);
        drop(volume);
        Ok(())
    }

    #[test]
    fn missing_overflow_record_is_reported() -> anyhow::Result<()> {
        let mut volume = Volume::open(formatted(64, &[])?)?;
        let mut fork = HFSPlusForkData {
            logicalSize: 12 * BLOCK,
            totalBlocks: 12,
            ..Default::default()
        };
        for (i, slot) in fork.extents.iter_mut().enumerate() {
            slot.startBlock = 20 + i as u32;
            slot.blockCount = 1;
        }
        let result = volume.open_raw_file(kHFSFirstUserCatalogNodeID, kHFSDataForkType, fork, None);
        assert!(matches!(result, Err(Error::Corruption(_))));
        Ok(())
    }

    #[test]
    fn growing_a_file_updates_its_catalog_record() -> anyhow::Result<()> {
        let mut volume = Volume::open(formatted(64, &[("a.txt", &[1u8; 100])])?)?;
        let mut file = volume.open_file("/a.txt")?;
        volume.write_file(&mut file, 5000, b"tail")?;
        drop(file);
        let io = volume.close()?;

        let mut volume = Volume::open(io)?;
        let contents = volume.read_file("/a.txt")?;
        assert_eq!(contents.len(), 5004);
        assert_eq!(contents[..100], [1u8; 100]);
        assert!(contents[100..5000].iter().all(|&b| b == 0));
        assert_eq!(&contents[5000..], b"tail");
        match volume.get_path_record("/a.txt")?.body {
            CatalogBody::File(f) => assert_eq!(f.dataFork.totalBlocks, 2),
            other => panic!("unexpected record {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn read_only_volume_refuses_allocation() -> anyhow::Result<()> {
        let mut volume = Volume::open_read_only(formatted(64, &[])?)?;
        let mut startup = volume.open_special_file(kHFSStartupFileID)?;
        assert!(matches!(
            volume.allocate(&mut startup, BLOCK),
            Err(Error::ReadOnly)
        ));
        drop(startup);
        volume.close()?;
        Ok(())
    }

    #[test]
    fn case_sensitive_volume_uses_binary_names() -> anyhow::Result<()> {
        let mut io = MemIo::zeroed((64 * BLOCK) as usize);
        let options = FormatOptions {
            case_sensitive: true,
            ..Default::default()
        };
        format_volume(&mut io, 64 * BLOCK, &options, &[("Readme", b"x"), ("readme", b"y")])?;
        let mut volume = Volume::open(io)?;
        assert_eq!(volume.read_file("/Readme")?, b"x");
        assert_eq!(volume.read_file("/readme")?, b"y");
        assert!(volume.read_file("/README").is_err());
        Ok(())
    }
}
