//! Extent-mapped fork access and the block allocator.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::extents::ExtentsOverflow;
use crate::{
    Error, ExtentKey, ExtentRecord, HFSCatalogNodeID, HFSPlusExtentDescriptor,
    HFSPlusExtentRecord, HFSPlusForkData, HFSPlusVolumeHeader, Read, Result, Seek, SeekFrom,
    VirtualIo, Write,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Extent {
    pub start_block: u32,
    pub block_count: u32,
}

impl Extent {
    fn descriptor(&self) -> HFSPlusExtentDescriptor {
        HFSPlusExtentDescriptor {
            startBlock: self.start_block,
            blockCount: self.block_count,
        }
    }
}

/// Locates the catalog record that owns a fork, so size changes can be
/// written back to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRef {
    pub parent_id: HFSCatalogNodeID,
    pub name: Vec<u16>,
}

fn descriptors(extents: &[Extent]) -> HFSPlusExtentRecord {
    let mut record = [HFSPlusExtentDescriptor::default(); 8];
    for (slot, extent) in record.iter_mut().zip(extents) {
        *slot = extent.descriptor();
    }
    record
}

pub struct RawFile<IO> {
    io: Arc<Mutex<IO>>,
    id: HFSCatalogNodeID,
    fork_type: u8,
    block_size: u64,
    fork: HFSPlusForkData,
    extents: Vec<Extent>,
    catalog: Option<CatalogRef>,
    position: u64,
}

impl<IO: VirtualIo> RawFile<IO> {
    pub fn open(
        io: Arc<Mutex<IO>>,
        block_size: u32,
        id: HFSCatalogNodeID,
        fork_type: u8,
        fork: HFSPlusForkData,
        catalog: Option<CatalogRef>,
        overflow: &mut Option<Box<dyn ExtentsOverflow>>,
    ) -> Result<Self> {
        let mut file = RawFile {
            io,
            id,
            fork_type,
            block_size: block_size as u64,
            fork,
            extents: Vec::new(),
            catalog,
            position: 0,
        };
        file.read_extents(overflow)?;
        Ok(file)
    }

    pub fn id(&self) -> HFSCatalogNodeID {
        self.id
    }

    pub fn fork_type(&self) -> u8 {
        self.fork_type
    }

    pub fn fork(&self) -> &HFSPlusForkData {
        &self.fork
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn catalog(&self) -> Option<&CatalogRef> {
        self.catalog.as_ref()
    }

    pub fn logical_size(&self) -> u64 {
        self.fork.logicalSize
    }

    pub(crate) fn set_logical_size(&mut self, size: u64) {
        self.fork.logicalSize = size;
    }

    pub fn total_blocks(&self) -> u32 {
        self.extents.iter().map(|e| e.block_count).sum()
    }

    pub fn capacity(&self) -> u64 {
        self.total_blocks() as u64 * self.block_size
    }

    pub fn blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.extents
            .iter()
            .flat_map(|e| e.start_block..e.start_block + e.block_count)
    }

    fn overflow_record(
        &self,
        overflow: &mut Option<Box<dyn ExtentsOverflow>>,
        start_block: u32,
    ) -> Result<HFSPlusExtentRecord> {
        let tree = overflow
            .as_deref_mut()
            .ok_or_else(|| Error::Corruption(String::from("no extents overflow file loaded")))?;
        let key = ExtentKey::new(self.id, self.fork_type, start_block);
        match tree.search(&key)? {
            Some((record, true)) => Ok(record.body),
            _ => Err(Error::Corruption(format!(
                "inconsistent extents information for file {} at block {}",
                self.id, start_block
            ))),
        }
    }

    /// Rebuilds the extent list from the fork descriptor and, past the eight
    /// inline descriptors, from the overflow tree.
    pub fn read_extents(&mut self, overflow: &mut Option<Box<dyn ExtentsOverflow>>) -> Result<()> {
        let mut extents = Vec::new();
        let mut blocks_left = self.fork.totalBlocks;
        let mut current_block = 0u32;
        let mut record = self.fork.extents;
        let mut index = 0;

        while blocks_left > 0 {
            if index == record.len() {
                record = self.overflow_record(overflow, current_block)?;
                index = 0;
                continue;
            }
            let descriptor = record[index];
            index += 1;
            if descriptor.blockCount == 0 {
                continue;
            }
            if descriptor.blockCount > blocks_left {
                return Err(Error::Corruption(format!(
                    "file {} has more extent blocks than its fork records",
                    self.id
                )));
            }
            extents.push(Extent {
                start_block: descriptor.startBlock,
                block_count: descriptor.blockCount,
            });
            blocks_left -= descriptor.blockCount;
            current_block += descriptor.blockCount;
        }

        self.extents = extents;
        Ok(())
    }

    /// Keys of the overflow records describing the fork as it was last
    /// written. Each one is looked up so a missing record is reported.
    fn overflow_keys(&self, overflow: &mut Option<Box<dyn ExtentsOverflow>>) -> Result<Vec<ExtentKey>> {
        let mut keys = Vec::new();
        let mut blocks_left = self.fork.totalBlocks;
        let mut current_block = 0u32;
        let mut record = self.fork.extents;
        let mut index = 0;

        while blocks_left > 0 {
            if index == record.len() {
                record = self.overflow_record(overflow, current_block)?;
                keys.push(ExtentKey::new(self.id, self.fork_type, current_block));
                index = 0;
                continue;
            }
            let count = core::cmp::min(record[index].blockCount, blocks_left);
            blocks_left -= count;
            current_block += count;
            index += 1;
        }
        Ok(keys)
    }

    /// Stores the extent list: the first eight extents inline, the rest as
    /// overflow records keyed by their first logical block. Nothing changes
    /// unless the overflow tree can hold the result.
    pub fn write_extents(&mut self, overflow: &mut Option<Box<dyn ExtentsOverflow>>) -> Result<()> {
        if self.extents.len() > 8 && overflow.is_none() {
            return Err(Error::UnsupportedOperation);
        }
        let removed = self.overflow_keys(overflow)?;
        let mut added = Vec::new();
        if let Some(rest) = self.extents.get(8..) {
            let mut logical_block: u32 = self.extents[..8].iter().map(|e| e.block_count).sum();
            for chunk in rest.chunks(8) {
                added.push(ExtentRecord {
                    key: ExtentKey::new(self.id, self.fork_type, logical_block),
                    body: descriptors(chunk),
                });
                logical_block += chunk.iter().map(|e| e.block_count).sum::<u32>();
            }
        }
        if let Some(tree) = overflow.as_deref_mut() {
            tree.check_update(&removed, &added)?;
            for key in &removed {
                tree.remove(key)?;
            }
            for record in added {
                tree.add(record)?;
            }
        }

        self.fork.extents = descriptors(&self.extents);
        self.fork.totalBlocks = self.total_blocks();
        Ok(())
    }

    // Splits a logical range into physical (offset, length) spans.
    fn spans(&self, offset: u64, len: u64) -> Result<Vec<(u64, usize)>> {
        let mut spans = Vec::new();
        let mut pos = offset;
        let mut remaining = len;
        let mut extent_start = 0u64;
        for extent in &self.extents {
            if remaining == 0 {
                break;
            }
            let extent_len = extent.block_count as u64 * self.block_size;
            let extent_end = extent_start + extent_len;
            if pos < extent_end {
                let within = pos - extent_start;
                let n = core::cmp::min(extent_len - within, remaining);
                spans.push((extent.start_block as u64 * self.block_size + within, n as usize));
                pos += n;
                remaining -= n;
            }
            extent_start = extent_end;
        }
        if remaining > 0 {
            return Err(Error::Corruption(format!(
                "file {} has no extent covering byte {}",
                self.id, pos
            )));
        }
        Ok(spans)
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.fork.logicalSize;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = core::cmp::min(buf.len() as u64, size - offset) as usize;
        let spans = self.spans(offset, len as u64)?;
        let mut io = self.io.lock();
        let mut done = 0;
        for (physical, n) in spans {
            io.read_exact_at(physical, &mut buf[done..done + n])?;
            done += n;
        }
        Ok(len)
    }

    /// Writes into already allocated blocks. Growing a file goes through
    /// `Volume::write_file`, which allocates first.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.capacity() {
            return Err(Error::InvalidData(format!(
                "write past the allocated blocks of file {}",
                self.id
            )));
        }
        let spans = self.spans(offset, data.len() as u64)?;
        let mut io = self.io.lock();
        let mut done = 0;
        for (physical, n) in spans {
            io.write_all_at(physical, &data[done..done + n])?;
            done += n;
        }
        Ok(())
    }

    fn zero_block(&self, block: u32, zeros: &[u8]) -> Result<()> {
        self.io
            .lock()
            .write_all_at(block as u64 * self.block_size, zeros)
    }

    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buffer = vec![0; self.fork.logicalSize as usize];
        let n = self.read_at(0, &mut buffer)?;
        buffer.truncate(n);
        Ok(buffer)
    }
}

impl<IO: VirtualIo> Read for RawFile<IO> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<IO: VirtualIo> Write for RawFile<IO> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_at(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }
}

impl<IO: VirtualIo> Seek for RawFile<IO> {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_position = match pos {
            SeekFrom::Start(x) => x as i64,
            SeekFrom::Current(x) => self.position as i64 + x,
            SeekFrom::End(x) => self.fork.logicalSize as i64 + x,
        };
        if new_position < 0 {
            return Err(Error::InvalidData(String::from("Invalid seek")));
        }
        self.position = new_position as u64;
        Ok(self.position)
    }
}

pub(crate) struct Allocator<'a, IO> {
    pub header: &'a mut HFSPlusVolumeHeader,
    pub bitmap: &'a mut RawFile<IO>,
}

impl<IO: VirtualIo> Allocator<'_, IO> {
    fn bitmap_byte(&mut self, block: u32) -> Result<u8> {
        let mut byte = [0u8];
        if self.bitmap.read_at(block as u64 / 8, &mut byte)? != 1 {
            return Err(Error::Corruption(format!(
                "block {} is beyond the allocation bitmap",
                block
            )));
        }
        Ok(byte[0])
    }

    pub fn is_block_used(&mut self, block: u32) -> Result<bool> {
        Ok(self.bitmap_byte(block)? & (0x80 >> (block % 8)) != 0)
    }

    pub fn set_block_used(&mut self, block: u32, used: bool) -> Result<()> {
        let mut byte = self.bitmap_byte(block)?;
        if used {
            byte |= 0x80 >> (block % 8);
        } else {
            byte &= !(0x80 >> (block % 8));
        }
        self.bitmap.write_at(block as u64 / 8, &[byte])
    }

    /// Appends `to_allocate` zeroed blocks to `file`, scanning the bitmap from
    /// the end of its last extent and falling back to the volume's
    /// next-allocation cursor.
    pub fn grow(&mut self, file: &mut RawFile<IO>, mut to_allocate: u32) -> Result<()> {
        let total = self.header.totalBlocks;
        let zeros = vec![0u8; self.header.blockSize as usize];
        let mut current = match file.extents.last() {
            Some(e) => e.start_block + e.block_count,
            None => self.header.nextAllocation,
        };
        let mut misses = 0u64;

        while to_allocate > 0 {
            if current >= total {
                current = self.header.nextAllocation;
            }
            if self.is_block_used(current)? {
                misses += 1;
                if misses > 2 * total as u64 + 1 {
                    return Err(Error::Corruption(format!(
                        "allocation bitmap is full but the header counts {} free blocks",
                        self.header.freeBlocks
                    )));
                }
                current = self.header.nextAllocation;
                self.header.nextAllocation += 1;
                if self.header.nextAllocation >= total {
                    self.header.nextAllocation = 0;
                }
                continue;
            }
            misses = 0;

            match file.extents.last_mut() {
                Some(e) if e.start_block + e.block_count == current => e.block_count += 1,
                _ => file.extents.push(Extent {
                    start_block: current,
                    block_count: 1,
                }),
            }
            file.zero_block(current, &zeros)?;
            self.set_block_used(current, true)?;
            self.header.freeBlocks -= 1;
            to_allocate -= 1;
            current += 1;
        }
        Ok(())
    }

    pub fn shrink(&mut self, file: &mut RawFile<IO>, blocks_needed: u32) -> Result<()> {
        let mut keep = blocks_needed;
        let mut retained = 0;
        for extent in file.extents.iter_mut() {
            let kept = core::cmp::min(keep, extent.block_count);
            for block in extent.start_block + kept..extent.start_block + extent.block_count {
                self.set_block_used(block, false)?;
                self.header.freeBlocks += 1;
            }
            extent.block_count = kept;
            if kept > 0 {
                retained += 1;
            }
            keep -= kept;
        }
        file.extents.truncate(retained);
        Ok(())
    }
}
