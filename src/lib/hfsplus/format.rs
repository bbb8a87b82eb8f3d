//! Creating fresh volumes.
//!
//! The layout is fixed: boot blocks and header, allocation bitmap, a
//! four-node extents tree, an eight-node catalog tree holding a single leaf,
//! then the file contents back to back. The last block carries the
//! alternate header.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use log::info;
use unicode_normalization::UnicodeNormalization;

use crate::volume::VolumeAttributes;
use crate::{
    BTHeaderRec, CatalogBody, CatalogKey, CatalogRecord, Error, HFSCatalogNodeID,
    HFSPlusCatalogFile, HFSPlusCatalogFolder, HFSPlusExtentDescriptor, HFSPlusForkData,
    HFSPlusVolumeHeader, HFSString, HFSStringBinary, HFSStringTrait, HFSP_SIGNATURE,
    HFSX_SIGNATURE, Result, VirtualIo, build_header_node, build_leaf_node, kBTBigKeysMask,
    kBTVariableIndexKeysMask, kHFSBinaryCompare, kHFSCaseFolding, kHFSFirstUserCatalogNodeID,
    kHFSPlusVersion, kHFSRootFolderID, kHFSRootParentID, kHFSVolumeHeaderOffset, kHFSXVersion,
};

const NODE_SIZE: u16 = 4096;
const EXTENTS_NODES: u32 = 4;
const CATALOG_NODES: u32 = 8;
const CLUMP_SIZE: u32 = 65536;

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub volume_name: String,
    pub block_size: u32,
    /// Creates an HFSX volume with binary name comparison.
    pub case_sensitive: bool,
    /// Seconds since 1904-01-01 UTC.
    pub create_date: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            volume_name: String::from("untitled"),
            block_size: 4096,
            case_sensitive: false,
            create_date: 0,
        }
    }
}

struct Layout {
    block_size: u64,
    next: u64,
}

impl Layout {
    fn take(&mut self, bytes: u64) -> HFSPlusForkData {
        let count = bytes.div_ceil(self.block_size);
        let mut fork = HFSPlusForkData {
            logicalSize: bytes,
            clumpSize: CLUMP_SIZE,
            totalBlocks: count as u32,
            ..Default::default()
        };
        if count > 0 {
            fork.extents[0] = HFSPlusExtentDescriptor {
                startBlock: self.next as u32,
                blockCount: count as u32,
            };
        }
        self.next += count;
        fork
    }
}

fn hfs_name(name: &str) -> Vec<u16> {
    name.nfd().collect::<String>().encode_utf16().collect()
}

fn catalog_leaf<S: HFSStringTrait>(
    volume_name: &[u16],
    date: u32,
    files: &[(Vec<u16>, HFSCatalogNodeID, HFSPlusForkData)],
) -> Result<(Vec<u8>, u32)> {
    let mut records: Vec<CatalogRecord<S>> = vec![
        CatalogRecord {
            key: CatalogKey::new(kHFSRootParentID, volume_name.to_vec()),
            body: CatalogBody::Folder(HFSPlusCatalogFolder::new(
                kHFSRootFolderID,
                files.len() as u32,
                date,
            )),
        },
        CatalogRecord {
            key: CatalogKey::new(kHFSRootFolderID, Vec::new()),
            body: CatalogBody::FolderThread(CatalogKey::new(kHFSRootParentID, volume_name.to_vec())),
        },
    ];
    for (name, id, fork) in files {
        records.push(CatalogRecord {
            key: CatalogKey::new(kHFSRootFolderID, name.clone()),
            body: CatalogBody::File(HFSPlusCatalogFile::new(*id, *fork, date)),
        });
        records.push(CatalogRecord {
            key: CatalogKey::new(*id, Vec::new()),
            body: CatalogBody::FileThread(CatalogKey::new(kHFSRootFolderID, name.clone())),
        });
    }
    records.sort_by(|a, b| a.key.cmp(&b.key));
    if let Some(pair) = records.windows(2).find(|w| w[0].key == w[1].key) {
        return Err(Error::InvalidData(format!(
            "duplicate file name {}",
            pair[1].key.node_name
        )));
    }
    let leaf = build_leaf_node::<CatalogKey<S>, CatalogRecord<S>>(NODE_SIZE, &records)?;
    Ok((leaf, records.len() as u32))
}

fn tree_header(
    clump_size: u32,
    total_nodes: u32,
    leaf_records: u32,
    max_key_length: u16,
    key_compare_type: u8,
    attributes: u32,
) -> BTHeaderRec {
    let has_leaf = leaf_records > 0;
    BTHeaderRec {
        treeDepth: has_leaf as u16,
        rootNode: has_leaf as u32,
        leafRecords: leaf_records,
        firstLeafNode: has_leaf as u32,
        lastLeafNode: has_leaf as u32,
        nodeSize: NODE_SIZE,
        maxKeyLength: max_key_length,
        totalNodes: total_nodes,
        freeNodes: total_nodes - 1 - has_leaf as u32,
        reserved1: 0,
        clumpSize: clump_size,
        btreeType: 0,
        keyCompareType: key_compare_type,
        attributes,
        reserved3: [0; 16],
    }
}

// Writes `data` at the start of `fork`'s only extent, zero-padding the
// final block.
fn write_fork<IO: VirtualIo + ?Sized>(
    io: &mut IO,
    fork: &HFSPlusForkData,
    block_size: u64,
    data: &[u8],
) -> Result<()> {
    let extent = fork.extents[0];
    if extent.blockCount == 0 {
        return Ok(());
    }
    let mut padded = data.to_vec();
    padded.resize((extent.blockCount as u64 * block_size) as usize, 0);
    io.write_all_at(extent.startBlock as u64 * block_size, &padded)
}

/// Lays down an empty HFS+ (or HFSX) file system over the first `size`
/// bytes of `io` and stores `files` in its root folder.
pub fn format_volume<IO: VirtualIo + ?Sized>(
    io: &mut IO,
    size: u64,
    options: &FormatOptions,
    files: &[(&str, &[u8])],
) -> Result<()> {
    let block_size = options.block_size as u64;
    if block_size < 512 || !block_size.is_power_of_two() {
        return Err(Error::InvalidData(format!(
            "invalid block size {}",
            options.block_size
        )));
    }
    let total_blocks = u32::try_from(size / block_size)
        .map_err(|_| Error::InvalidData(String::from("volume has too many blocks")))?;
    let total = total_blocks as u64;
    let date = options.create_date;

    let mut layout = Layout {
        block_size,
        next: (kHFSVolumeHeaderOffset + 512).div_ceil(block_size),
    };
    let bitmap_blocks = total.div_ceil(8).div_ceil(block_size);
    let allocation = layout.take(bitmap_blocks * block_size);
    let extents = layout.take(NODE_SIZE as u64 * EXTENTS_NODES as u64);
    let catalog = layout.take(NODE_SIZE as u64 * CATALOG_NODES as u64);
    let mut file_forks = Vec::with_capacity(files.len());
    for (i, (name, data)) in files.iter().enumerate() {
        let id = kHFSFirstUserCatalogNodeID + i as u32;
        file_forks.push((hfs_name(name), id, layout.take(data.len() as u64)));
    }

    let mirror_block = (total * block_size).saturating_sub(kHFSVolumeHeaderOffset) / block_size;
    if total == 0 || layout.next > mirror_block {
        return Err(Error::NoSpace {
            needed: layout.next + (total - mirror_block),
            free: total,
        });
    }
    let used = layout.next + (total - mirror_block);

    let mut bitmap = vec![0u8; allocation.logicalSize as usize];
    for block in (0..layout.next).chain(mirror_block..total) {
        bitmap[block as usize / 8] |= 0x80 >> (block % 8);
    }

    let volume_name = hfs_name(&options.volume_name);
    let (leaf, leaf_records) = if options.case_sensitive {
        catalog_leaf::<HFSStringBinary>(&volume_name, date, &file_forks)?
    } else {
        catalog_leaf::<HFSString>(&volume_name, date, &file_forks)?
    };

    let extents_header = tree_header(extents.clumpSize, EXTENTS_NODES, 0, 10, 0, kBTBigKeysMask);
    let catalog_header = tree_header(
        catalog.clumpSize,
        CATALOG_NODES,
        leaf_records,
        516,
        if options.case_sensitive {
            kHFSBinaryCompare
        } else {
            kHFSCaseFolding
        },
        kBTBigKeysMask | kBTVariableIndexKeysMask,
    );
    let mut catalog_bytes = build_header_node(&catalog_header, &[0, 1])?;
    catalog_bytes.extend_from_slice(&leaf);

    write_fork(io, &allocation, block_size, &bitmap)?;
    write_fork(io, &extents, block_size, &build_header_node(&extents_header, &[0])?)?;
    write_fork(io, &catalog, block_size, &catalog_bytes)?;
    for ((_, _, fork), (_, data)) in file_forks.iter().zip(files) {
        write_fork(io, fork, block_size, data)?;
    }

    let (signature, version) = if options.case_sensitive {
        (HFSX_SIGNATURE, kHFSXVersion)
    } else {
        (HFSP_SIGNATURE, kHFSPlusVersion)
    };
    let header = HFSPlusVolumeHeader {
        signature,
        version,
        attributes: VolumeAttributes::UNMOUNTED.bits(),
        lastMountedVersion: 0x3130_2E30,
        journalInfoBlock: 0,
        createDate: date,
        modifyDate: date,
        backupDate: 0,
        checkedDate: date,
        fileCount: files.len() as u32,
        folderCount: 0,
        blockSize: options.block_size,
        totalBlocks: total_blocks,
        freeBlocks: (total - used) as u32,
        nextAllocation: layout.next as u32,
        rsrcClumpSize: CLUMP_SIZE,
        dataClumpSize: CLUMP_SIZE,
        nextCatalogID: kHFSFirstUserCatalogNodeID + files.len() as u32,
        writeCount: 0,
        encodingsBitmap: 1,
        finderInfo: [0; 8],
        allocationFile: allocation,
        extentsFile: extents,
        catalogFile: catalog,
        attributesFile: HFSPlusForkData::default(),
        startupFile: HFSPlusForkData::default(),
    };
    let mut bytes = header.to_bytes()?;
    io.write_all_at(kHFSVolumeHeaderOffset, &bytes)?;
    // The final 512 bytes of the volume are reserved.
    bytes.resize(kHFSVolumeHeaderOffset as usize, 0);
    io.write_all_at(header.mirror_offset(), &bytes)?;

    info!(
        "formatted {} blocks of {} bytes with {} files, {} blocks free",
        total_blocks, options.block_size, files.len(), header.freeBlocks
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemIo;

    #[test]
    fn too_small_volume_is_refused() {
        let mut io = MemIo::default();
        let result = format_volume(&mut io, 8 * 4096, &FormatOptions::default(), &[]);
        assert!(matches!(result, Err(Error::NoSpace { .. })));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut io = MemIo::default();
        let files: [(&str, &[u8]); 2] = [("Same", b"1"), ("same", b"2")];
        let result = format_volume(&mut io, 64 * 4096, &FormatOptions::default(), &files);
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[test]
    fn header_counts_blocks() -> anyhow::Result<()> {
        let mut io = MemIo::default();
        format_volume(&mut io, 64 * 4096, &FormatOptions::default(), &[("x", &[1u8; 4097])])?;
        assert_eq!(io.as_slice().len(), 64 * 4096);
        let header = HFSPlusVolumeHeader::import(&mut crate::Cursor::new(&io.as_slice()[1024..1536]))?;
        assert_eq!(header.signature, HFSP_SIGNATURE);
        assert_eq!(header.totalBlocks, 64);
        // boot+header, bitmap, 4 extents nodes, 8 catalog nodes, 2 data blocks, mirror
        assert_eq!(header.freeBlocks, 64 - 17);
        assert_eq!(header.nextCatalogID, 17);
        assert_eq!(header.catalogFile.extents[0].startBlock, 6);
        Ok(())
    }
}
