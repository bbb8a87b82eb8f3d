use alloc::vec::Vec;

use crate::{Read, ReadExt, Result, Write, WriteExt};

#[derive(Debug, Copy, Clone, Default)]
pub struct HFSPlusBSDInfo {
    pub ownerID: u32,
    pub groupID: u32,
    pub adminFlags: u8,
    pub ownerFlags: u8,
    pub fileMode: u16,
    pub special: u32,
}

impl HFSPlusBSDInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            ownerID: source.read_u32_be()?,
            groupID: source.read_u32_be()?,
            adminFlags: source.read_u8()?,
            ownerFlags: source.read_u8()?,
            fileMode: source.read_u16_be()?,
            special: source.read_u32_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.ownerID)?;
        source.write_u32_be(self.groupID)?;
        source.write_u8(self.adminFlags)?;
        source.write_u8(self.ownerFlags)?;
        source.write_u16_be(self.fileMode)?;
        source.write_u32_be(self.special)?;
        Ok(())
    }
}

pub const S_IFDIR: u16 = 0o0040000;
pub const S_IFREG: u16 = 0o0100000;

pub const S_IRWXU: u16 = 0o0000700;
pub const S_IRGRP: u16 = 0o0000040;
pub const S_IXGRP: u16 = 0o0000010;
pub const S_IROTH: u16 = 0o0000004;
pub const S_IXOTH: u16 = 0o0000001;
pub const S_IRUSR: u16 = 0o0000400;
pub const S_IWUSR: u16 = 0o0000200;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HFSPlusForkData {
    pub logicalSize: u64,
    pub clumpSize: u32,
    pub totalBlocks: u32,
    pub extents: HFSPlusExtentRecord,
}

pub type HFSPlusExtentRecord = [HFSPlusExtentDescriptor; 8];

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HFSPlusExtentDescriptor {
    pub startBlock: u32,
    pub blockCount: u32,
}

impl HFSPlusForkData {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            logicalSize: source.read_u64_be()?,
            clumpSize: source.read_u32_be()?,
            totalBlocks: source.read_u32_be()?,
            extents: import_record(source)?,
        })
    }

    /// Sum of the inline descriptors' block counts.
    pub fn inline_blocks(&self) -> u32 {
        self.extents.iter().map(|e| e.blockCount).sum()
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u64_be(self.logicalSize)?;
        source.write_u32_be(self.clumpSize)?;
        source.write_u32_be(self.totalBlocks)?;
        export_record(&self.extents, source)?;
        Ok(())
    }
}

pub fn import_record(source: &mut dyn Read) -> Result<HFSPlusExtentRecord> {
    Ok([
        HFSPlusExtentDescriptor::import(source)?,
        HFSPlusExtentDescriptor::import(source)?,
        HFSPlusExtentDescriptor::import(source)?,
        HFSPlusExtentDescriptor::import(source)?,
        HFSPlusExtentDescriptor::import(source)?,
        HFSPlusExtentDescriptor::import(source)?,
        HFSPlusExtentDescriptor::import(source)?,
        HFSPlusExtentDescriptor::import(source)?,
    ])
}

pub fn export_record(record: &[HFSPlusExtentDescriptor], source: &mut dyn Write) -> Result<()> {
    for r in record {
        r.export(source)?;
    }
    Ok(())
}

impl HFSPlusExtentDescriptor {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            startBlock: source.read_u32_be()?,
            blockCount: source.read_u32_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.startBlock)?;
        source.write_u32_be(self.blockCount)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HFSPlusVolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub lastMountedVersion: u32,
    pub journalInfoBlock: u32,
    pub createDate: u32,
    pub modifyDate: u32,
    pub backupDate: u32,
    pub checkedDate: u32,
    pub fileCount: u32,
    pub folderCount: u32,
    pub blockSize: u32,
    pub totalBlocks: u32,
    pub freeBlocks: u32,
    pub nextAllocation: u32,
    pub rsrcClumpSize: u32,
    pub dataClumpSize: u32,
    pub nextCatalogID: u32,
    pub writeCount: u32,
    pub encodingsBitmap: u64,
    pub finderInfo: [u32; 8],
    pub allocationFile: HFSPlusForkData,
    pub extentsFile: HFSPlusForkData,
    pub catalogFile: HFSPlusForkData,
    pub attributesFile: HFSPlusForkData,
    pub startupFile: HFSPlusForkData,
}

impl HFSPlusVolumeHeader {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            signature: source.read_u16_be()?,
            version: source.read_u16_be()?,
            attributes: source.read_u32_be()?,
            lastMountedVersion: source.read_u32_be()?,
            journalInfoBlock: source.read_u32_be()?,
            createDate: source.read_u32_be()?,
            modifyDate: source.read_u32_be()?,
            backupDate: source.read_u32_be()?,
            checkedDate: source.read_u32_be()?,
            fileCount: source.read_u32_be()?,
            folderCount: source.read_u32_be()?,
            blockSize: source.read_u32_be()?,
            totalBlocks: source.read_u32_be()?,
            freeBlocks: source.read_u32_be()?,
            nextAllocation: source.read_u32_be()?,
            rsrcClumpSize: source.read_u32_be()?,
            dataClumpSize: source.read_u32_be()?,
            nextCatalogID: source.read_u32_be()?,
            writeCount: source.read_u32_be()?,
            encodingsBitmap: source.read_u64_be()?,
            finderInfo: [
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
            ],
            allocationFile: HFSPlusForkData::import(source)?,
            extentsFile: HFSPlusForkData::import(source)?,
            catalogFile: HFSPlusForkData::import(source)?,
            attributesFile: HFSPlusForkData::import(source)?,
            startupFile: HFSPlusForkData::import(source)?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.signature)?;
        source.write_u16_be(self.version)?;
        source.write_u32_be(self.attributes)?;
        source.write_u32_be(self.lastMountedVersion)?;
        source.write_u32_be(self.journalInfoBlock)?;
        source.write_u32_be(self.createDate)?;
        source.write_u32_be(self.modifyDate)?;
        source.write_u32_be(self.backupDate)?;
        source.write_u32_be(self.checkedDate)?;
        source.write_u32_be(self.fileCount)?;
        source.write_u32_be(self.folderCount)?;
        source.write_u32_be(self.blockSize)?;
        source.write_u32_be(self.totalBlocks)?;
        source.write_u32_be(self.freeBlocks)?;
        source.write_u32_be(self.nextAllocation)?;
        source.write_u32_be(self.rsrcClumpSize)?;
        source.write_u32_be(self.dataClumpSize)?;
        source.write_u32_be(self.nextCatalogID)?;
        source.write_u32_be(self.writeCount)?;
        source.write_u64_be(self.encodingsBitmap)?;
        for word in &self.finderInfo {
            source.write_u32_be(*word)?;
        }
        self.allocationFile.export(source)?;
        self.extentsFile.export(source)?;
        self.catalogFile.export(source)?;
        self.attributesFile.export(source)?;
        self.startupFile.export(source)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(kHFSVolumeHeaderSize);
        self.export(&mut buffer)?;
        Ok(buffer)
    }

    /// Byte offset of the alternate header near the end of the volume.
    pub fn mirror_offset(&self) -> u64 {
        self.totalBlocks as u64 * self.blockSize as u64 - kHFSVolumeHeaderOffset
    }
}

pub const HFSP_SIGNATURE: u16 = 0x482b;
pub const HFSX_SIGNATURE: u16 = 0x4858;
pub const kHFSPlusVersion: u16 = 4;
pub const kHFSXVersion: u16 = 5;

pub const kHFSVolumeHeaderOffset: u64 = 1024;
pub const kHFSVolumeHeaderSize: usize = 512;

#[derive(Debug, PartialEq, Eq)]
pub struct BTNodeDescriptor {
    pub fLink: u32,
    pub bLink: u32,
    pub kind: i8,
    pub height: u8,
    pub numRecords: u16,
    pub reserved: u16,
}

impl BTNodeDescriptor {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            fLink: source.read_u32_be()?,
            bLink: source.read_u32_be()?,
            kind: source.read_i8()?,
            height: source.read_u8()?,
            numRecords: source.read_u16_be()?,
            reserved: source.read_u16_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.fLink)?;
        source.write_u32_be(self.bLink)?;
        source.write_i8(self.kind)?;
        source.write_u8(self.height)?;
        source.write_u16_be(self.numRecords)?;
        source.write_u16_be(self.reserved)?;
        Ok(())
    }
}

pub const kBTLeafNode: i8 = -1;
pub const kBTIndexNode: i8 = 0;
pub const kBTHeaderNode: i8 = 1;
pub const kBTMapNode: i8 = 2;

pub const kBTBigKeysMask: u32 = 0x0000_0002;
pub const kBTVariableIndexKeysMask: u32 = 0x0000_0004;

pub const kHFSCaseFolding: u8 = 0xCF;
pub const kHFSBinaryCompare: u8 = 0xBC;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTHeaderRec {
    pub treeDepth: u16,
    pub rootNode: u32,
    pub leafRecords: u32,
    pub firstLeafNode: u32,
    pub lastLeafNode: u32,
    pub nodeSize: u16,
    pub maxKeyLength: u16,
    pub totalNodes: u32,
    pub freeNodes: u32,
    pub reserved1: u16,
    pub clumpSize: u32,
    pub btreeType: u8,
    pub keyCompareType: u8,
    pub attributes: u32,
    pub reserved3: [u32; 16],
}

impl BTHeaderRec {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            treeDepth: source.read_u16_be()?,
            rootNode: source.read_u32_be()?,
            leafRecords: source.read_u32_be()?,
            firstLeafNode: source.read_u32_be()?,
            lastLeafNode: source.read_u32_be()?,
            nodeSize: source.read_u16_be()?,
            maxKeyLength: source.read_u16_be()?,
            totalNodes: source.read_u32_be()?,
            freeNodes: source.read_u32_be()?,
            reserved1: source.read_u16_be()?,
            clumpSize: source.read_u32_be()?,
            btreeType: source.read_u8()?,
            keyCompareType: source.read_u8()?,
            attributes: source.read_u32_be()?,
            reserved3: [
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
            ],
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.treeDepth)?;
        source.write_u32_be(self.rootNode)?;
        source.write_u32_be(self.leafRecords)?;
        source.write_u32_be(self.firstLeafNode)?;
        source.write_u32_be(self.lastLeafNode)?;
        source.write_u16_be(self.nodeSize)?;
        source.write_u16_be(self.maxKeyLength)?;
        source.write_u32_be(self.totalNodes)?;
        source.write_u32_be(self.freeNodes)?;
        source.write_u16_be(self.reserved1)?;
        source.write_u32_be(self.clumpSize)?;
        source.write_u8(self.btreeType)?;
        source.write_u8(self.keyCompareType)?;
        source.write_u32_be(self.attributes)?;
        for r in &self.reserved3 {
            source.write_u32_be(*r)?;
        }
        Ok(())
    }
}

pub type HFSCatalogNodeID = u32;
pub const kHFSRootParentID: HFSCatalogNodeID = 1;
pub const kHFSRootFolderID: HFSCatalogNodeID = 2;
pub const kHFSExtentsFileID: HFSCatalogNodeID = 3;
pub const kHFSCatalogFileID: HFSCatalogNodeID = 4;
pub const kHFSBadBlockFileID: HFSCatalogNodeID = 5;
pub const kHFSAllocationFileID: HFSCatalogNodeID = 6;
pub const kHFSStartupFileID: HFSCatalogNodeID = 7;
pub const kHFSAttributesFileID: HFSCatalogNodeID = 8;
pub const kHFSFirstUserCatalogNodeID: HFSCatalogNodeID = 16;

pub const kHFSDataForkType: u8 = 0x00;
pub const kHFSResourceForkType: u8 = 0xFF;

pub const kHFSThreadExistsMask: u16 = 0x0002;

pub const kHFSPlusFolderRecord: i16 = 0x0001;
pub const kHFSPlusFileRecord: i16 = 0x0002;
pub const kHFSPlusFolderThreadRecord: i16 = 0x0003;
pub const kHFSPlusFileThreadRecord: i16 = 0x0004;

#[derive(Debug, Copy, Clone)]
pub struct HFSPlusCatalogFolder {
    pub flags: u16,
    pub valence: u32,
    pub folderID: HFSCatalogNodeID,
    pub createDate: u32,
    pub contentModDate: u32,
    pub attributeModDate: u32,
    pub accessDate: u32,
    pub backupDate: u32,
    pub permissions: HFSPlusBSDInfo,
    pub userInfo: FinderInfo,
    pub finderInfo: FinderInfo,
    pub textEncoding: u32,
    pub reserved: u32,
}

impl HFSPlusCatalogFolder {
    pub fn new(folder_id: HFSCatalogNodeID, valence: u32, date: u32) -> Self {
        Self {
            flags: 0,
            valence,
            folderID: folder_id,
            createDate: date,
            contentModDate: date,
            attributeModDate: date,
            accessDate: date,
            backupDate: 0,
            permissions: HFSPlusBSDInfo {
                fileMode: S_IFDIR | S_IRWXU | S_IRGRP | S_IXGRP | S_IROTH | S_IXOTH,
                ..Default::default()
            },
            userInfo: FinderInfo::default(),
            finderInfo: FinderInfo::default(),
            textEncoding: 0,
            reserved: 0,
        }
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            flags: source.read_u16_be()?,
            valence: source.read_u32_be()?,
            folderID: source.read_u32_be()?,
            createDate: source.read_u32_be()?,
            contentModDate: source.read_u32_be()?,
            attributeModDate: source.read_u32_be()?,
            accessDate: source.read_u32_be()?,
            backupDate: source.read_u32_be()?,
            permissions: HFSPlusBSDInfo::import(source)?,
            userInfo: FinderInfo::import(source)?,
            finderInfo: FinderInfo::import(source)?,
            textEncoding: source.read_u32_be()?,
            reserved: source.read_u32_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.flags)?;
        source.write_u32_be(self.valence)?;
        source.write_u32_be(self.folderID)?;
        source.write_u32_be(self.createDate)?;
        source.write_u32_be(self.contentModDate)?;
        source.write_u32_be(self.attributeModDate)?;
        source.write_u32_be(self.accessDate)?;
        source.write_u32_be(self.backupDate)?;
        self.permissions.export(source)?;
        self.userInfo.export(source)?;
        self.finderInfo.export(source)?;
        source.write_u32_be(self.textEncoding)?;
        source.write_u32_be(self.reserved)?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone)]
pub struct HFSPlusCatalogFile {
    pub flags: u16,
    pub reserved1: u32,
    pub fileID: HFSCatalogNodeID,
    pub createDate: u32,
    pub contentModDate: u32,
    pub attributeModDate: u32,
    pub accessDate: u32,
    pub backupDate: u32,
    pub permissions: HFSPlusBSDInfo,
    pub userInfo: FinderInfo,
    pub finderInfo: FinderInfo,
    pub textEncoding: u32,
    pub reserved2: u32,
    pub dataFork: HFSPlusForkData,
    pub resourceFork: HFSPlusForkData,
}

impl HFSPlusCatalogFile {
    pub fn new(file_id: HFSCatalogNodeID, data_fork: HFSPlusForkData, date: u32) -> Self {
        Self {
            flags: kHFSThreadExistsMask,
            reserved1: 0,
            fileID: file_id,
            createDate: date,
            contentModDate: date,
            attributeModDate: date,
            accessDate: date,
            backupDate: 0,
            permissions: HFSPlusBSDInfo {
                fileMode: S_IFREG | S_IRUSR | S_IWUSR | S_IRGRP | S_IROTH,
                ..Default::default()
            },
            userInfo: FinderInfo::default(),
            finderInfo: FinderInfo::default(),
            textEncoding: 0,
            reserved2: 0,
            dataFork: data_fork,
            resourceFork: HFSPlusForkData::default(),
        }
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            flags: source.read_u16_be()?,
            reserved1: source.read_u32_be()?,
            fileID: source.read_u32_be()?,
            createDate: source.read_u32_be()?,
            contentModDate: source.read_u32_be()?,
            attributeModDate: source.read_u32_be()?,
            accessDate: source.read_u32_be()?,
            backupDate: source.read_u32_be()?,
            permissions: HFSPlusBSDInfo::import(source)?,
            userInfo: FinderInfo::import(source)?,
            finderInfo: FinderInfo::import(source)?,
            textEncoding: source.read_u32_be()?,
            reserved2: source.read_u32_be()?,
            dataFork: HFSPlusForkData::import(source)?,
            resourceFork: HFSPlusForkData::import(source)?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.flags)?;
        source.write_u32_be(self.reserved1)?;
        source.write_u32_be(self.fileID)?;
        source.write_u32_be(self.createDate)?;
        source.write_u32_be(self.contentModDate)?;
        source.write_u32_be(self.attributeModDate)?;
        source.write_u32_be(self.accessDate)?;
        source.write_u32_be(self.backupDate)?;
        self.permissions.export(source)?;
        self.userInfo.export(source)?;
        self.finderInfo.export(source)?;
        source.write_u32_be(self.textEncoding)?;
        source.write_u32_be(self.reserved2)?;
        self.dataFork.export(source)?;
        self.resourceFork.export(source)?;
        Ok(())
    }
}

/// Finder metadata carried through unchanged: `FileInfo`/`FolderInfo` and
/// their extended halves are 16 bytes each.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FinderInfo(pub [u8; 16]);

impl FinderInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        let mut bytes = [0; 16];
        source.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_all(&self.0)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct HFSPlusExtentKey {
    pub keyLength: u16,
    pub forkType: u8,
    pub pad: u8,
    pub fileID: u32,
    pub startBlock: u32,
}
impl HFSPlusExtentKey {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            keyLength: source.read_u16_be()?,
            forkType: source.read_u8()?,
            pad: source.read_u8()?,
            fileID: source.read_u32_be()?,
            startBlock: source.read_u32_be()?,
        })
    }
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.keyLength)?;
        source.write_u8(self.forkType)?;
        source.write_u8(self.pad)?;
        source.write_u32_be(self.fileID)?;
        source.write_u32_be(self.startBlock)?;
        Ok(())
    }
}

/// Extents-overflow key. Ordered by file, then fork, then the logical block
/// the record's first descriptor starts at.
#[derive(Debug, Copy, Clone)]
pub struct ExtentKey(pub HFSPlusExtentKey);

impl ExtentKey {
    pub fn new(file_id: HFSCatalogNodeID, fork_type: u8, start_block: u32) -> Self {
        ExtentKey(HFSPlusExtentKey {
            keyLength: 10,
            forkType: fork_type,
            pad: 0,
            fileID: file_id,
            startBlock: start_block,
        })
    }
}

impl crate::Key for ExtentKey {
    fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(ExtentKey(HFSPlusExtentKey::import(source)?))
    }

    fn export(&self, source: &mut dyn Write) -> Result<()> {
        self.0.export(source)
    }
}

impl core::cmp::PartialOrd for ExtentKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl core::cmp::Ord for ExtentKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0
            .fileID
            .cmp(&other.0.fileID)
            .then(self.0.forkType.cmp(&other.0.forkType))
            .then(self.0.startBlock.cmp(&other.0.startBlock))
    }
}

impl core::cmp::PartialEq for ExtentKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == core::cmp::Ordering::Equal
    }
}

impl core::cmp::Eq for ExtentKey {}

#[derive(Debug, Clone)]
pub struct CatalogKey<S = crate::HFSString> {
    pub _case_match: bool,
    pub parent_id: HFSCatalogNodeID,
    pub node_name: S,
}

impl<S: crate::HFSStringTrait> CatalogKey<S> {
    pub fn new(parent_id: HFSCatalogNodeID, name: Vec<u16>) -> Self {
        Self {
            _case_match: false,
            parent_id,
            node_name: S::from_vec(name),
        }
    }

    // parentID, then a length-prefixed UTF-16 name. Shared by keys and thread records.
    fn import_body(source: &mut dyn Read) -> Result<Self> {
        let parent_id = source.read_u32_be()?;
        let count = source.read_u16_be()?;
        let mut node_name = Vec::with_capacity(count as usize);
        for _ in 0..count as usize {
            node_name.push(source.read_u16_be()?);
        }
        Ok(Self::new(parent_id, node_name))
    }

    fn export_body(&self, source: &mut dyn Write) -> Result<()> {
        let name = self.node_name.as_slice();
        source.write_u32_be(self.parent_id)?;
        source.write_u16_be(name.len() as u16)?;
        for c in name {
            source.write_u16_be(*c)?;
        }
        Ok(())
    }
}

impl<S: crate::HFSStringTrait> crate::Key for CatalogKey<S> {
    fn import(source: &mut dyn Read) -> Result<Self> {
        let key_length = source.read_u16_be()?;
        if key_length < 6 {
            return Err(crate::Error::InvalidRecordKey);
        }
        Self::import_body(source)
    }

    fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(6 + 2 * self.node_name.as_slice().len() as u16)?;
        self.export_body(source)
    }
}

impl<S: Ord> core::cmp::PartialOrd for CatalogKey<S> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: Ord> core::cmp::Ord for CatalogKey<S> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.parent_id
            .cmp(&other.parent_id)
            .then_with(|| self.node_name.cmp(&other.node_name))
    }
}

impl<S: PartialEq + Ord> core::cmp::PartialEq for CatalogKey<S> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == core::cmp::Ordering::Equal
    }
}

impl<S: Eq + Ord> core::cmp::Eq for CatalogKey<S> {}

#[derive(Debug, Clone)]
pub enum CatalogBody<S = crate::HFSString> {
    Folder(HFSPlusCatalogFolder),
    File(HFSPlusCatalogFile),
    FolderThread(CatalogKey<S>),
    FileThread(CatalogKey<S>),
}

#[derive(Debug, Clone)]
pub struct CatalogRecord<S = crate::HFSString> {
    pub key: CatalogKey<S>,
    pub body: CatalogBody<S>,
}

impl<S: crate::HFSStringTrait> crate::Record<CatalogKey<S>> for CatalogRecord<S> {
    fn import(source: &mut dyn Read, key: CatalogKey<S>) -> Result<Self> {
        let record_type = source.read_i16_be()?;
        let body = match record_type {
            kHFSPlusFolderRecord => CatalogBody::Folder(HFSPlusCatalogFolder::import(source)?),
            kHFSPlusFileRecord => CatalogBody::File(HFSPlusCatalogFile::import(source)?),
            kHFSPlusFolderThreadRecord | kHFSPlusFileThreadRecord => {
                let _reserved = source.read_i16_be()?;
                let to_key = CatalogKey::import_body(source)?;
                if record_type == kHFSPlusFolderThreadRecord {
                    CatalogBody::FolderThread(to_key)
                } else {
                    CatalogBody::FileThread(to_key)
                }
            }
            _ => {
                return Err(crate::Error::InvalidRecordType);
            }
        };
        Ok(CatalogRecord { key, body })
    }

    fn export(&self, source: &mut dyn Write) -> Result<()> {
        match &self.body {
            CatalogBody::Folder(folder) => {
                source.write_i16_be(kHFSPlusFolderRecord)?;
                folder.export(source)
            }
            CatalogBody::File(file) => {
                source.write_i16_be(kHFSPlusFileRecord)?;
                file.export(source)
            }
            CatalogBody::FolderThread(to_key) | CatalogBody::FileThread(to_key) => {
                let record_type = match self.body {
                    CatalogBody::FolderThread(_) => kHFSPlusFolderThreadRecord,
                    _ => kHFSPlusFileThreadRecord,
                };
                source.write_i16_be(record_type)?;
                source.write_i16_be(0)?;
                to_key.export_body(source)
            }
        }
    }

    fn get_key(&self) -> &CatalogKey<S> {
        &self.key
    }
}

#[derive(Debug, Clone)]
pub struct ExtentRecord {
    pub key: ExtentKey,
    pub body: HFSPlusExtentRecord,
}

impl crate::Record<ExtentKey> for ExtentRecord {
    fn import(source: &mut dyn Read, key: ExtentKey) -> Result<Self> {
        let body = import_record(source)?;
        Ok(ExtentRecord { key, body })
    }

    fn export(&self, source: &mut dyn Write) -> Result<()> {
        export_record(&self.body, source)
    }

    fn get_key(&self) -> &ExtentKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cursor, HFSString, Key, Record};

    #[test]
    fn volume_header_is_512_bytes_and_round_trips() -> anyhow::Result<()> {
        let mut source = Cursor::new(alloc::vec![0u8; 512]);
        let mut header = HFSPlusVolumeHeader::import(&mut source)?;
        header.signature = HFSP_SIGNATURE;
        header.blockSize = 4096;
        header.totalBlocks = 100;
        header.catalogFile.extents[0] = HFSPlusExtentDescriptor {
            startBlock: 7,
            blockCount: 3,
        };
        let bytes = header.to_bytes()?;
        assert_eq!(bytes.len(), kHFSVolumeHeaderSize);
        let again = HFSPlusVolumeHeader::import(&mut Cursor::new(&bytes))?;
        assert_eq!(again, header);
        assert_eq!(again.mirror_offset(), 100 * 4096 - 1024);
        Ok(())
    }

    #[test]
    fn catalog_records_have_on_disk_sizes() -> anyhow::Result<()> {
        let folder = CatalogRecord::<HFSString> {
            key: CatalogKey::new(kHFSRootParentID, "Vol".encode_utf16().collect()),
            body: CatalogBody::Folder(HFSPlusCatalogFolder::new(kHFSRootFolderID, 0, 0)),
        };
        let mut bytes = Vec::new();
        folder.key.export(&mut bytes)?;
        assert_eq!(bytes.len(), 2 + 6 + 6);
        bytes.clear();
        folder.export(&mut bytes)?;
        assert_eq!(bytes.len(), 88);

        let file = CatalogBody::<HFSString>::File(HFSPlusCatalogFile::new(
            kHFSFirstUserCatalogNodeID,
            HFSPlusForkData::default(),
            0,
        ));
        let file = CatalogRecord {
            key: folder.key.clone(),
            body: file,
        };
        bytes.clear();
        file.export(&mut bytes)?;
        assert_eq!(bytes.len(), 248);
        Ok(())
    }

    #[test]
    fn thread_record_round_trips() -> anyhow::Result<()> {
        let key = CatalogKey::<HFSString>::new(kHFSRootFolderID, Vec::new());
        let record = CatalogRecord {
            key: key.clone(),
            body: CatalogBody::FolderThread(CatalogKey::new(
                kHFSRootParentID,
                "Untitled".encode_utf16().collect(),
            )),
        };
        let mut bytes = Vec::new();
        record.export(&mut bytes)?;
        let parsed = CatalogRecord::import(&mut Cursor::new(&bytes), key)?;
        match parsed.body {
            CatalogBody::FolderThread(to) => {
                assert_eq!(to.parent_id, kHFSRootParentID);
                assert_eq!(alloc::format!("{}", to.node_name), "Untitled");
            }
            other => panic!("unexpected body {other:?}"),
        }
        Ok(())
    }
}
