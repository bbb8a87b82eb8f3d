//! The extents-overflow tree, seen from raw files.
//!
//! Raw files only need to search, add and remove 8-descriptor records keyed
//! by `(fileID, forkType, startBlock)`. [`ExtentsFile`] backs that with the
//! volume's extents file; [`MemoryExtents`] keeps records in memory only.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use log::debug;

use crate::rawfile::RawFile;
use crate::{
    BTHeaderRec, BTree, Error, ExtentKey, ExtentRecord, HFSPlusExtentRecord, Result, VirtualIo,
    build_header_node, build_leaf_node,
};

pub trait ExtentsOverflow {
    /// The record with the greatest key not above `key`, and whether the keys
    /// are equal.
    fn search(&mut self, key: &ExtentKey) -> Result<Option<(ExtentRecord, bool)>>;

    fn add(&mut self, record: ExtentRecord) -> Result<()>;

    fn remove(&mut self, key: &ExtentKey) -> Result<()>;

    /// Fails if swapping `removed` for `added` would leave records that
    /// [`flush`](Self::flush) cannot store. Nothing is changed either way.
    fn check_update(&self, _removed: &[ExtentKey], _added: &[ExtentRecord]) -> Result<()> {
        Ok(())
    }

    /// Persists pending changes.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryExtents {
    records: BTreeMap<ExtentKey, HFSPlusExtentRecord>,
}

impl MemoryExtents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = ExtentRecord> + '_ {
        self.records
            .iter()
            .map(|(key, body)| ExtentRecord { key: *key, body: *body })
    }
}

impl ExtentsOverflow for MemoryExtents {
    fn search(&mut self, key: &ExtentKey) -> Result<Option<(ExtentRecord, bool)>> {
        Ok(self.records.range(..=*key).next_back().map(|(k, body)| {
            (
                ExtentRecord {
                    key: *k,
                    body: *body,
                },
                k == key,
            )
        }))
    }

    fn add(&mut self, record: ExtentRecord) -> Result<()> {
        self.records.insert(record.key, record.body);
        Ok(())
    }

    fn remove(&mut self, key: &ExtentKey) -> Result<()> {
        self.records
            .remove(key)
            .map(|_| ())
            .ok_or(Error::KeyNotFound)
    }
}

/// The volume's extents-overflow file.
///
/// Records are loaded when the file is opened and written back by
/// [`ExtentsOverflow::flush`] as a single root leaf. Trees that need more
/// than one leaf are left to a full B-tree implementation.
pub struct ExtentsFile<IO: VirtualIo> {
    file: RawFile<IO>,
    header: BTHeaderRec,
    records: MemoryExtents,
    dirty: bool,
}

impl<IO: VirtualIo> ExtentsFile<IO> {
    pub fn open(file: RawFile<IO>) -> Result<Self> {
        let mut tree = BTree::<RawFile<IO>, ExtentKey, ExtentRecord>::open(file)?;
        let mut records = MemoryExtents::new();
        for record in tree.leaf_records()? {
            records.add((*record).clone())?;
        }
        debug!(
            "extents overflow file: {} records, {} nodes",
            records.len(),
            tree.header.header.totalNodes
        );
        Ok(Self {
            header: tree.header.header.clone(),
            file: tree.fork,
            records,
            dirty: false,
        })
    }

    pub fn records(&self) -> &MemoryExtents {
        &self.records
    }
}

impl<IO: VirtualIo> ExtentsOverflow for ExtentsFile<IO> {
    fn search(&mut self, key: &ExtentKey) -> Result<Option<(ExtentRecord, bool)>> {
        self.records.search(key)
    }

    fn add(&mut self, record: ExtentRecord) -> Result<()> {
        self.dirty = true;
        self.records.add(record)
    }

    fn remove(&mut self, key: &ExtentKey) -> Result<()> {
        self.dirty = true;
        self.records.remove(key)
    }

    fn check_update(&self, removed: &[ExtentKey], added: &[ExtentRecord]) -> Result<()> {
        let mut records = self.records.records.clone();
        for key in removed {
            records.remove(key);
        }
        for record in added {
            records.insert(record.key, record.body);
        }
        let records: Vec<ExtentRecord> = records
            .into_iter()
            .map(|(key, body)| ExtentRecord { key, body })
            .collect();
        root_leaf(&self.header, &records).map(|_| ())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let records: Vec<ExtentRecord> = self.records.records().collect();
        let node_size = self.header.nodeSize;
        let mut header = self.header.clone();
        let leaf = root_leaf(&header, &records)?;
        if leaf.is_some() {
            header.treeDepth = 1;
            header.rootNode = 1;
            header.firstLeafNode = 1;
            header.lastLeafNode = 1;
            header.freeNodes = header.totalNodes - 2;
        } else {
            header.treeDepth = 0;
            header.rootNode = 0;
            header.firstLeafNode = 0;
            header.lastLeafNode = 0;
            header.freeNodes = header.totalNodes.saturating_sub(1);
        }
        header.leafRecords = records.len() as u32;

        let used: &[u32] = if leaf.is_some() { &[0, 1] } else { &[0] };
        let header_node = build_header_node(&header, used)?;
        self.file.write_at(0, &header_node)?;
        if let Some(leaf) = leaf {
            self.file.write_at(node_size as u64, &leaf)?;
        }
        debug!("wrote {} extents overflow records", records.len());
        self.header = header;
        self.dirty = false;
        Ok(())
    }
}

/// Encodes `records` as node 1, the tree's only leaf. An empty set needs no
/// leaf at all.
fn root_leaf(header: &BTHeaderRec, records: &[ExtentRecord]) -> Result<Option<Vec<u8>>> {
    if records.is_empty() {
        return Ok(None);
    }
    if header.totalNodes < 2 {
        return Err(Error::NoSpace {
            needed: 2,
            free: header.totalNodes as u64,
        });
    }
    build_leaf_node::<ExtentKey, ExtentRecord>(header.nodeSize, records)
        .map(Some)
        .map_err(|_| Error::InvalidData(String::from("extents overflow records exceed one node")))
}
