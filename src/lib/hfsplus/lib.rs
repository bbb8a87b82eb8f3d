#![no_std]
#![allow(non_snake_case, non_upper_case_globals)]

#[cfg(not(target_os = "none"))]
extern crate std;

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;
use core::marker::PhantomData;

pub mod extents;
pub mod format;
mod hfs_strings;
pub mod internal;
pub mod io;
pub mod rawfile;
pub mod volume;

pub use crate::extents::{ExtentsFile, ExtentsOverflow, MemoryExtents};
pub use crate::format::{FormatOptions, format_volume};
pub use crate::internal::*;
pub use crate::io::{MemIo, SubIo, VioStream, VirtualIo};
#[cfg(not(target_os = "none"))]
pub use crate::io::{ReadOnlyIo, StdIo};
pub use crate::rawfile::{CatalogRef, Extent, RawFile};
pub use crate::volume::{Volume, VolumeAttributes};
use hfs_strings::fast_unicode_compare;

pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("malformed b-tree node")]
    BadNode,
    #[error("invalid record key")]
    InvalidRecordKey,
    #[error("invalid record type")]
    InvalidRecordType,
    #[error("unsupported operation")]
    UnsupportedOperation,
    #[error("key not found")]
    KeyNotFound,
    #[error("volume is corrupt: {0}")]
    Corruption(String),
    #[error("not enough free blocks: {needed} needed, {free} free")]
    NoSpace { needed: u64, free: u64 },
    #[error("device is read-only")]
    ReadOnly,
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = core::result::Result<T, Error>;

pub trait Read {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                }
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            Err(Error::InvalidData(String::from("Unexpected EOF")))
        } else {
            Ok(())
        }
    }
}

pub trait Write {
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => break,
                Ok(n) => buf = &buf[n..],
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            Err(Error::InvalidData(String::from("Failed to write all data")))
        } else {
            Ok(())
        }
    }
}

pub trait Seek {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
}

pub trait ReadExt: Read {
    fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
    fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }
    fn read_u64_be(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
    fn read_i16_be(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
    fn read_i32_be(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }
    fn read_i8(&mut self) -> Result<i8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0] as i8)
    }
}

impl<T: Read + ?Sized> ReadExt for T {}

pub trait WriteExt: Write {
    fn write_u16_be(&mut self, n: u16) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_u32_be(&mut self, n: u32) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_u64_be(&mut self, n: u64) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_i16_be(&mut self, n: i16) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_i32_be(&mut self, n: i32) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_i8(&mut self, n: i8) -> Result<()> {
        self.write_all(&[n as u8])
    }
    fn write_u8(&mut self, n: u8) -> Result<()> {
        self.write_all(&[n])
    }
}

impl<T: Write + ?Sized> WriteExt for T {}

impl Write for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

pub struct Cursor<T> {
    inner: T,
    pos: u64,
}

impl<T: AsRef<[u8]>> Cursor<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, pos: 0 }
    }
}

impl<T: AsRef<[u8]>> Read for Cursor<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.as_ref();
        if self.pos >= inner.len() as u64 {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), (inner.len() as u64 - self.pos) as usize);
        buf[..n].copy_from_slice(&inner[self.pos as usize..self.pos as usize + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<T: AsRef<[u8]>> Seek for Cursor<T> {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let inner = self.inner.as_ref();
        let new_pos = match pos {
            SeekFrom::Start(s) => s as i64,
            SeekFrom::Current(c) => self.pos as i64 + c,
            SeekFrom::End(e) => inner.len() as i64 + e,
        };
        if new_pos < 0 {
            return Err(Error::InvalidData(String::from("Invalid seek")));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

fn fmt_utf16(units: &[u16], f: &mut fmt::Formatter, escape: bool) -> fmt::Result {
    for ch in char::decode_utf16(units.iter().copied()) {
        match ch {
            Ok(ch) => write!(f, "{}", ch)?,
            Err(e) if escape => write!(f, "\\u{{{:04X}}}", e.unpaired_surrogate())?,
            Err(_) => {}
        }
    }
    Ok(())
}

#[derive(Clone, PartialEq, Eq)]
pub struct HFSString(pub Vec<u16>);

impl fmt::Debug for HFSString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_utf16(&self.0, f, true)
    }
}

impl fmt::Display for HFSString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_utf16(&self.0, f, false)
    }
}

impl PartialOrd for HFSString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HFSString {
    fn cmp(&self, other: &Self) -> Ordering {
        fast_unicode_compare(&self.0[..], &other.0[..])
    }
}

pub trait HFSStringTrait:
    fmt::Debug + fmt::Display + Ord + PartialOrd + Eq + PartialEq + Clone + Sized
{
    fn from_vec(v: Vec<u16>) -> Self;
    fn as_slice(&self) -> &[u16];
}

impl HFSStringTrait for HFSString {
    fn from_vec(v: Vec<u16>) -> Self {
        HFSString(v)
    }
    fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct HFSStringBinary(pub Vec<u16>);

impl fmt::Debug for HFSStringBinary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_utf16(&self.0, f, true)
    }
}

impl fmt::Display for HFSStringBinary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_utf16(&self.0, f, false)
    }
}

impl PartialOrd for HFSStringBinary {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HFSStringBinary {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl HFSStringTrait for HFSStringBinary {
    fn from_vec(v: Vec<u16>) -> Self {
        HFSStringBinary(v)
    }
    fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

pub trait Key: fmt::Debug + Ord + PartialOrd + Eq + PartialEq {
    fn import(source: &mut dyn Read) -> Result<Self>
    where
        Self: Sized;
    fn export(&self, source: &mut dyn Write) -> Result<()>;
}

pub trait Record<K> {
    fn import(source: &mut dyn Read, key: K) -> Result<Self>
    where
        Self: Sized;
    fn export(&self, source: &mut dyn Write) -> Result<()>;
    fn get_key(&self) -> &K;
}

pub struct IndexRecord<K> {
    pub key: K,
    pub node_id: u32,
}

impl<K: Key> Record<K> for IndexRecord<K> {
    fn import(source: &mut dyn Read, key: K) -> Result<Self> {
        let node_id = source.read_u32_be()?;
        Ok(IndexRecord { key, node_id })
    }

    fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.node_id)
    }

    fn get_key(&self) -> &K {
        &self.key
    }
}

pub struct HeaderNode {
    pub descriptor: BTNodeDescriptor,
    pub header: BTHeaderRec,
    pub user_data: Vec<u8>,
    pub map: Vec<u8>,
}

pub struct MapNode {
    pub _descriptor: BTNodeDescriptor,
}

pub struct IndexNode<K> {
    pub descriptor: BTNodeDescriptor,
    pub records: Vec<IndexRecord<K>>,
}

pub struct LeafNode<R> {
    pub descriptor: BTNodeDescriptor,
    pub records: Vec<Arc<R>>,
}

pub enum Node<K, R> {
    HeaderNode(HeaderNode),
    MapNode(MapNode),
    IndexNode(IndexNode<K>),
    LeafNode(LeafNode<R>),
}

const NODE_DESCRIPTOR_SIZE: usize = 14;
const HEADER_RECORD_SIZE: usize = 106;
const USER_DATA_SIZE: usize = 128;

/// Record start offsets of a node, plus the free-space offset as the last entry.
fn record_offsets(data: &[u8], num_records: u16) -> Result<Vec<usize>> {
    let num_offsets = num_records as usize + 1;
    if data.len() < NODE_DESCRIPTOR_SIZE + num_offsets * 2 {
        return Err(Error::BadNode);
    }
    let last_offset_pos = data.len() - num_offsets * 2;
    let mut offsets = Vec::with_capacity(num_offsets);
    for idx in 0..num_offsets {
        let offset_pos = data.len() - 2 - 2 * idx;
        let offset = u16::from_be_bytes([data[offset_pos], data[offset_pos + 1]]) as usize;
        if offset < NODE_DESCRIPTOR_SIZE || offset > last_offset_pos {
            return Err(Error::InvalidData(String::from(
                "Invalid record offset value",
            )));
        }
        if let Some(&previous) = offsets.last() {
            if offset < previous {
                return Err(Error::BadNode);
            }
        }
        offsets.push(offset);
    }
    Ok(offsets)
}

impl<K: Key, R: Record<K>> Node<K, R> {
    fn load(data: &[u8]) -> Result<Node<K, R>> {
        let mut cursor = Cursor::new(data);
        let node = BTNodeDescriptor::import(&mut cursor)?;
        let offsets = record_offsets(data, node.numRecords)?;
        let records: Vec<&[u8]> = offsets.windows(2).map(|w| &data[w[0]..w[1]]).collect();

        match node.kind {
            kBTHeaderNode => {
                if records.len() < 3 {
                    return Err(Error::BadNode);
                }
                let mut r0_cursor = Cursor::new(records[0]);
                Ok(Node::HeaderNode(HeaderNode {
                    descriptor: node,
                    header: BTHeaderRec::import(&mut r0_cursor)?,
                    user_data: records[1].to_vec(),
                    map: records[2].to_vec(),
                }))
            }
            kBTMapNode => Ok(Node::MapNode(MapNode { _descriptor: node })),
            kBTIndexNode => {
                let mut r = Vec::<IndexRecord<K>>::with_capacity(records.len());
                for record in &records {
                    let mut v = Cursor::new(record);
                    let key = K::import(&mut v)?;
                    r.push(IndexRecord::import(&mut v, key)?);
                }
                Ok(Node::IndexNode(IndexNode {
                    descriptor: node,
                    records: r,
                }))
            }
            kBTLeafNode => {
                let mut r = Vec::<Arc<R>>::with_capacity(records.len());
                for record in &records {
                    let mut v = Cursor::new(record);
                    let key = K::import(&mut v)?;
                    r.push(Arc::new(R::import(&mut v, key)?));
                }
                Ok(Node::LeafNode(LeafNode {
                    descriptor: node,
                    records: r,
                }))
            }
            _ => Err(Error::InvalidData(String::from("Invalid Node Type"))),
        }
    }
}

/// Lays out `records` in a node of `node_size` bytes behind `descriptor`,
/// with the offset table growing backwards from the end.
pub fn pack_node(
    node_size: u16,
    descriptor: &BTNodeDescriptor,
    records: &[&[u8]],
) -> Result<Vec<u8>> {
    let node_size = node_size as usize;
    let used: usize = records.iter().map(|r| r.len()).sum();
    if NODE_DESCRIPTOR_SIZE + used + 2 * (records.len() + 1) > node_size {
        return Err(Error::InvalidData(String::from(
            "records do not fit in one node",
        )));
    }
    let mut node = Vec::with_capacity(node_size);
    descriptor.export(&mut node)?;
    let mut offsets = Vec::with_capacity(records.len() + 1);
    for record in records {
        offsets.push(node.len() as u16);
        node.extend_from_slice(record);
    }
    offsets.push(node.len() as u16);
    node.resize(node_size, 0);
    for (idx, offset) in offsets.iter().enumerate() {
        let pos = node_size - 2 - 2 * idx;
        node[pos..pos + 2].copy_from_slice(&offset.to_be_bytes());
    }
    Ok(node)
}

/// Builds node 0 of a tree: header record, empty user data and the
/// allocation map (one bit per node, most significant bit first).
pub fn build_header_node(header: &BTHeaderRec, used_nodes: &[u32]) -> Result<Vec<u8>> {
    let node_size = header.nodeSize as usize;
    let map_size = node_size - NODE_DESCRIPTOR_SIZE - HEADER_RECORD_SIZE - USER_DATA_SIZE - 8;
    if header.totalNodes as usize > map_size * 8 {
        return Err(Error::UnsupportedOperation);
    }
    let mut map = vec![0u8; map_size];
    for &node in used_nodes {
        map[node as usize / 8] |= 0x80 >> (node % 8);
    }
    let mut header_bytes = Vec::with_capacity(HEADER_RECORD_SIZE);
    header.export(&mut header_bytes)?;
    let user_data = [0u8; USER_DATA_SIZE];
    let descriptor = BTNodeDescriptor {
        fLink: 0,
        bLink: 0,
        kind: kBTHeaderNode,
        height: 0,
        numRecords: 3,
        reserved: 0,
    };
    pack_node(header.nodeSize, &descriptor, &[&header_bytes, &user_data, &map])
}

/// Builds a root leaf holding already-sorted `(key, record)` pairs.
pub fn build_leaf_node<K: Key, R: Record<K>>(node_size: u16, records: &[R]) -> Result<Vec<u8>> {
    let mut encoded = Vec::with_capacity(records.len());
    for record in records {
        let mut bytes = Vec::new();
        record.get_key().export(&mut bytes)?;
        record.export(&mut bytes)?;
        encoded.push(bytes);
    }
    let slices: Vec<&[u8]> = encoded.iter().map(|r| &r[..]).collect();
    let descriptor = BTNodeDescriptor {
        fLink: 0,
        bLink: 0,
        kind: kBTLeafNode,
        height: 1,
        numRecords: records.len() as u16,
        reserved: 0,
    };
    pack_node(node_size, &descriptor, &slices)
}

// A walk visiting more nodes than the tree holds has hit a link cycle.
fn visit(remaining: &mut usize) -> Result<()> {
    *remaining = remaining
        .checked_sub(1)
        .ok_or_else(|| Error::Corruption(String::from("b-tree links form a cycle")))?;
    Ok(())
}

pub struct BTree<F: Read + Seek, K, R> {
    pub fork: F,
    pub node_size: u16,
    pub header: HeaderNode,
    _key: PhantomData<K>,
    _record: PhantomData<R>,
}

impl<F: Read + Seek, K: Key, R: Record<K>> BTree<F, K, R> {
    pub fn open(mut fork: F) -> Result<BTree<F, K, R>> {
        let mut buffer = vec![0; 512];
        fork.seek(SeekFrom::Start(0))?;
        fork.read_exact(&mut buffer)?;
        let node_size = u16::from_be_bytes([buffer[32], buffer[33]]);
        if node_size < 512 || !node_size.is_power_of_two() {
            return Err(Error::BadNode);
        }

        let mut full_buffer = vec![0; node_size as usize];
        full_buffer[..512].copy_from_slice(&buffer);
        fork.seek(SeekFrom::Start(512))?;
        fork.read_exact(&mut full_buffer[512..])?;

        let header = match Node::<K, R>::load(&full_buffer)? {
            Node::HeaderNode(x) => x,
            _ => return Err(Error::BadNode),
        };
        Ok(BTree {
            fork,
            node_size,
            header,
            _key: PhantomData,
            _record: PhantomData,
        })
    }

    fn read_node(&mut self, node_num: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0; self.node_size as usize];
        self.fork
            .seek(SeekFrom::Start((node_num * self.node_size as usize) as u64))?;
        self.fork.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn get_node(&mut self, node_num: usize) -> Result<Node<K, R>> {
        let buffer = self.read_node(node_num)?;
        Node::<K, R>::load(&buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.header.header.rootNode == 0
    }

    fn walk_limit(&self) -> usize {
        self.header.header.totalNodes as usize
    }

    pub fn get_record(&mut self, key: &K) -> Result<Arc<R>> {
        let (node, index) = self.locate(key)?;
        match node {
            Node::LeafNode(x) => Ok(Arc::clone(&x.records[index])),
            _ => Err(Error::BadNode),
        }
    }

    /// Finds the leaf node holding exactly `key`, returning the node, its
    /// number and the record index within it.
    fn locate_leaf(&mut self, key: &K) -> Result<(Node<K, R>, usize, usize)> {
        if self.is_empty() {
            return Err(Error::KeyNotFound);
        }
        let mut node_id = self.header.header.rootNode as usize;
        let mut remaining = self.walk_limit();
        loop {
            visit(&mut remaining)?;
            match self.get_node(node_id)? {
                Node::IndexNode(x) => {
                    let mut next = match x.records.first() {
                        Some(first) if key >= &first.key => first.node_id,
                        _ => return Err(Error::KeyNotFound),
                    };
                    for record in x.records.iter().skip(1) {
                        if key < &record.key {
                            break;
                        }
                        next = record.node_id;
                    }
                    node_id = next as usize;
                }
                Node::LeafNode(x) => {
                    match x.records.iter().position(|record| key <= record.get_key()) {
                        Some(index) if x.records[index].get_key() == key => {
                            return Ok((Node::LeafNode(x), node_id, index));
                        }
                        Some(_) => return Err(Error::KeyNotFound),
                        None if x.descriptor.fLink == 0 => return Err(Error::KeyNotFound),
                        None => node_id = x.descriptor.fLink as usize,
                    }
                }
                _ => return Err(Error::InvalidRecordType),
            }
        }
    }

    fn locate(&mut self, key: &K) -> Result<(Node<K, R>, usize)> {
        let (node, _, index) = self.locate_leaf(key)?;
        Ok((node, index))
    }

    /// Returns the record with the greatest key not above `key`, and whether
    /// it matched exactly.
    pub fn search(&mut self, key: &K) -> Result<Option<(Arc<R>, bool)>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut node_id = self.header.header.rootNode as usize;
        let mut remaining = self.walk_limit();
        loop {
            visit(&mut remaining)?;
            match self.get_node(node_id)? {
                Node::IndexNode(x) => {
                    let mut next = match x.records.first() {
                        Some(first) => first.node_id,
                        None => return Err(Error::BadNode),
                    };
                    for record in x.records.iter().skip(1) {
                        if key < &record.key {
                            break;
                        }
                        next = record.node_id;
                    }
                    node_id = next as usize;
                }
                Node::LeafNode(x) => {
                    let found = x
                        .records
                        .iter()
                        .take_while(|record| record.get_key() <= key)
                        .last();
                    return Ok(found.map(|record| (Arc::clone(record), record.get_key() == key)));
                }
                _ => return Err(Error::InvalidRecordType),
            }
        }
    }

    pub fn leaf_records(&mut self) -> Result<Vec<Arc<R>>> {
        let mut records = Vec::new();
        if self.is_empty() {
            return Ok(records);
        }
        let mut node_id = self.header.header.firstLeafNode;
        let mut remaining = self.walk_limit();
        while node_id != 0 {
            visit(&mut remaining)?;
            match self.get_node(node_id as usize)? {
                Node::LeafNode(x) => {
                    records.extend(x.records.iter().cloned());
                    node_id = x.descriptor.fLink;
                }
                _ => return Err(Error::BadNode),
            }
        }
        Ok(records)
    }

    pub fn get_record_range(&mut self, first: &K, last: &K) -> Result<Vec<Arc<R>>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let mut remaining = self.walk_limit();
        let root = self.header.header.rootNode as usize;
        self.get_record_range_node(first, last, root, &mut remaining)
    }

    fn get_record_range_node(
        &mut self,
        first: &K,
        last: &K,
        node_id: usize,
        remaining: &mut usize,
    ) -> Result<Vec<Arc<R>>> {
        visit(remaining)?;
        let node = self.get_node(node_id)?;
        match node {
            Node::IndexNode(x) => {
                let mut return_record = match x.records.first() {
                    Some(record) => record,
                    None => return Err(Error::BadNode),
                };
                if &return_record.key >= last {
                    return Ok(Vec::new());
                }
                for record in x.records.iter().skip(1) {
                    if first < &record.key {
                        break;
                    }
                    return_record = record;
                }
                let child = return_record.node_id as usize;
                self.get_record_range_node(first, last, child, remaining)
            }
            Node::LeafNode(mut x) => {
                let mut return_records = Vec::new();
                loop {
                    for record in &x.records {
                        if record.get_key() >= last {
                            break;
                        } else if record.get_key() >= first {
                            return_records.push(Arc::clone(record));
                        }
                    }
                    match x.records.last() {
                        Some(record) if record.get_key() < last && x.descriptor.fLink != 0 => {}
                        _ => break,
                    }
                    visit(remaining)?;
                    let next_node = self.get_node(x.descriptor.fLink as usize)?;
                    x = match next_node {
                        Node::LeafNode(x) => x,
                        _ => return Err(Error::InvalidRecordType),
                    };
                }
                Ok(return_records)
            }
            _ => Err(Error::InvalidRecordType),
        }
    }
}

impl<F: Read + Write + Seek, K: Key, R: Record<K>> BTree<F, K, R> {
    /// Rewrites an existing leaf record in place. The encoded record must
    /// keep its length; anything that would move other records is refused.
    pub fn replace_record(&mut self, record: &R) -> Result<()> {
        let (_, node_id, index) = self.locate_leaf(record.get_key())?;
        let mut buffer = self.read_node(node_id)?;
        let descriptor = BTNodeDescriptor::import(&mut Cursor::new(&buffer))?;
        let offsets = record_offsets(&buffer, descriptor.numRecords)?;
        let (start, end) = (offsets[index], offsets[index + 1]);

        let mut bytes = Vec::with_capacity(end - start);
        record.get_key().export(&mut bytes)?;
        record.export(&mut bytes)?;
        if bytes.len() != end - start {
            return Err(Error::UnsupportedOperation);
        }
        buffer[start..end].copy_from_slice(&bytes);
        self.fork
            .seek(SeekFrom::Start((node_id * self.node_size as usize) as u64))?;
        self.fork.write_all(&buffer)
    }
}
