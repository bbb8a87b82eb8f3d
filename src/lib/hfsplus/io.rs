//! Positional byte devices.
//!
//! Every layer of the image stack (flat files, decompressed UDIF images,
//! decrypted FileVault containers, partition windows) is a [`VirtualIo`].
//! Layers own the device below them; dropping or closing the top of the
//! stack releases everything underneath.

use alloc::string::String;
use alloc::vec::Vec;

use crate::{Error, Read, Result, Seek, SeekFrom, Write};

pub trait VirtualIo {
    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at end of device.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Current length of the device in bytes.
    fn size(&mut self) -> Result<u64>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_exact_at(&mut self, mut offset: u64, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf)? {
                0 => return Err(Error::InvalidData(String::from("Unexpected EOF"))),
                n => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
            }
        }
        Ok(())
    }

    fn write_all_at(&mut self, mut offset: u64, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write_at(offset, buf)? {
                0 => return Err(Error::InvalidData(String::from("Failed to write all data"))),
                n => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
            }
        }
        Ok(())
    }
}

impl<T: VirtualIo + ?Sized> VirtualIo for alloc::boxed::Box<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        (**self).write_at(offset, buf)
    }
    fn size(&mut self) -> Result<u64> {
        (**self).size()
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl<T: VirtualIo + ?Sized> VirtualIo for &mut T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        (**self).write_at(offset, buf)
    }
    fn size(&mut self) -> Result<u64> {
        (**self).size()
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Growable in-memory device.
#[derive(Debug, Default, Clone)]
pub struct MemIo {
    data: Vec<u8>,
}

impl MemIo {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn zeroed(len: usize) -> Self {
        Self { data: alloc::vec![0; len] }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl VirtualIo for MemIo {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = core::cmp::min(buf.len(), self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

/// A fixed window `[offset, offset + length)` of another device.
pub struct SubIo<V> {
    inner: V,
    offset: u64,
    length: u64,
}

impl<V: VirtualIo> SubIo<V> {
    pub fn new(inner: V, offset: u64, length: u64) -> Self {
        Self {
            inner,
            offset,
            length,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> V {
        self.inner
    }

    fn clamp(&self, offset: u64, len: usize) -> usize {
        if offset >= self.length {
            0
        } else {
            core::cmp::min(len as u64, self.length - offset) as usize
        }
    }
}

impl<V: VirtualIo> VirtualIo for SubIo<V> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let n = self.clamp(offset, buf.len());
        if n == 0 {
            return Ok(0);
        }
        self.inner.read_at(self.offset + offset, &mut buf[..n])
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        let n = self.clamp(offset, buf.len());
        if n == 0 {
            return Ok(0);
        }
        self.inner.write_at(self.offset + offset, &buf[..n])
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.length)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// Cursor over a [`VirtualIo`], giving it stream semantics.
pub struct VioStream<V> {
    io: V,
    pos: u64,
}

impl<V: VirtualIo> VioStream<V> {
    pub fn new(io: V) -> Self {
        Self { io, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.io
    }

    pub fn into_inner(self) -> V {
        self.io
    }

    fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(s) => s as i64,
            SeekFrom::Current(c) => self.pos as i64 + c,
            SeekFrom::End(e) => self.io.size()? as i64 + e,
        };
        if new_pos < 0 {
            return Err(Error::InvalidData(String::from("Invalid seek")));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

impl<V: VirtualIo> Read for VioStream<V> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.io.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<V: VirtualIo> Write for VioStream<V> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<V: VirtualIo> Seek for VioStream<V> {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.seek_to(pos)
    }
}

#[cfg(not(target_os = "none"))]
mod host {
    use super::*;
    use std::io::{self, Read as _, Seek as _, Write as _};
    use std::string::ToString;

    impl From<io::Error> for Error {
        fn from(e: io::Error) -> Self {
            Error::Io(e.to_string())
        }
    }

    fn to_io(e: Error) -> io::Error {
        io::Error::other(e.to_string())
    }

    /// Any std stream (usually a `File`) as a read/write device.
    pub struct StdIo<T> {
        inner: T,
    }

    impl<T: io::Read + io::Write + io::Seek> StdIo<T> {
        pub fn new(inner: T) -> Self {
            Self { inner }
        }

        pub fn into_inner(self) -> T {
            self.inner
        }
    }

    impl<T: io::Read + io::Write + io::Seek> VirtualIo for StdIo<T> {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            self.inner.seek(io::SeekFrom::Start(offset))?;
            Ok(self.inner.read(buf)?)
        }

        fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
            self.inner.seek(io::SeekFrom::Start(offset))?;
            Ok(self.inner.write(buf)?)
        }

        fn size(&mut self) -> Result<u64> {
            Ok(self.inner.seek(io::SeekFrom::End(0))?)
        }

        fn flush(&mut self) -> Result<()> {
            Ok(self.inner.flush()?)
        }
    }

    /// A std stream that rejects writes.
    pub struct ReadOnlyIo<T> {
        inner: T,
    }

    impl<T: io::Read + io::Seek> ReadOnlyIo<T> {
        pub fn new(inner: T) -> Self {
            Self { inner }
        }

        pub fn into_inner(self) -> T {
            self.inner
        }
    }

    impl<T: io::Read + io::Seek> VirtualIo for ReadOnlyIo<T> {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            self.inner.seek(io::SeekFrom::Start(offset))?;
            Ok(self.inner.read(buf)?)
        }

        fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> Result<usize> {
            Err(Error::ReadOnly)
        }

        fn size(&mut self) -> Result<u64> {
            Ok(self.inner.seek(io::SeekFrom::End(0))?)
        }
    }

    impl<V: VirtualIo> io::Read for VioStream<V> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.io.read_at(self.pos, buf).map_err(to_io)?;
            self.pos += n as u64;
            Ok(n)
        }
    }

    impl<V: VirtualIo> io::Write for VioStream<V> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.io.write_at(self.pos, buf).map_err(to_io)?;
            self.pos += n as u64;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.io.flush().map_err(to_io)
        }
    }

    impl<V: VirtualIo> io::Seek for VioStream<V> {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            let pos = match pos {
                io::SeekFrom::Start(s) => SeekFrom::Start(s),
                io::SeekFrom::Current(c) => SeekFrom::Current(c),
                io::SeekFrom::End(e) => SeekFrom::End(e),
            };
            self.seek_to(pos).map_err(to_io)
        }
    }
}

#[cfg(not(target_os = "none"))]
pub use host::{ReadOnlyIo, StdIo};
