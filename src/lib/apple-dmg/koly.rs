use {
    crate::{DmgError, Result},
    byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
    std::io::{Read, Seek, SeekFrom, Write},
};

pub const KOLY_SIGNATURE: u32 = 0x6B6F_6C79;
pub const KOLY_SIZE: u64 = 512;

pub const UDIF_FLAG_FLATTENED: u32 = 1;
pub const IMAGE_VARIANT_DEVICE: u32 = 1;
pub const IMAGE_VARIANT_PARTITION: u32 = 2;

pub const CHECKSUM_NONE: u32 = 0;
pub const CHECKSUM_CRC32: u32 = 2;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UdifChecksum {
    pub ty: u32,
    pub size: u32,
    pub data: [u32; 32],
}

impl UdifChecksum {
    pub fn new(ty: u32, value: u32) -> Self {
        let mut data = [0; 32];
        data[0] = value;
        Self { ty, size: 32, data }
    }

    pub fn crc32(value: u32) -> Self {
        Self::new(CHECKSUM_CRC32, value)
    }

    pub fn value(&self) -> u32 {
        self.data[0]
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let ty = r.read_u32::<BigEndian>()?;
        let size = r.read_u32::<BigEndian>()?;
        let mut data = [0; 32];
        r.read_u32_into::<BigEndian>(&mut data)?;
        Ok(Self { ty, size, data })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(self.ty)?;
        w.write_u32::<BigEndian>(self.size)?;
        for word in self.data {
            w.write_u32::<BigEndian>(word)?;
        }
        Ok(())
    }
}

impl From<UdifChecksum> for u32 {
    fn from(checksum: UdifChecksum) -> Self {
        checksum.value()
    }
}

/// The 512-byte `koly` block closing every UDIF image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KolyTrailer {
    pub version: u32,
    pub header_size: u32,
    pub flags: u32,
    pub running_data_fork_offset: u64,
    pub data_fork_offset: u64,
    pub data_fork_length: u64,
    pub rsrc_fork_offset: u64,
    pub rsrc_fork_length: u64,
    pub segment_number: u32,
    pub segment_count: u32,
    pub segment_id: [u8; 16],
    pub data_fork_digest: UdifChecksum,
    pub plist_offset: u64,
    pub plist_length: u64,
    pub code_signature_offset: u64,
    pub code_signature_size: u64,
    pub main_digest: UdifChecksum,
    pub image_variant: u32,
    pub sector_count: u64,
}

impl Default for KolyTrailer {
    fn default() -> Self {
        Self {
            version: 4,
            header_size: KOLY_SIZE as u32,
            flags: UDIF_FLAG_FLATTENED,
            running_data_fork_offset: 0,
            data_fork_offset: 0,
            data_fork_length: 0,
            rsrc_fork_offset: 0,
            rsrc_fork_length: 0,
            segment_number: 1,
            segment_count: 1,
            segment_id: [0; 16],
            data_fork_digest: UdifChecksum::default(),
            plist_offset: 0,
            plist_length: 0,
            code_signature_offset: 0,
            code_signature_size: 0,
            main_digest: UdifChecksum::default(),
            image_variant: IMAGE_VARIANT_DEVICE,
            sector_count: 0,
        }
    }
}

impl KolyTrailer {
    pub fn new(
        data_fork_length: u64,
        sectors: u64,
        plist_offset: u64,
        plist_length: u64,
        data_digest: u32,
        main_digest: u32,
    ) -> Self {
        Self {
            data_fork_length,
            sector_count: sectors,
            plist_offset,
            plist_length,
            data_fork_digest: UdifChecksum::crc32(data_digest),
            main_digest: UdifChecksum::crc32(main_digest),
            ..Default::default()
        }
    }

    /// Reads the trailer from the last 512 bytes of `r`.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> Result<Self> {
        r.seek(SeekFrom::End(-(KOLY_SIZE as i64)))?;
        let signature = r.read_u32::<BigEndian>()?;
        if signature != KOLY_SIGNATURE {
            return Err(DmgError::BadKoly(signature));
        }
        let version = r.read_u32::<BigEndian>()?;
        let header_size = r.read_u32::<BigEndian>()?;
        let flags = r.read_u32::<BigEndian>()?;
        let running_data_fork_offset = r.read_u64::<BigEndian>()?;
        let data_fork_offset = r.read_u64::<BigEndian>()?;
        let data_fork_length = r.read_u64::<BigEndian>()?;
        let rsrc_fork_offset = r.read_u64::<BigEndian>()?;
        let rsrc_fork_length = r.read_u64::<BigEndian>()?;
        let segment_number = r.read_u32::<BigEndian>()?;
        let segment_count = r.read_u32::<BigEndian>()?;
        let mut segment_id = [0; 16];
        r.read_exact(&mut segment_id)?;
        let data_fork_digest = UdifChecksum::read_from(r)?;
        let plist_offset = r.read_u64::<BigEndian>()?;
        let plist_length = r.read_u64::<BigEndian>()?;
        let mut reserved = [0; 64];
        r.read_exact(&mut reserved)?;
        let code_signature_offset = r.read_u64::<BigEndian>()?;
        let code_signature_size = r.read_u64::<BigEndian>()?;
        let mut reserved = [0; 40];
        r.read_exact(&mut reserved)?;
        let main_digest = UdifChecksum::read_from(r)?;
        let image_variant = r.read_u32::<BigEndian>()?;
        let sector_count = r.read_u64::<BigEndian>()?;
        let mut reserved = [0; 12];
        r.read_exact(&mut reserved)?;
        Ok(Self {
            version,
            header_size,
            flags,
            running_data_fork_offset,
            data_fork_offset,
            data_fork_length,
            rsrc_fork_offset,
            rsrc_fork_length,
            segment_number,
            segment_count,
            segment_id,
            data_fork_digest,
            plist_offset,
            plist_length,
            code_signature_offset,
            code_signature_size,
            main_digest,
            image_variant,
            sector_count,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(KOLY_SIGNATURE)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_u32::<BigEndian>(self.header_size)?;
        w.write_u32::<BigEndian>(self.flags)?;
        w.write_u64::<BigEndian>(self.running_data_fork_offset)?;
        w.write_u64::<BigEndian>(self.data_fork_offset)?;
        w.write_u64::<BigEndian>(self.data_fork_length)?;
        w.write_u64::<BigEndian>(self.rsrc_fork_offset)?;
        w.write_u64::<BigEndian>(self.rsrc_fork_length)?;
        w.write_u32::<BigEndian>(self.segment_number)?;
        w.write_u32::<BigEndian>(self.segment_count)?;
        w.write_all(&self.segment_id)?;
        self.data_fork_digest.write_to(w)?;
        w.write_u64::<BigEndian>(self.plist_offset)?;
        w.write_u64::<BigEndian>(self.plist_length)?;
        w.write_all(&[0; 64])?;
        w.write_u64::<BigEndian>(self.code_signature_offset)?;
        w.write_u64::<BigEndian>(self.code_signature_size)?;
        w.write_all(&[0; 40])?;
        self.main_digest.write_to(w)?;
        w.write_u32::<BigEndian>(self.image_variant)?;
        w.write_u64::<BigEndian>(self.sector_count)?;
        w.write_all(&[0; 12])?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(KOLY_SIZE as usize);
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Cursor};

    #[test]
    fn read_koly_trailer() -> anyhow::Result<()> {
        let mut koly = KolyTrailer::new(0x1000, 300, 0x1000, 0x345, 0xDEAD_BEEF, 0x0BAD_F00D);
        koly.segment_id = [7; 16];
        koly.image_variant = IMAGE_VARIANT_PARTITION;
        let bytes = koly.to_bytes()?;
        assert_eq!(bytes.len(), KOLY_SIZE as usize);
        assert_eq!(&bytes[..4], b"koly");
        // data fork checksum value, then xml offset
        assert_eq!(&bytes[88..92], &0xDEAD_BEEFu32.to_be_bytes());
        assert_eq!(&bytes[216..224], &0x1000u64.to_be_bytes());
        assert_eq!(&bytes[488..492], &IMAGE_VARIANT_PARTITION.to_be_bytes());

        let mut image = vec![0xAAu8; 4096];
        image.extend_from_slice(&bytes);
        let koly2 = KolyTrailer::read_from(&mut Cursor::new(&image))?;
        assert_eq!(koly, koly2);
        assert_eq!(u32::from(koly2.main_digest), 0x0BAD_F00D);
        Ok(())
    }

    #[test]
    fn rejects_bad_magic() {
        let image = vec![0u8; 1024];
        assert!(matches!(
            KolyTrailer::read_from(&mut Cursor::new(&image)),
            Err(DmgError::BadKoly(0))
        ));
    }
}
