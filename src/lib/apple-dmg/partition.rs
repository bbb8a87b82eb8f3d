//! Apple Driver Descriptor Map and Apple Partition Map.

use {
    crate::{DmgError, PartitionChoice, Result, SECTOR_SIZE},
    byteorder::{BigEndian, ByteOrder},
    hfsplus::VirtualIo,
    log::{debug, info},
};

pub const DDM_SIGNATURE: u16 = 0x4552;
pub const APM_SIGNATURE: u16 = 0x504D;

pub const HFS_PARTITION_TYPE: &str = "Apple_HFS";
pub const HFSX_PARTITION_TYPE: &str = "Apple_HFSX";
pub const MAP_PARTITION_TYPE: &str = "Apple_partition_map";

/// Blocks reserved for the map itself when one is created.
pub const MAP_BLOCKS: u32 = 0x3F;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DriverDescriptorRecord {
    pub sb_sig: u16,
    pub sb_blk_size: u16,
    pub sb_blk_count: u32,
    pub sb_dev_type: u16,
    pub sb_dev_id: u16,
    pub sb_data: u32,
    pub sb_drvr_count: u16,
    pub dd_block: u32,
    pub dd_size: u16,
    pub dd_type: u16,
}

impl DriverDescriptorRecord {
    pub fn new(block_size: u16, block_count: u32) -> Self {
        Self {
            sb_sig: DDM_SIGNATURE,
            sb_blk_size: block_size,
            sb_blk_count: block_count,
            ..Default::default()
        }
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        Self {
            sb_sig: BigEndian::read_u16(&b[0..2]),
            sb_blk_size: BigEndian::read_u16(&b[2..4]),
            sb_blk_count: BigEndian::read_u32(&b[4..8]),
            sb_dev_type: BigEndian::read_u16(&b[8..10]),
            sb_dev_id: BigEndian::read_u16(&b[10..12]),
            sb_data: BigEndian::read_u32(&b[12..16]),
            sb_drvr_count: BigEndian::read_u16(&b[16..18]),
            dd_block: BigEndian::read_u32(&b[18..22]),
            dd_size: BigEndian::read_u16(&b[22..24]),
            dd_type: BigEndian::read_u16(&b[24..26]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 512] {
        let mut b = [0u8; 512];
        BigEndian::write_u16(&mut b[0..2], self.sb_sig);
        BigEndian::write_u16(&mut b[2..4], self.sb_blk_size);
        BigEndian::write_u32(&mut b[4..8], self.sb_blk_count);
        BigEndian::write_u16(&mut b[8..10], self.sb_dev_type);
        BigEndian::write_u16(&mut b[10..12], self.sb_dev_id);
        BigEndian::write_u32(&mut b[12..16], self.sb_data);
        BigEndian::write_u16(&mut b[16..18], self.sb_drvr_count);
        BigEndian::write_u32(&mut b[18..22], self.dd_block);
        BigEndian::write_u16(&mut b[22..24], self.dd_size);
        BigEndian::write_u16(&mut b[24..26], self.dd_type);
        b
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn fixed<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0; N];
    let len = text.len().min(N - 1);
    out[..len].copy_from_slice(&text.as_bytes()[..len]);
    out
}

/// One 512-byte partition map entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApplePartition {
    pub pm_sig: u16,
    pub pm_sig_pad: u16,
    pub pm_map_blk_cnt: u32,
    pub pm_py_part_start: u32,
    pub pm_part_blk_cnt: u32,
    pub pm_part_name: [u8; 32],
    pub pm_par_type: [u8; 32],
    pub pm_lg_data_start: u32,
    pub pm_data_cnt: u32,
    pub pm_part_status: u32,
    pub pm_lg_boot_start: u32,
    pub pm_boot_size: u32,
    pub pm_boot_addr: u32,
    pub pm_boot_addr2: u32,
    pub pm_boot_entry: u32,
    pub pm_boot_entry2: u32,
    pub pm_boot_cksum: u32,
    pub pm_processor: [u8; 16],
    pub boot_code: u32,
}

impl ApplePartition {
    pub fn new(name: &str, ty: &str, start: u32, count: u32) -> Self {
        Self {
            pm_sig: APM_SIGNATURE,
            pm_sig_pad: 0,
            pm_map_blk_cnt: 0,
            pm_py_part_start: start,
            pm_part_blk_cnt: count,
            pm_part_name: fixed(name),
            pm_par_type: fixed(ty),
            pm_lg_data_start: 0,
            pm_data_cnt: count,
            pm_part_status: 0x33,
            pm_lg_boot_start: 0,
            pm_boot_size: 0,
            pm_boot_addr: 0,
            pm_boot_addr2: 0,
            pm_boot_entry: 0,
            pm_boot_entry2: 0,
            pm_boot_cksum: 0,
            pm_processor: [0; 16],
            boot_code: 0,
        }
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        let mut pm_part_name = [0; 32];
        pm_part_name.copy_from_slice(&b[16..48]);
        let mut pm_par_type = [0; 32];
        pm_par_type.copy_from_slice(&b[48..80]);
        let mut pm_processor = [0; 16];
        pm_processor.copy_from_slice(&b[120..136]);
        Self {
            pm_sig: BigEndian::read_u16(&b[0..2]),
            pm_sig_pad: BigEndian::read_u16(&b[2..4]),
            pm_map_blk_cnt: BigEndian::read_u32(&b[4..8]),
            pm_py_part_start: BigEndian::read_u32(&b[8..12]),
            pm_part_blk_cnt: BigEndian::read_u32(&b[12..16]),
            pm_part_name,
            pm_par_type,
            pm_lg_data_start: BigEndian::read_u32(&b[80..84]),
            pm_data_cnt: BigEndian::read_u32(&b[84..88]),
            pm_part_status: BigEndian::read_u32(&b[88..92]),
            pm_lg_boot_start: BigEndian::read_u32(&b[92..96]),
            pm_boot_size: BigEndian::read_u32(&b[96..100]),
            pm_boot_addr: BigEndian::read_u32(&b[100..104]),
            pm_boot_addr2: BigEndian::read_u32(&b[104..108]),
            pm_boot_entry: BigEndian::read_u32(&b[108..112]),
            pm_boot_entry2: BigEndian::read_u32(&b[112..116]),
            pm_boot_cksum: BigEndian::read_u32(&b[116..120]),
            pm_processor,
            boot_code: BigEndian::read_u32(&b[136..140]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 512] {
        let mut b = [0u8; 512];
        BigEndian::write_u16(&mut b[0..2], self.pm_sig);
        BigEndian::write_u16(&mut b[2..4], self.pm_sig_pad);
        BigEndian::write_u32(&mut b[4..8], self.pm_map_blk_cnt);
        BigEndian::write_u32(&mut b[8..12], self.pm_py_part_start);
        BigEndian::write_u32(&mut b[12..16], self.pm_part_blk_cnt);
        b[16..48].copy_from_slice(&self.pm_part_name);
        b[48..80].copy_from_slice(&self.pm_par_type);
        BigEndian::write_u32(&mut b[80..84], self.pm_lg_data_start);
        BigEndian::write_u32(&mut b[84..88], self.pm_data_cnt);
        BigEndian::write_u32(&mut b[88..92], self.pm_part_status);
        BigEndian::write_u32(&mut b[92..96], self.pm_lg_boot_start);
        BigEndian::write_u32(&mut b[96..100], self.pm_boot_size);
        BigEndian::write_u32(&mut b[100..104], self.pm_boot_addr);
        BigEndian::write_u32(&mut b[104..108], self.pm_boot_addr2);
        BigEndian::write_u32(&mut b[108..112], self.pm_boot_entry);
        BigEndian::write_u32(&mut b[112..116], self.pm_boot_entry2);
        BigEndian::write_u32(&mut b[116..120], self.pm_boot_cksum);
        b[120..136].copy_from_slice(&self.pm_processor);
        BigEndian::write_u32(&mut b[136..140], self.boot_code);
        b
    }

    pub fn name(&self) -> String {
        c_string(&self.pm_part_name)
    }

    pub fn partition_type(&self) -> String {
        c_string(&self.pm_par_type)
    }

    pub fn is_hfs(&self) -> bool {
        matches!(
            self.partition_type().as_str(),
            HFS_PARTITION_TYPE | HFSX_PARTITION_TYPE
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionMap {
    pub ddm: DriverDescriptorRecord,
    pub entries: Vec<ApplePartition>,
}

impl PartitionMap {
    /// A map whose first entry describes the map itself.
    pub fn new(block_size: u16, block_count: u32) -> Self {
        let mut map = Self {
            ddm: DriverDescriptorRecord::new(block_size, block_count),
            entries: vec![],
        };
        map.push(ApplePartition::new("Apple", MAP_PARTITION_TYPE, 1, MAP_BLOCKS));
        map
    }

    pub fn block_size(&self) -> u64 {
        self.ddm.sb_blk_size as u64
    }

    pub fn push(&mut self, entry: ApplePartition) {
        self.entries.push(entry);
        let count = self.entries.len() as u32;
        for entry in &mut self.entries {
            entry.pm_map_blk_cnt = count;
        }
    }

    /// Reads the map, or `None` when sector 0 is not a driver descriptor.
    pub fn read_from<IO: VirtualIo + ?Sized>(io: &mut IO) -> Result<Option<Self>> {
        let size = io.size()?;
        if size < SECTOR_SIZE {
            return Ok(None);
        }
        let mut block = [0u8; 512];
        io.read_exact_at(0, &mut block)?;
        let ddm = DriverDescriptorRecord::from_bytes(&block);
        if ddm.sb_sig != DDM_SIGNATURE {
            return Ok(None);
        }
        let block_size = ddm.sb_blk_size as u64;
        if block_size < SECTOR_SIZE {
            return Err(DmgError::Corruption(format!(
                "driver descriptor block size {block_size}"
            )));
        }

        let mut entries = vec![];
        let mut count = 1;
        while (entries.len() as u32) < count {
            let offset = block_size * (entries.len() as u64 + 1);
            if offset + SECTOR_SIZE > size {
                break;
            }
            io.read_exact_at(offset, &mut block)?;
            let entry = ApplePartition::from_bytes(&block);
            if entry.pm_sig != APM_SIGNATURE {
                break;
            }
            if entries.is_empty() {
                count = entry.pm_map_blk_cnt;
            }
            entries.push(entry);
        }
        debug!("partition map: {} entries, block size {block_size}", entries.len());
        Ok(Some(Self { ddm, entries }))
    }

    pub fn write_to<IO: VirtualIo + ?Sized>(&self, io: &mut IO) -> Result<()> {
        io.write_all_at(0, &self.ddm.to_bytes())?;
        for (i, entry) in self.entries.iter().enumerate() {
            io.write_all_at(self.block_size() * (i as u64 + 1), &entry.to_bytes())?;
        }
        Ok(())
    }

    /// Byte range of the chosen partition.
    pub fn select(&self, choice: PartitionChoice) -> Result<(u64, u64)> {
        let (index, entry) = match choice {
            PartitionChoice::Auto => self
                .entries
                .iter()
                .enumerate()
                .find(|(_, e)| e.is_hfs())
                .ok_or_else(|| DmgError::NoPartition(String::from("no Apple_HFS partition")))?,
            PartitionChoice::Index(n) => self
                .entries
                .get(n as usize)
                .map(|e| (n as usize, e))
                .ok_or_else(|| DmgError::NoPartition(format!("no partition {n}")))?,
            PartitionChoice::Whole => {
                return Ok((0, self.block_size() * self.ddm.sb_blk_count as u64));
            }
        };
        let offset = entry.pm_py_part_start as u64 * self.block_size();
        let length = entry.pm_part_blk_cnt as u64 * self.block_size();
        info!(
            "selected partition {index} {:?} ({}) at {offset:#x}, {length} bytes",
            entry.name(),
            entry.partition_type()
        );
        Ok((offset, length))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, hfsplus::MemIo};

    fn disk() -> anyhow::Result<MemIo> {
        let mut map = PartitionMap::new(512, 2048);
        map.push(ApplePartition::new("Driver", "Apple_Driver43", 64, 32));
        map.push(ApplePartition::new("disk image", HFSX_PARTITION_TYPE, 96, 1900));
        map.push(ApplePartition::new("", "Apple_Free", 1996, 52));
        let mut io = MemIo::zeroed(2048 * 512);
        map.write_to(&mut io)?;
        Ok(io)
    }

    #[test]
    fn entry_layout() {
        let entry = ApplePartition::new("disk image", HFS_PARTITION_TYPE, 96, 1900);
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[0..2], b"PM");
        assert_eq!(&bytes[16..26], b"disk image");
        assert_eq!(&bytes[48..57], b"Apple_HFS");
        assert_eq!(ApplePartition::from_bytes(&bytes), entry);
        assert!(entry.is_hfs());

        let ddm = DriverDescriptorRecord::new(512, 2048);
        let bytes = ddm.to_bytes();
        assert_eq!(&bytes[0..2], b"ER");
        assert_eq!(DriverDescriptorRecord::from_bytes(&bytes), ddm);
    }

    #[test]
    fn reads_and_selects() -> anyhow::Result<()> {
        let mut io = disk()?;
        let map = PartitionMap::read_from(&mut io)?.ok_or_else(|| anyhow::anyhow!("no map"))?;
        assert_eq!(map.entries.len(), 4);
        assert!(map.entries.iter().all(|e| e.pm_map_blk_cnt == 4));
        assert_eq!(map.entries[2].name(), "disk image");

        assert_eq!(map.select(PartitionChoice::Auto)?, (96 * 512, 1900 * 512));
        assert_eq!(map.select(PartitionChoice::Index(1))?, (64 * 512, 32 * 512));
        assert_eq!(map.select(PartitionChoice::Whole)?, (0, 2048 * 512));
        assert!(matches!(
            map.select(PartitionChoice::Index(9)),
            Err(DmgError::NoPartition(_))
        ));
        Ok(())
    }

    #[test]
    fn stops_at_bad_signature() -> anyhow::Result<()> {
        let mut io = disk()?;
        io.write_all_at(3 * 512, &[0; 2])?;
        let map = PartitionMap::read_from(&mut io)?.ok_or_else(|| anyhow::anyhow!("no map"))?;
        assert_eq!(map.entries.len(), 2);
        assert!(matches!(
            map.select(PartitionChoice::Auto),
            Err(DmgError::NoPartition(_))
        ));
        Ok(())
    }

    #[test]
    fn flat_images_have_no_map() -> anyhow::Result<()> {
        let mut io = MemIo::zeroed(4096);
        assert_eq!(PartitionMap::read_from(&mut io)?, None);
        let mut tiny = MemIo::zeroed(100);
        assert_eq!(PartitionMap::read_from(&mut tiny)?, None);
        Ok(())
    }
}
