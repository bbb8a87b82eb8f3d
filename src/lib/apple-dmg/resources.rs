//! The XML resource directory referenced by the koly trailer.

use {
    crate::{BlkxTable, DmgError, KolyTrailer, Result, base64},
    byteorder::{BigEndian, ReadBytesExt},
    hfsplus::VirtualIo,
    log::debug,
    serde::{Deserialize, Serialize},
    serde_bytes::ByteBuf,
    std::collections::BTreeMap,
};

pub const ATTRIBUTE_HDIUTIL: u16 = 0x0050;

pub const PLIST_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE plist PUBLIC \"-//Apple Computer//DTD PLIST 1.0//EN\" \
\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
<plist version=\"1.0\">\n<dict>\n";
pub const PLIST_FOOTER: &str = "</dict>\n</plist>\n";

const BASE64_WIDTH: usize = 52;
const PLST_SIZE: usize = 1032;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    pub attributes: u16,
    pub id: i32,
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Deserialize)]
struct XmlPlist {
    #[serde(rename = "resource-fork", default)]
    resource_fork: BTreeMap<String, Vec<XmlResource>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XmlResource {
    #[serde(default)]
    attributes: Option<String>,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    #[serde(rename = "ID", default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl XmlResource {
    fn into_resource(self) -> Result<Resource> {
        let attributes = match self.attributes.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(text) => {
                let digits = text.trim_start_matches("0x").trim_start_matches("0X");
                u16::from_str_radix(digits, 16).map_err(|_| {
                    DmgError::Corruption(format!("resource attributes {text:?}"))
                })?
            }
        };
        let id = match self.id.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(text) => text
                .parse()
                .map_err(|_| DmgError::Corruption(format!("resource id {text:?}")))?,
        };
        Ok(Resource {
            attributes,
            id,
            name: self.name.unwrap_or_default(),
            data: self.data,
        })
    }
}

/// Resources grouped by their four-character type, each list in insertion
/// order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceDirectory {
    entries: BTreeMap<String, Vec<Resource>>,
}

impl ResourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(xml: &[u8]) -> Result<Self> {
        let plist: XmlPlist = plist::from_reader_xml(xml)?;
        let mut entries = BTreeMap::new();
        for (key, list) in plist.resource_fork {
            let list = list
                .into_iter()
                .map(XmlResource::into_resource)
                .collect::<Result<Vec<_>>>()?;
            entries.insert(key, list);
        }
        let dir = Self { entries };
        debug!(
            "resource directory: {}",
            dir.entries
                .iter()
                .map(|(k, v)| format!("{k}={}", v.len()))
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(dir)
    }

    /// Reads the XML block the trailer points at.
    pub fn read_from<IO: VirtualIo + ?Sized>(io: &mut IO, koly: &KolyTrailer) -> Result<Self> {
        let size = io.size()?;
        match koly.plist_offset.checked_add(koly.plist_length) {
            Some(end) if end <= size => {}
            _ => {
                return Err(DmgError::Corruption(format!(
                    "{} byte property list at {:#x} past the {size} byte image",
                    koly.plist_length, koly.plist_offset
                )));
            }
        }
        let mut xml = vec![0; koly.plist_length as usize];
        io.read_exact_at(koly.plist_offset, &mut xml)?;
        Self::parse(&xml)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&[Resource]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn get_by_id(&self, key: &str, id: i32) -> Option<&Resource> {
        self.get(key)?.iter().find(|r| r.id == id)
    }

    /// Adds a resource, replacing the one of the same type and id.
    pub fn insert(&mut self, key: &str, id: i32, name: &str, data: Vec<u8>, attributes: u16) {
        let resource = Resource {
            attributes,
            id,
            name: name.to_string(),
            data,
        };
        let list = self.entries.entry(key.to_string()).or_default();
        match list.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = resource,
            None => list.push(resource),
        }
    }

    /// Every `blkx` table with the resource that carries it.
    pub fn blkx_tables(&self) -> Result<Vec<(&Resource, BlkxTable)>> {
        self.get("blkx")
            .ok_or(DmgError::MissingBlkx)?
            .iter()
            .map(|r| Ok((r, BlkxTable::read_from(&r.data)?)))
            .collect()
    }

    pub fn nsiz(&self) -> Result<Vec<NsizResource>> {
        self.get("nsiz")
            .unwrap_or_default()
            .iter()
            .map(|r| Ok(plist::from_bytes(&r.data)?))
            .collect()
    }

    pub fn insert_nsiz(&mut self, nsiz: &NsizResource) -> Result<()> {
        let mut data = vec![];
        plist::to_writer_xml(&mut data, nsiz)?;
        self.insert("nsiz", nsiz.part_num as i32, "", data, 0);
        Ok(())
    }

    pub fn insert_csum(&mut self, id: i32, csum: &CsumResource) {
        self.insert("cSum", id, "", csum.to_bytes().to_vec(), 0);
    }

    pub fn insert_size(&mut self, size: &SizeResource) {
        self.insert("size", 0, "", size.to_bytes(), 0);
    }

    pub fn insert_plst(&mut self) {
        let mut data = vec![0; PLST_SIZE];
        data[517] = 1;
        data[519] = 1;
        self.insert("plst", 0, "", data, ATTRIBUTE_HDIUTIL);
    }

    /// Serializes the directory the way Apple's tools lay it out: tab
    /// indentation and base64 wrapped at 52 columns.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(PLIST_HEADER);
        xml.push_str("\t<key>resource-fork</key>\n\t<dict>\n");
        for (key, list) in &self.entries {
            xml.push_str(&format!("\t\t<key>{}</key>\n\t\t<array>\n", escape(key)));
            for resource in list {
                xml.push_str("\t\t\t<dict>\n");
                xml.push_str(&format!(
                    "\t\t\t\t<key>Attributes</key>\n\t\t\t\t<string>0x{:04x}</string>\n",
                    resource.attributes
                ));
                xml.push_str("\t\t\t\t<key>Data</key>\n\t\t\t\t<data>\n");
                xml.push_str(&base64::encode(&resource.data, 4, BASE64_WIDTH));
                xml.push_str("\t\t\t\t</data>\n");
                xml.push_str(&format!(
                    "\t\t\t\t<key>ID</key>\n\t\t\t\t<string>{}</string>\n",
                    resource.id
                ));
                xml.push_str(&format!(
                    "\t\t\t\t<key>Name</key>\n\t\t\t\t<string>{}</string>\n",
                    escape(&resource.name)
                ));
                xml.push_str("\t\t\t</dict>\n");
            }
            xml.push_str("\t\t</array>\n");
        }
        xml.push_str("\t</dict>\n");
        xml.push_str(PLIST_FOOTER);
        xml
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// The embedded property list of an `nsiz` resource.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NsizResource {
    #[serde(
        rename = "SHA-1-digest",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sha1_digest: Option<ByteBuf>,
    #[serde(rename = "block-checksum-2")]
    pub block_checksum_2: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(rename = "part-num")]
    pub part_num: i64,
    pub version: i64,
    #[serde(
        rename = "volume-signature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub volume_signature: Option<i64>,
}

impl NsizResource {
    pub fn new(part_num: i32, block_checksum: u32) -> Self {
        Self {
            block_checksum_2: block_checksum as i32 as i64,
            part_num: part_num as i64,
            version: 6,
            ..Default::default()
        }
    }

    pub fn is_volume(&self) -> bool {
        self.volume_signature.is_some()
    }
}

/// Block checksum of one partition, stored big-endian under `cSum`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CsumResource {
    pub version: u16,
    pub ty: u32,
    pub checksum: u32,
}

impl CsumResource {
    pub const SIZE: usize = 10;

    pub fn new(ty: u32, checksum: u32) -> Self {
        Self {
            version: 1,
            ty,
            checksum,
        }
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            version: bytes.read_u16::<BigEndian>()?,
            ty: bytes.read_u32::<BigEndian>()?,
            checksum: bytes.read_u32::<BigEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[..2].copy_from_slice(&self.version.to_be_bytes());
        bytes[2..6].copy_from_slice(&self.ty.to_be_bytes());
        bytes[6..].copy_from_slice(&self.checksum.to_be_bytes());
        bytes
    }
}

/// The `size` resource describing an HFS+ volume image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SizeResource {
    pub version: u16,
    pub is_hfs: u32,
    pub data: Vec<u8>,
    pub volume_modified: u32,
    pub volume_signature: u16,
    pub size_present: u16,
}

impl SizeResource {
    pub const SIZE: usize = 286;

    pub fn for_volume(volume_modified: u32, volume_signature: u16) -> Self {
        Self {
            version: 5,
            is_hfs: 1,
            data: vec![],
            volume_modified,
            volume_signature,
            size_present: 1,
        }
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(DmgError::Corruption(format!(
                "{} byte size resource",
                bytes.len()
            )));
        }
        let version = bytes.read_u16::<BigEndian>()?;
        let is_hfs = bytes.read_u32::<BigEndian>()?;
        let _unknown1 = bytes.read_u32::<BigEndian>()?;
        let len = bytes.read_u8()? as usize;
        let data = bytes[..len].to_vec();
        bytes = &bytes[255..];
        let _unknown2 = bytes.read_u32::<BigEndian>()?;
        let _unknown3 = bytes.read_u32::<BigEndian>()?;
        let volume_modified = bytes.read_u32::<BigEndian>()?;
        let _unknown4 = bytes.read_u32::<BigEndian>()?;
        Ok(Self {
            version,
            is_hfs,
            data,
            volume_modified,
            volume_signature: bytes.read_u16::<BigEndian>()?,
            size_present: bytes.read_u16::<BigEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.data.len().min(255);
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.extend_from_slice(&self.version.to_be_bytes());
        bytes.extend_from_slice(&self.is_hfs.to_be_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.push(len as u8);
        bytes.extend_from_slice(&self.data[..len]);
        bytes.resize(2 + 4 + 4 + 1 + 255, 0);
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&self.volume_modified.to_be_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&self.volume_signature.to_be_bytes());
        bytes.extend_from_slice(&self.size_present.to_be_bytes());
        bytes
    }
}

/// Writes the directory and returns `(offset, length)` of the XML.
pub(crate) fn write_xml<IO: VirtualIo + ?Sized>(
    dir: &ResourceDirectory,
    io: &mut IO,
    offset: u64,
) -> Result<(u64, u64)> {
    let xml = dir.to_xml();
    io.write_all_at(offset, xml.as_bytes())?;
    Ok((offset, xml.len() as u64))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{BlkxChunk, ChunkType, UdifChecksum},
    };

    fn table() -> BlkxTable {
        let mut table = BlkxTable::new(0, 0, 8);
        table.add_chunk(BlkxChunk::new(ChunkType::Raw, 0, 8, 0, 4096));
        table.add_chunk(BlkxChunk::term(8, 4096));
        table.checksum = UdifChecksum::crc32(0xCAFE_F00D);
        table
    }

    fn directory() -> anyhow::Result<ResourceDirectory> {
        let mut dir = ResourceDirectory::new();
        dir.insert(
            "blkx",
            0,
            "disk image (Apple_HFS : 0)",
            table().to_bytes()?,
            ATTRIBUTE_HDIUTIL,
        );
        dir.insert_csum(0, &CsumResource::new(2, 0x1122_3344));
        let mut nsiz = NsizResource::new(0, 0x8000_0001);
        nsiz.sha1_digest = Some(ByteBuf::from(vec![0xAB; 20]));
        nsiz.bytes = Some(4096);
        nsiz.date = Some(0x1234);
        nsiz.volume_signature = Some(0x482B);
        dir.insert_nsiz(&nsiz)?;
        dir.insert_size(&SizeResource::for_volume(0x1234, 0x482B));
        dir.insert_plst();
        Ok(dir)
    }

    #[test]
    fn xml_round_trip() -> anyhow::Result<()> {
        let dir = directory()?;
        let xml = dir.to_xml();
        assert!(xml.starts_with(PLIST_HEADER));
        assert!(xml.contains("\t\t<key>blkx</key>\n\t\t<array>\n\t\t\t<dict>\n"));
        assert!(xml.contains("<string>0x0050</string>"));
        for line in xml.lines().filter(|l| l.starts_with("\t\t\t\t") && !l.contains('<')) {
            assert!(line.len() <= 4 + 52);
        }

        let parsed = ResourceDirectory::parse(xml.as_bytes())?;
        assert_eq!(parsed, dir);
        assert_eq!(
            parsed.keys().collect::<Vec<_>>(),
            ["blkx", "cSum", "nsiz", "plst", "size"]
        );
        let tables = parsed.blkx_tables()?;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].0.name, "disk image (Apple_HFS : 0)");
        assert_eq!(tables[0].1, table());
        Ok(())
    }

    #[test]
    fn nsiz_and_fixed_resources() -> anyhow::Result<()> {
        let dir = directory()?;
        let nsiz = dir.nsiz()?;
        assert_eq!(nsiz.len(), 1);
        assert!(nsiz[0].is_volume());
        assert_eq!(nsiz[0].block_checksum_2, 0x8000_0001u32 as i32 as i64);
        assert_eq!(nsiz[0].version, 6);

        let csum = dir.get_by_id("cSum", 0).map(|r| CsumResource::from_bytes(&r.data));
        assert_eq!(csum.transpose()?, Some(CsumResource::new(2, 0x1122_3344)));

        let size = dir.get_by_id("size", 0).map(|r| SizeResource::from_bytes(&r.data));
        let size = size.transpose()?;
        assert_eq!(size, Some(SizeResource::for_volume(0x1234, 0x482B)));

        let plst = dir.get_by_id("plst", 0).map(|r| r.data.clone()).unwrap_or_default();
        assert_eq!(plst.len(), 1032);
        assert_eq!(plst.iter().filter(|&&b| b != 0).count(), 2);
        Ok(())
    }

    #[test]
    fn insert_replaces_same_id() {
        let mut dir = ResourceDirectory::new();
        dir.insert("cSum", 1, "", vec![1], 0);
        dir.insert("cSum", 2, "", vec![2], 0);
        dir.insert("cSum", 1, "", vec![3], 0);
        let ids: Vec<_> = dir.get("cSum").unwrap_or_default().iter().map(|r| r.id).collect();
        assert_eq!(ids, [1, 2]);
        assert_eq!(dir.get_by_id("cSum", 1).map(|r| r.data.clone()), Some(vec![3]));
        assert!(matches!(dir.blkx_tables(), Err(DmgError::MissingBlkx)));
    }

    #[test]
    fn parses_foreign_layout() -> anyhow::Result<()> {
        let xml = format!(
            "{PLIST_HEADER}\t<key>resource-fork</key>\n\t<dict>\n\
             \t\t<key>blkx</key>\n\t\t<array>\n\t\t\t<dict>\n\
             \t\t\t\t<key>Attributes</key>\n\t\t\t\t<string>0x0050</string>\n\
             \t\t\t\t<key>CFName</key>\n\t\t\t\t<string>Driver &amp; Map</string>\n\
             \t\t\t\t<key>Data</key>\n\t\t\t\t<data>\n\t\t\t\tAAEC\n\t\t\t\t</data>\n\
             \t\t\t\t<key>ID</key>\n\t\t\t\t<string>-1</string>\n\
             \t\t\t\t<key>Name</key>\n\t\t\t\t<string>Driver &amp; Map</string>\n\
             \t\t\t</dict>\n\t\t</array>\n\t</dict>\n{PLIST_FOOTER}"
        );
        let dir = ResourceDirectory::parse(xml.as_bytes())?;
        let blkx = dir.get_by_id("blkx", -1).cloned();
        assert_eq!(
            blkx,
            Some(Resource {
                attributes: 0x50,
                id: -1,
                name: String::from("Driver & Map"),
                data: vec![0, 1, 2],
            })
        );
        // the payload is not a table
        assert!(dir.blkx_tables().is_err());
        Ok(())
    }
}
