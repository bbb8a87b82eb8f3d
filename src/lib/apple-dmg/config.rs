//! Options for opening and building images, loadable from property lists.

use {
    crate::{DmgError, Result},
    serde::{Deserialize, Deserializer, de::Error as _},
    serde_bytes::ByteBuf,
    std::path::Path,
    vfdecrypt::FileVaultKey,
};

/// Which partition of a partitioned device to mount.
///
/// In a property list this is `auto`, `whole`, or a partition index.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(try_from = "PartitionSetting")]
pub enum PartitionChoice {
    /// The first `Apple_HFS` or `Apple_HFSX` partition.
    #[default]
    Auto,
    Index(u32),
    /// The device itself, ignoring any partition map.
    Whole,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PartitionSetting {
    Index(u32),
    Name(String),
}

impl TryFrom<PartitionSetting> for PartitionChoice {
    type Error = String;

    fn try_from(setting: PartitionSetting) -> std::result::Result<Self, String> {
        match setting {
            PartitionSetting::Index(n) => Ok(Self::Index(n)),
            PartitionSetting::Name(name) => match name.to_ascii_lowercase().as_str() {
                "auto" => Ok(Self::Auto),
                "whole" => Ok(Self::Whole),
                _ => Err(format!("unknown partition choice {name:?}")),
            },
        }
    }
}

/// Checksum recorded in each `blkx` table and the trailer.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub enum ChecksumKind {
    #[default]
    Crc32,
    None,
}

impl TryFrom<String> for ChecksumKind {
    type Error = String;

    fn try_from(name: String) -> std::result::Result<Self, String> {
        match name.to_ascii_lowercase().as_str() {
            "crc32" => Ok(Self::Crc32),
            "none" => Ok(Self::None),
            _ => Err(format!("unknown checksum {name:?}")),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct OpenOptions {
    /// FileVault key as 72 hex digits: AES key then HMAC key.
    pub key: Option<String>,
    pub partition: PartitionChoice,
    pub read_only: bool,
}

impl OpenOptions {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let options: Self = plist::from_file(path)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let options: Self = plist::from_bytes(bytes)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        self.filevault_key().map(|_| ())
    }

    pub fn filevault_key(&self) -> Result<Option<FileVaultKey>> {
        self.key
            .as_deref()
            .map(|hex| {
                FileVaultKey::from_hex(hex)
                    .map_err(|_| DmgError::Config(String::from("key must be 72 hex digits")))
            })
            .transpose()
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct WriterOptions {
    /// zlib level, 0 to 9.
    pub compression_level: u32,
    pub sectors_per_run: u64,
    pub checksum: ChecksumKind,
    /// Random when unset.
    #[serde(deserialize_with = "segment_id")]
    pub segment_id: Option<[u8; 16]>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression_level: 9,
            sectors_per_run: 0x200,
            checksum: ChecksumKind::Crc32,
            segment_id: None,
        }
    }
}

fn segment_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<[u8; 16]>, D::Error> {
    let Some(bytes) = Option::<ByteBuf>::deserialize(d)? else {
        return Ok(None);
    };
    <[u8; 16]>::try_from(bytes.as_slice())
        .map(Some)
        .map_err(|_| D::Error::invalid_length(bytes.len(), &"16 bytes"))
}

impl WriterOptions {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let options: Self = plist::from_file(path)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let options: Self = plist::from_bytes(bytes)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(DmgError::Config(format!(
                "compression level {} is above 9",
                self.compression_level
            )));
        }
        if self.sectors_per_run == 0 {
            return Err(DmgError::Config(String::from("sectors_per_run must be positive")));
        }
        Ok(())
    }
}
