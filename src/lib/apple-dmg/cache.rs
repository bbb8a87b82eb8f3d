use {
    crate::{DmgError, Result},
    std::ops::Range,
};

/// Holds the decompressed bytes of exactly one run. Refilling replaces the
/// previous run; a failed refill leaves the cache empty.
#[derive(Debug, Default)]
pub struct RunCache {
    start: u64,
    end: u64,
    data: Vec<u8>,
    valid: bool,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.valid && self.start <= offset && offset < self.end
    }

    pub fn range(&self) -> Option<Range<u64>> {
        self.valid.then_some(self.start..self.end)
    }

    /// Materializes `len` bytes for the device range starting at `start`.
    /// `fill` receives a zeroed buffer of that length.
    pub fn refill<F>(&mut self, start: u64, len: usize, fill: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        self.valid = false;
        self.data.clear();
        self.data
            .try_reserve_exact(len)
            .map_err(|_| DmgError::Corruption(format!("cannot hold a {len} byte run")))?;
        self.data.resize(len, 0);
        fill(&mut self.data)?;
        self.start = start;
        self.end = start + len as u64;
        self.valid = true;
        Ok(())
    }

    /// Bytes from `offset` to the end of the cached run.
    pub fn slice(&self, offset: u64) -> &[u8] {
        if !self.contains(offset) {
            return &[];
        }
        &self.data[(offset - self.start) as usize..]
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_and_lookup() -> anyhow::Result<()> {
        let mut cache = RunCache::new();
        assert!(!cache.contains(0));
        assert_eq!(cache.range(), None);

        cache.refill(1024, 512, |buf| {
            buf.fill(7);
            Ok(())
        })?;
        assert!(cache.contains(1024));
        assert!(cache.contains(1535));
        assert!(!cache.contains(1536));
        assert!(!cache.contains(1023));
        assert_eq!(cache.slice(1500).len(), 36);
        assert!(cache.slice(2000).is_empty());

        cache.refill(0, 4, |buf| {
            assert_eq!(buf, [0; 4]);
            buf.copy_from_slice(b"abcd");
            Ok(())
        })?;
        assert!(!cache.contains(1024));
        assert_eq!(cache.slice(1), b"bcd");
        assert_eq!(cache.range(), Some(0..4));

        cache.invalidate();
        assert!(!cache.contains(0));
        Ok(())
    }

    #[test]
    fn failed_refill_empties() -> anyhow::Result<()> {
        let mut cache = RunCache::new();
        cache.refill(0, 16, |_| Ok(()))?;
        let err = cache.refill(16, 16, |_| Err(DmgError::Corruption(String::from("bad run"))));
        assert!(err.is_err());
        assert!(!cache.contains(0));
        assert!(!cache.contains(16));
        Ok(())
    }
}
