use std::path::PathBuf;
use crate::error::{Error, Result};
use crate::value_box::log::{KeyDir, Log};
use crate::value_box::{ScanIteratorT, Status, ValueBox};

/// A durable, single-append-log-file `ValueBox`.
///
/// Writes a key/value entry to an append-only log file and keeps a mapping
/// of keys to file positions in memory, rebuilt by scanning the log on open.
/// All live keys must fit in memory. Deletes write a tombstone. Compaction
/// rewrites the whole file, skipping replaced values and tombstones — there
/// is no in-place garbage collection.
pub struct DurableValueBox {
    log: Log,
    keydir: KeyDir,
}

impl DurableValueBox {
    /// Opens or creates a durable value box at `path`.
    pub fn open(path: PathBuf) -> Result<Self> {
        Self::open_with_lock(path, true)
    }

    pub fn open_with_lock(path: PathBuf, try_lock: bool) -> Result<Self> {
        let mut log = Log::new_with_lock(path, try_lock)?;
        let keydir = log.build_keydir()?;
        Ok(Self { log, keydir })
    }

    /// Opens a durable value box, compacting it immediately if the fraction
    /// of garbage on disk meets or exceeds `garbage_ratio_threshold`.
    pub fn open_compacting(path: PathBuf, garbage_ratio_threshold: f64) -> Result<Self> {
        let mut s = Self::open(path)?;

        let status = s.status()?;
        if status.total_disk_size > 0 {
            let garbage_ratio = status.garbage_disk_size as f64 / status.total_disk_size as f64;
            if status.garbage_disk_size > 0 && garbage_ratio >= garbage_ratio_threshold {
                log::info!(
                    "compacting {} to remove {} bytes of garbage ({:.0}% of {} bytes)",
                    s.log.path.display(),
                    status.garbage_disk_size,
                    garbage_ratio * 100.0,
                    status.total_disk_size
                );
                s.compact()?;
                let new_total_disk_size = s.status()?.total_disk_size;
                log::info!("compacted {} down to {} bytes", s.log.path.display(), new_total_disk_size);
            }
        }

        Ok(s)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.log.path
    }

    /// Compacts the log by writing a fresh file with only live entries and
    /// replacing the current one.
    pub fn compact(&mut self) -> Result<()> {
        let mut tmp_path = self.log.path.clone();
        tmp_path.set_extension("compact");

        let (mut new_log, new_keydir) = self.write_compacted(tmp_path)?;

        std::fs::rename(&new_log.path, &self.log.path).map_err(|err| {
            Error::Storage(std::io::Error::new(
                err.kind(),
                format!(
                    "compaction rename from {:?} to {:?} failed: {}",
                    new_log.path, self.log.path, err
                ),
            ))
        })?;

        new_log.path = self.log.path.clone();
        self.log = new_log;
        self.keydir = new_keydir;
        Ok(())
    }

    fn write_compacted(&mut self, path: PathBuf) -> Result<(Log, KeyDir)> {
        let mut new_keydir = KeyDir::new();
        let mut new_log = Log::new(path)?;
        new_log.file.set_len(0)?;
        for (key, (value_pos, value_len)) in self.keydir.iter() {
            let value = self.log.read_value(*value_pos, *value_len)?;
            let (pos, len) = new_log.write_entry(key, Some(&value))?;
            new_keydir.insert(key.clone(), (pos + len as u64 - *value_len as u64, *value_len));
        }
        Ok((new_log, new_keydir))
    }
}

impl std::fmt::Display for DurableValueBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "durable")
    }
}

impl ValueBox for DurableValueBox {
    type ScanIterator<'a> = DurableScanIterator<'a>;

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some((value_pos, value_len)) = self.keydir.get(key) {
            Ok(Some(self.log.read_value(*value_pos, *value_len)?))
        } else {
            Ok(None)
        }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let (pos, len) = self.log.write_entry(key, Some(&value))?;
        let value_len = value.len() as u32;
        self.keydir.insert(key.to_vec(), (pos + len as u64 - value_len as u64, value_len));
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.log.write_entry(key, None)?;
        self.keydir.remove(key);
        Ok(())
    }

    fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::ScanIterator<'_>
    where
        Self: Sized,
    {
        DurableScanIterator { inner: self.keydir.range(range), log: &mut self.log }
    }

    fn scan_dyn(
        &mut self,
        range: (std::ops::Bound<Vec<u8>>, std::ops::Bound<Vec<u8>>),
    ) -> Box<dyn ScanIteratorT + '_> {
        Box::new(self.scan(range))
    }

    fn exists(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.keydir.contains_key(key))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.log.file.sync_all()?)
    }

    fn status(&mut self) -> Result<Status> {
        let keys = self.keydir.len() as u64;
        let size = self
            .keydir
            .iter()
            .fold(0, |size, (key, (_, value_len))| size + key.len() as u64 + *value_len as u64);
        let total_disk_size = self.log.file.metadata()?.len();
        let live_disk_size = size + 8 * keys;
        let garbage_disk_size = total_disk_size.saturating_sub(live_disk_size);
        Ok(Status {
            name: self.to_string(),
            keys,
            size,
            total_disk_size,
            live_disk_size,
            garbage_disk_size,
        })
    }
}

impl Drop for DurableValueBox {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            log::error!("failed to flush value box on drop: {}", error);
        }
    }
}

pub struct DurableScanIterator<'a> {
    inner: std::collections::btree_map::Range<'a, Vec<u8>, (u64, u32)>,
    log: &'a mut Log,
}

impl<'a> DurableScanIterator<'a> {
    fn map(&mut self, item: (&Vec<u8>, &(u64, u32))) -> <Self as Iterator>::Item {
        let (key, (value_pos, value_len)) = item;
        Ok((key.clone(), self.log.read_value(*value_pos, *value_len)?))
    }
}

impl<'a> Iterator for DurableScanIterator<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| self.map(item))
    }
}

impl<'a> DoubleEndedIterator for DurableScanIterator<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|item| self.map(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    super::super::tests::test_value_box!({
        let dir = tempfile::tempdir().unwrap();
        DurableValueBox::open(dir.path().join("db")).unwrap()
    });

    fn setup() -> (tempfile::TempDir, DurableValueBox) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let vb = DurableValueBox::open(path).unwrap();
        (dir, vb)
    }

    #[test]
    fn reopening_preserves_all_writes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db");

        let mut vb = DurableValueBox::open(path.clone())?;
        vb.set(b"a", vec![1])?;
        vb.set(b"b", vec![2])?;
        vb.remove(b"a")?;
        let expect = vb.scan(..).collect::<Result<Vec<_>>>()?;
        drop(vb);

        let mut reopened = DurableValueBox::open(path)?;
        assert_eq!(expect, reopened.scan(..).collect::<Result<Vec<_>>>()?);
        Ok(())
    }

    #[test]
    fn compaction_removes_garbage_but_preserves_live_state() -> Result<()> {
        let (_dir, mut vb) = setup();
        vb.set(b"a", vec![1])?;
        vb.set(b"a", vec![2])?;
        vb.set(b"a", vec![3])?;
        vb.remove(b"b")?;

        let before = vb.scan(..).collect::<Result<Vec<_>>>()?;
        let status_before = vb.status()?;
        assert!(status_before.garbage_disk_size > 0);

        vb.compact()?;

        let after = vb.scan(..).collect::<Result<Vec<_>>>()?;
        assert_eq!(before, after);
        let status_after = vb.status()?;
        assert_eq!(status_after.garbage_disk_size, 0);
        Ok(())
    }

    #[test]
    fn opening_twice_with_a_lock_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db");
        let first = DurableValueBox::open(path.clone())?;
        assert!(DurableValueBox::open(path.clone()).is_err());
        drop(first);
        assert!(DurableValueBox::open(path).is_ok());
        Ok(())
    }
}
