use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use fs4::FileExt;
use crate::error::Result;

/// An in-memory map from a key to the position and length of its latest
/// value in the log file. Ordered so the durable engine can serve ordered
/// scans and compact in key order.
pub type KeyDir = std::collections::BTreeMap<Vec<u8>, (u64, u32)>;

/// An append-only log file, containing a sequence of key/value entries
/// encoded as follows:
///
/// - Key length as big-endian u32.
/// - Value length as big-endian i32, or -1 for tombstones.
/// - Key as raw bytes (max 2 GB).
/// - Value as raw bytes (max 2 GB).
pub struct Log {
    pub(crate) path: PathBuf,
    pub(crate) file: std::fs::File,
}

impl Log {
    /// Opens a log file, or creates one if it does not exist. Takes out an
    /// exclusive lock on the file until it is closed, or errors if the lock
    /// is already held.
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::new_with_lock(path, true)
    }

    pub fn new_with_lock(path: PathBuf, try_lock: bool) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let file =
            std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        if try_lock {
            file.try_lock_exclusive()?;
        }

        Ok(Self { path, file })
    }

    /// Rebuilds the keydir by scanning the log file from the start. Used to
    /// recover the in-memory index when a durable `ValueBox` is (re)opened.
    pub fn build_keydir(&mut self) -> Result<KeyDir> {
        let mut len_buf = [0u8; 4];
        let mut keydir = KeyDir::new();
        let file_len = self.file.metadata()?.len();
        let mut r = BufReader::new(&mut self.file);

        let mut pos = r.seek(SeekFrom::Start(0))?;

        while pos < file_len {
            let mut result = || -> std::result::Result<(Vec<u8>, u64, Option<u32>), std::io::Error> {
                r.read_exact(&mut len_buf)?;
                let key_len = u32::from_be_bytes(len_buf);
                r.read_exact(&mut len_buf)?;
                let value_len_or_tombstone = match i32::from_be_bytes(len_buf) {
                    l if l >= 0 => Some(l as u32),
                    _ => None,
                };
                let value_pos = pos + 4 + 4 + key_len as u64;

                let mut key = vec![0; key_len as usize];
                r.read_exact(&mut key)?;

                if let Some(value_len) = value_len_or_tombstone {
                    if value_pos + value_len as u64 > file_len {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "value extends beyond end of file",
                        ));
                    }
                    r.seek_relative(value_len as i64)?;
                }

                Ok((key, value_pos, value_len_or_tombstone))
            };

            match result() {
                Ok((key, value_pos, Some(value_len))) => {
                    keydir.insert(key, (value_pos, value_len));
                    pos = value_pos + value_len as u64;
                }
                Ok((key, value_pos, None)) => {
                    keydir.remove(&key);
                    pos = value_pos;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::error!("found incomplete entry at offset {}, truncating file", pos);
                    self.file.set_len(pos)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(keydir)
    }

    /// Reads the value at the given position and length.
    pub fn read_value(&mut self, value_pos: u64, value_len: u32) -> Result<Vec<u8>> {
        let mut value = vec![0; value_len as usize];
        self.file.seek(SeekFrom::Start(value_pos))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Appends a key/value entry, using `None` for tombstones. Returns the
    /// position and length of the entry.
    pub fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(u64, u32)> {
        let key_len = key.len() as u32;
        let value_len = value.map_or(0, |v| v.len() as u32);
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);
        let len = 4 + 4 + key_len + value_len;

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::with_capacity(len as usize, &mut self.file);
        w.write_all(&key_len.to_be_bytes())?;
        w.write_all(&value_len_or_tombstone.to_be_bytes())?;
        w.write_all(key)?;
        if let Some(value) = value {
            w.write_all(value)?;
        }
        w.flush()?;

        Ok((pos, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_from_a_truncated_final_entry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("complete");
        let trunc_path = dir.path().join("truncated");

        let mut log = Log::new(path.clone())?;
        let (pos, len) = log.write_entry(b"key", Some(&[1, 2, 3]))?;
        let complete_end = pos + len as u64;
        drop(log);

        std::fs::copy(&path, &trunc_path)?;
        let f = std::fs::OpenOptions::new().write(true).open(&trunc_path)?;
        f.set_len(complete_end - 1)?;
        drop(f);

        let mut truncated = Log::new(trunc_path)?;
        let keydir = truncated.build_keydir()?;
        assert!(keydir.is_empty());
        Ok(())
    }
}
