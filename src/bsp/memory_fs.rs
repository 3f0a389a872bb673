use heapless::{String, Vec};

use super::{FileHandle, FileStat, FsBsp, FsError, OpenMode};

const MAX_NAME_LEN: usize = 32;

struct Entry<const SIZE: usize> {
    name: String<MAX_NAME_LEN>,
    data: Vec<u8, SIZE>,
    open: bool,
}

/// Fixed-capacity in-memory filesystem: up to `FILES` resources of at most
/// `SIZE` bytes each. A resource can be open at most once at a time.
pub struct MemoryFs<const FILES: usize, const SIZE: usize> {
    entries: Vec<Entry<SIZE>, FILES>,
}

impl<const FILES: usize, const SIZE: usize> Default for MemoryFs<FILES, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const FILES: usize, const SIZE: usize> MemoryFs<FILES, SIZE> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name.as_str() == name)
    }

    fn entry_mut(&mut self, file: FileHandle) -> Result<&mut Entry<SIZE>, FsError> {
        self.entries
            .get_mut(file.0 as usize)
            .filter(|e| e.open)
            .ok_or(FsError::InvalidHandle)
    }
}

impl<const FILES: usize, const SIZE: usize> FsBsp for MemoryFs<FILES, SIZE> {
    fn open(&mut self, name: &str, mode: OpenMode) -> Result<FileHandle, FsError> {
        let index = match (self.find(name), mode) {
            (Some(index), _) => index,
            (None, OpenMode::Read) => return Err(FsError::NotFound),
            (None, _) => {
                let mut entry_name = String::new();
                entry_name.push_str(name).map_err(|_| FsError::OutOfMemory)?;
                self.entries
                    .push(Entry {
                        name: entry_name,
                        data: Vec::new(),
                        open: false,
                    })
                    .map_err(|_| FsError::OutOfMemory)?;
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index];
        if entry.open {
            return Err(FsError::Busy);
        }
        if mode == OpenMode::Write {
            entry.data.clear();
        }
        entry.open = true;
        Ok(FileHandle(index as u8))
    }

    fn read(&mut self, file: FileHandle, offset: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        let entry = self.entry_mut(file)?;
        let available = entry.data.get(offset..).unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    fn write(&mut self, file: FileHandle, offset: usize, buf: &[u8]) -> Result<usize, FsError> {
        let entry = self.entry_mut(file)?;
        let end = offset + buf.len();
        if end > SIZE {
            return Err(FsError::OutOfMemory);
        }
        if entry.data.len() < end {
            entry.data.resize(end, 0).map_err(|_| FsError::OutOfMemory)?;
        }
        entry.data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self, file: FileHandle) -> Result<(), FsError> {
        self.entry_mut(file)?.open = false;
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), FsError> {
        let index = self.find(name).ok_or(FsError::NotFound)?;
        if self.entries[index].open {
            return Err(FsError::Busy);
        }
        // Handles are indices, so keep the slots of other entries stable.
        let last = self.entries.len() - 1;
        if index != last && self.entries.iter().skip(index + 1).any(|e| e.open) {
            return Err(FsError::Busy);
        }
        self.entries.remove(index);
        Ok(())
    }

    fn stat(&mut self, name: &str) -> Result<FileStat, FsError> {
        let index = self.find(name).ok_or(FsError::NotFound)?;
        Ok(FileStat {
            size: self.entries[index].data.len(),
        })
    }
}
