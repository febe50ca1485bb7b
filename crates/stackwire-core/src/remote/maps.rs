//! `/proc/<pid>/maps` parsing, used to name the module behind each remote
//! frame.

use std::fs;

use crate::error::Result;
use crate::types::ProcessId;

/// One mapping of the target's address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry
{
    /// Start address (inclusive)
    pub start: u64,
    /// End address (exclusive)
    pub end: u64,
    /// Permission string as printed by the kernel, e.g. `"r-xp"`
    pub permissions: String,
    /// File offset of `start`
    pub offset: u64,
    /// Backing file or pseudo name (`[stack]`, `[vdso]`), `None` for anonymous maps
    pub path: Option<String>,
}

impl MapEntry
{
    #[must_use]
    pub fn contains(&self, address: u64) -> bool
    {
        (self.start..self.end).contains(&address)
    }

    #[must_use]
    pub fn is_executable(&self) -> bool
    {
        self.permissions.as_bytes().get(2) == Some(&b'x')
    }

    /// Offset of `address` in the backing file
    #[must_use]
    pub fn file_offset(&self, address: u64) -> u64
    {
        address.saturating_sub(self.start).saturating_add(self.offset)
    }

    fn parse(line: &str) -> Option<Self>
    {
        let mut fields = line.split_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let permissions = fields.next()?.to_owned();
        let offset = fields.next()?;
        let _device = fields.next()?;
        let _inode = fields.next()?;
        // Paths may contain spaces; keep the rest of the line as-is
        let path = fields.collect::<Vec<_>>().join(" ");

        Some(Self {
            start: u64::from_str_radix(start, 16).ok()?,
            end: u64::from_str_radix(end, 16).ok()?,
            permissions,
            offset: u64::from_str_radix(offset, 16).ok()?,
            path: (!path.is_empty()).then_some(path),
        })
    }
}

/// Sorted address-space map of a process
#[derive(Debug, Clone, Default)]
pub struct ProcessMaps
{
    entries: Vec<MapEntry>,
}

impl ProcessMaps
{
    /// Parse the text of a maps file, skipping malformed lines
    #[must_use]
    pub fn parse(text: &str) -> Self
    {
        let mut entries: Vec<MapEntry> = text.lines().filter_map(MapEntry::parse).collect();
        entries.sort_by_key(|entry| entry.start);
        Self { entries }
    }

    /// Read `/proc/<pid>/maps`
    ///
    /// ## Errors
    ///
    /// [`StackwireError::Io`](crate::StackwireError::Io) when the file cannot be read.
    pub fn read(pid: ProcessId) -> Result<Self>
    {
        let text = fs::read_to_string(format!("/proc/{}/maps", pid.0))?;
        Ok(Self::parse(&text))
    }

    /// Mapping containing `address`
    #[must_use]
    pub fn find(&self, address: u64) -> Option<&MapEntry>
    {
        let index = self.entries.partition_point(|entry| entry.start <= address);
        let entry = self.entries.get(index.checked_sub(1)?)?;
        entry.contains(address).then_some(entry)
    }

    #[must_use]
    pub fn entries(&self) -> &[MapEntry]
    {
        &self.entries
    }
}
