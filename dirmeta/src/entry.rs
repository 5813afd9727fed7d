//! Directory entries: names, kinds, and the collation that orders them.

use std::cmp::Ordering;

/// Inode number referenced by a directory entry.
pub type InodeId = u64;

/// Longest name an entry slot can hold, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Validated entry name.
///
/// Names are raw bytes: non-empty, at most `MAX_NAME_LEN` long, and free of
/// NUL so they fit the NUL-padded on-disk field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryName(Vec<u8>);

impl EntryName {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, NameError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(NameError::Empty);
        }
        if bytes.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong(bytes.len()));
        }
        if bytes.contains(&0) {
            return Err(NameError::ContainsNul);
        }
        Ok(Self(bytes))
    }

    /// The "." entry every directory carries.
    #[must_use]
    pub fn dot() -> Self {
        Self(b".".to_vec())
    }

    /// The ".." entry every directory carries.
    #[must_use]
    pub fn dot_dot() -> Self {
        Self(b"..".to_vec())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for "." and "..", which are not counted as children.
    #[must_use]
    pub fn is_dot_entry(&self) -> bool {
        self.0 == b"." || self.0 == b".."
    }
}

impl std::fmt::Display for EntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::str::FromStr for EntryName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes())
    }
}

/// Error returned for names that cannot be stored in an entry slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong(usize),
    ContainsNul,
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "name is empty"),
            Self::TooLong(len) => {
                write!(f, "name is {len} bytes long (max {MAX_NAME_LEN})")
            }
            Self::ContainsNul => write!(f, "name contains a NUL byte"),
        }
    }
}

impl std::error::Error for NameError {}

/// Type tag carried by each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryKind {
    Dir = 0,
    File = 1,
    Symlink = 2,
    Fifo = 3,
    Socket = 4,
}

impl EntryKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::File => "file",
            Self::Symlink => "symlink",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
        }
    }
}

impl TryFrom<u8> for EntryKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dir),
            1 => Ok(Self::File),
            2 => Ok(Self::Symlink),
            3 => Ok(Self::Fifo),
            4 => Ok(Self::Socket),
            _ => Err(value),
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dir" => Ok(Self::Dir),
            "file" => Ok(Self::File),
            "symlink" => Ok(Self::Symlink),
            "fifo" => Ok(Self::Fifo),
            "socket" => Ok(Self::Socket),
            other => Err(format!("unknown entry kind '{other}'")),
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single name-to-inode mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeId,
    pub name: EntryName,
    pub kind: EntryKind,
}

impl DirEntry {
    #[must_use]
    pub const fn new(inode: InodeId, name: EntryName, kind: EntryKind) -> Self {
        Self { inode, name, kind }
    }
}

/// Name ordering used by a directory.
///
/// Chosen when the directory is created and stored in its header. Uniqueness
/// follows the ordering: under `CaseInsensitive`, "A" and "a" are the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Collation {
    /// Byte-wise lexicographic.
    #[default]
    Binary = 0,
    /// ASCII case folded, as used for external volumes.
    CaseInsensitive = 1,
}

impl Collation {
    #[must_use]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Binary => a.cmp(b),
            Self::CaseInsensitive => a
                .iter()
                .map(u8::to_ascii_lowercase)
                .cmp(b.iter().map(u8::to_ascii_lowercase)),
        }
    }
}

impl TryFrom<u8> for Collation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Binary),
            1 => Ok(Self::CaseInsensitive),
            _ => Err(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert_eq!(EntryName::new(Vec::new()), Err(NameError::Empty));
        assert_eq!(EntryName::new(vec![b'a'; 256]), Err(NameError::TooLong(256)));
        assert_eq!(EntryName::new(b"a\0b".to_vec()), Err(NameError::ContainsNul));
        assert!(EntryName::new(vec![b'a'; MAX_NAME_LEN]).is_ok());
    }

    #[test]
    fn test_dot_entries() {
        assert!(EntryName::dot().is_dot_entry());
        assert!(EntryName::dot_dot().is_dot_entry());
        let name: EntryName = "...".parse().expect("valid name");
        assert!(!name.is_dot_entry());
    }

    #[test]
    fn test_kind_tags() {
        for kind in [
            EntryKind::Dir,
            EntryKind::File,
            EntryKind::Symlink,
            EntryKind::Fifo,
            EntryKind::Socket,
        ] {
            assert_eq!(EntryKind::try_from(kind as u8), Ok(kind));
            assert_eq!(kind.as_str().parse::<EntryKind>(), Ok(kind));
        }
        assert_eq!(EntryKind::try_from(9), Err(9));
        assert!("block".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_collation() {
        assert_eq!(Collation::Binary.compare(b"B", b"a"), Ordering::Less);
        assert_eq!(
            Collation::CaseInsensitive.compare(b"B", b"a"),
            Ordering::Greater
        );
        assert_eq!(
            Collation::CaseInsensitive.compare(b"Readme", b"README"),
            Ordering::Equal
        );
        assert_eq!(Collation::Binary.compare(b".", b".."), Ordering::Less);
    }
}
