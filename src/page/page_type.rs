use std::fmt;
use std::hash::{Hash, Hasher};

/// Role of a page, stored as a one-byte tag at the start of the page header.
///
/// Tags 0-4 are reserved by the store. Any other value is handed through
/// untouched as [`PageType::Other`] so storage front-ends can define their own
/// page kinds without changing the file format.
#[derive(Debug, Clone, Copy, Eq)]
pub enum PageType {
    /// Page sits on the free list and only carries a `next_free` link
    Free,
    Data,
    Index,
    Overflow,
    Meta,
    Other(u8),
}

impl PageType {
    pub const fn from_u8(tag: u8) -> Self {
        match tag {
            0 => Self::Free,
            1 => Self::Data,
            2 => Self::Index,
            3 => Self::Overflow,
            4 => Self::Meta,
            other => Self::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Data => 1,
            Self::Index => 2,
            Self::Overflow => 3,
            Self::Meta => 4,
            Self::Other(tag) => tag,
        }
    }

    pub const fn is_free(self) -> bool {
        self.as_u8() == 0
    }
}

// Compare by on-disk tag so `Other(1)` and `Data` are the same page type.
impl PartialEq for PageType {
    fn eq(&self, other: &Self) -> bool {
        self.as_u8() == other.as_u8()
    }
}

impl Hash for PageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_u8().hash(state);
    }
}

impl From<u8> for PageType {
    fn from(tag: u8) -> Self {
        Self::from_u8(tag)
    }
}

impl From<PageType> for u8 {
    fn from(page_type: PageType) -> Self {
        page_type.as_u8()
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "FREE"),
            Self::Data => write!(f, "DATA"),
            Self::Index => write!(f, "INDEX"),
            Self::Overflow => write!(f, "OVERFLOW"),
            Self::Meta => write!(f, "META"),
            Self::Other(tag) => write!(f, "TYPE({})", tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_conversion() {
        for tag in 0..=u8::MAX {
            assert_eq!(PageType::from_u8(tag).as_u8(), tag);
        }
        assert_eq!(PageType::from(2), PageType::Index);
        assert_eq!(u8::from(PageType::Overflow), 3);
    }

    #[test]
    fn test_other_compares_by_tag() {
        assert_eq!(PageType::Other(1), PageType::Data);
        assert_ne!(PageType::Other(9), PageType::Other(10));
        assert!(PageType::Other(0).is_free());
        assert!(!PageType::Meta.is_free());
    }

    #[test]
    fn test_display() {
        assert_eq!(PageType::Data.to_string(), "DATA");
        assert_eq!(PageType::from_u8(42).to_string(), "TYPE(42)");
    }
}
