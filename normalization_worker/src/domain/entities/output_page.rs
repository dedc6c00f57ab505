use serde::Deserialize;

/// Extension of every page produced by the converters
pub const NORMALIZED_PAGE_EXTENSION: &str = "jpg";

/// How normalized pages are named in the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingScheme {
    /// `<package-id>_pag<N>.<ext>`
    #[default]
    PackagePages,
    /// `imagem-<N>.jpg`
    SequentialImages,
}

impl NamingScheme {
    /// Builds the object name of the page at `index` (starting at 1)
    pub fn page_name(&self, package_id: &str, index: u32, extension: &str) -> String {
        match self {
            Self::PackagePages => format!("{}_pag{}.{}", package_id, index, extension),
            Self::SequentialImages => format!("imagem-{}.{}", index, NORMALIZED_PAGE_EXTENSION),
        }
    }

    /// Parses back a name built by `page_name`
    ///
    /// # Returns
    /// The sequence index and the extension, or `None` if the name does not follow the scheme
    pub fn parse_page_name(&self, package_id: &str, name: &str) -> Option<(u32, String)> {
        let numbered = match self {
            Self::PackagePages => name.strip_prefix(package_id)?.strip_prefix("_pag")?,
            Self::SequentialImages => name.strip_prefix("imagem-")?,
        };

        let (index, extension) = numbered.split_once('.')?;

        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if extension.is_empty() || extension.contains('.') {
            return None;
        }
        if *self == Self::SequentialImages && extension != NORMALIZED_PAGE_EXTENSION {
            return None;
        }

        let index = index.parse::<u32>().ok().filter(|index| *index > 0)?;
        Some((index, extension.to_string()))
    }
}

/// Sequence of page numbers for one job
///
/// Only advances once a page has been uploaded, so the delivered numbering has no gaps.
#[derive(Debug)]
pub struct PageSequence {
    next: u32,
}

impl Default for PageSequence {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl PageSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.next
    }

    pub fn advance(&mut self) {
        self.next += 1;
    }
}
