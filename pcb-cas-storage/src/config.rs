use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Extensions accepted by default, lowercase with the leading dot.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".bmp"];

/// How hard a staged file is flushed before it is hashed and committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Leave it to the page cache.
    Buffer,
    Fsync,
    #[default]
    Fdatasync,
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffer" => Ok(Durability::Buffer),
            "fsync" => Ok(Durability::Fsync),
            "fdatasync" => Ok(Durability::Fdatasync),
            _ => Err(format!("Unknown durability option: {}", s)),
        }
    }
}

/// Locations and policies of a [`ContentStore`](crate::ContentStore).
///
/// `staging_root` must live on the same filesystem as `unlabeled_root`: commits are
/// renames, and renames do not cross filesystems.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub unlabeled_root: PathBuf,
    pub labeled_root: PathBuf,
    pub staging_root: PathBuf,
    /// Lowercase extensions including the dot, e.g. `.jpg`.
    pub allowed_extensions: Vec<String>,
    /// Uploads larger than this are rejected. `None` disables the check.
    pub max_object_size: Option<u64>,
    pub durability: Durability,
}

impl StoreConfig {
    /// Standard layout below a single data directory:
    /// `images/unlabeled`, `images/labeled` and `__incoming__`.
    pub fn from_data_root(data_root: impl AsRef<Path>) -> Self {
        let data_root = data_root.as_ref();
        Self {
            unlabeled_root: data_root.join("images").join("unlabeled"),
            labeled_root: data_root.join("images").join("labeled"),
            staging_root: data_root.join("__incoming__"),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            max_object_size: None,
            durability: Durability::default(),
        }
    }

    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .collect();
        self
    }

    pub fn with_max_object_size(mut self, max: Option<u64>) -> Self {
        self.max_object_size = max;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Whether `filename` ends in one of the allowed extensions (case-insensitive).
    pub fn extension_allowed(&self, filename: &str) -> bool {
        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = format!(".{}", ext.to_lowercase());
                self.allowed_extensions.iter().any(|a| *a == ext)
            }
            None => false,
        }
    }
}

/// `JPG` and `.jpg` both become `.jpg`.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_root_layout() {
        let config = StoreConfig::from_data_root("/data");
        assert_eq!(config.unlabeled_root, PathBuf::from("/data/images/unlabeled"));
        assert_eq!(config.labeled_root, PathBuf::from("/data/images/labeled"));
        assert_eq!(config.staging_root, PathBuf::from("/data/__incoming__"));
        assert_eq!(config.durability, Durability::Fdatasync);
    }

    #[test]
    fn test_extension_allow_list() {
        let config = StoreConfig::from_data_root("/data");
        assert!(config.extension_allowed("pcb_1.jpg"));
        assert!(config.extension_allowed("PCB_1.JPEG"));
        assert!(config.extension_allowed("scan.bmp"));
        assert!(!config.extension_allowed("notes.txt"));
        assert!(!config.extension_allowed("jpg"));
        assert!(!config.extension_allowed("archive.jpg.gz"));

        let config = config.with_allowed_extensions(["TIFF", ".png"]);
        assert!(config.extension_allowed("a.tiff"));
        assert!(config.extension_allowed("a.png"));
        assert!(!config.extension_allowed("a.jpg"));
    }

    #[test]
    fn test_durability_from_str() {
        assert_eq!("buffer".parse::<Durability>(), Ok(Durability::Buffer));
        assert_eq!("FSYNC".parse::<Durability>(), Ok(Durability::Fsync));
        assert!("sometimes".parse::<Durability>().is_err());
    }
}
