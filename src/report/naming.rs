//! Output file naming.

use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const OUTPUT_EXTENSION: &str = "pdf";

/// `<base_dir>/<random hex token>.pdf`.
///
/// The token is a v4 UUID drawn from the OS random source, so names are unguessable and
/// concurrent requests never collide.
pub fn next_path(base_dir: &Path) -> PathBuf {
    let token = Uuid::new_v4().simple().to_string();
    base_dir.join(format!("{token}.{OUTPUT_EXTENSION}"))
}

/// Hands out output paths under a fixed directory.
#[derive(Debug, Clone)]
pub struct OutputNamer {
    base_dir: PathBuf,
}

impl OutputNamer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn next_path(&self) -> PathBuf {
        next_path(&self.base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_path_shape() {
        let path = next_path(Path::new("./tempReports"));
        assert_eq!(path.parent(), Some(Path::new("./tempReports")));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("pdf"));

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap();
        assert_eq!(stem.len(), 32);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_paths_do_not_repeat() {
        let namer = OutputNamer::new("/tmp/reports");
        let paths: HashSet<PathBuf> = (0..1000).map(|_| namer.next_path()).collect();
        assert_eq!(paths.len(), 1000);
    }
}
