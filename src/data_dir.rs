use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path
    /// 2. The FACETDRILL_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/facetdrill/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("FACETDRILL_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("facetdrill")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// JSON file holding the [`FacetsConfig`](crate::FacetsConfig).
    pub fn facets_config(&self) -> PathBuf {
        self.root.join("facets.json")
    }

    pub fn index_dir(&self) -> Result<PathBuf> {
        self.subdir("index")
    }

    pub fn taxonomy_dir(&self) -> Result<PathBuf> {
        self.subdir("taxonomy")
    }

    fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
