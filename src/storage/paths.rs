// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! On-disk layout of the data directory.

use std::path::{Path, PathBuf};

/// Default data directory when `DATA_DIR` is unset.
pub const DATA_ROOT: &str = "./data";

#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Node Paths ==========

    pub fn nodes_dir(&self) -> PathBuf {
        self.root.join("nodes")
    }

    /// Directory for one distributor node. The party name is reduced to a
    /// filesystem-safe slug.
    pub fn node_dir(&self, party_name: &str) -> PathBuf {
        self.nodes_dir().join(slug(party_name))
    }

    /// The node's vault database (live records, transitions, checkpoints).
    pub fn node_vault(&self, party_name: &str) -> PathBuf {
        self.node_dir(party_name).join("vault.redb")
    }

    /// The node's PKCS#8 signing key.
    pub fn node_key(&self, party_name: &str) -> PathBuf {
        self.node_dir(party_name).join("node.pem")
    }

    // ========== Authority Paths ==========

    pub fn authority_key(&self) -> PathBuf {
        self.root.join("authority").join("authority.pem")
    }

    pub fn authority_ledger(&self) -> PathBuf {
        self.root.join("authority").join("ledger.redb")
    }
}

/// Filesystem and URL safe form of a party name.
pub fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("./data"));
    }

    #[test]
    fn node_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/custody");
        assert_eq!(paths.nodes_dir(), PathBuf::from("/tmp/custody/nodes"));
        assert_eq!(
            paths.node_vault("Distributor-A"),
            PathBuf::from("/tmp/custody/nodes/distributor-a/vault.redb")
        );
        assert_eq!(
            paths.node_key("Distributor-A"),
            PathBuf::from("/tmp/custody/nodes/distributor-a/node.pem")
        );
    }

    #[test]
    fn party_names_are_slugged() {
        let paths = StoragePaths::new("/d");
        assert_eq!(
            paths.node_dir("O=Distributor A, L=London"),
            PathBuf::from("/d/nodes/o_distributor_a__l_london")
        );
    }

    #[test]
    fn authority_key_lives_outside_nodes() {
        let paths = StoragePaths::new("/d");
        assert_eq!(
            paths.authority_key(),
            PathBuf::from("/d/authority/authority.pem")
        );
        assert_eq!(
            paths.authority_ledger(),
            PathBuf::from("/d/authority/ledger.redb")
        );
    }
}
