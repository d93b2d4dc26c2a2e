//! Node file sets and the on-node paths they are written to

use crate::error::{BootstrapError, Result};
use crate::pki::CertPair;
use std::collections::BTreeMap;

pub const PKI_DIR: &str = "/etc/kubernetes/pki";
pub const ETCD_PKI_DIR: &str = "/etc/kubernetes/pki/etcd";
pub const MANIFESTS_DIR: &str = "/etc/kubernetes/manifests";
pub const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const KUBELET_DIR: &str = "/var/lib/kubelet";
pub const KUBELET_SYSTEMD_DIR: &str = "/etc/systemd/system/kubelet.service.d";

/// Directories a node syncs from the distribution target at boot
pub const SYNCED_DIRS: [&str; 3] = [KUBELET_SYSTEMD_DIR, KUBERNETES_DIR, KUBELET_DIR];

/// Absolute path of `name` inside `dir`
pub fn path_in(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Files staged for one node, keyed by absolute on-node path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFiles {
    files: BTreeMap<String, Vec<u8>>,
}

impl NodeFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }

    /// Stage `{dir}/{base}.crt` and `{dir}/{base}.key`
    pub fn insert_pair(&mut self, dir: &str, base: &str, pair: &CertPair) {
        self.insert(path_in(dir, &format!("{}.crt", base)), pair.cert_pem.clone());
        self.insert(path_in(dir, &format!("{}.key", base)), pair.key_pem.clone());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// File content as UTF-8 text
    pub fn text(&self, path: &str) -> Result<&str> {
        let data = self
            .get(path)
            .ok_or_else(|| BootstrapError::missing_material(path))?;
        std::str::from_utf8(data).map_err(|e| BootstrapError::invalid_material(path, e.to_string()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_pair_uses_crt_and_key_suffixes() {
        let mut files = NodeFiles::new();
        files.insert_pair(
            ETCD_PKI_DIR,
            "server",
            &CertPair {
                cert_pem: "cert".to_string(),
                key_pem: "key".to_string(),
            },
        );

        assert_eq!(files.text("/etc/kubernetes/pki/etcd/server.crt").unwrap(), "cert");
        assert_eq!(files.text("/etc/kubernetes/pki/etcd/server.key").unwrap(), "key");
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_missing_text_is_missing_material() {
        let files = NodeFiles::new();
        assert!(matches!(
            files.text("/etc/kubernetes/admin.conf"),
            Err(BootstrapError::MissingMaterial { .. })
        ));
    }
}
