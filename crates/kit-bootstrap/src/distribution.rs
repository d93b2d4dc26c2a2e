use crate::error::{BootstrapError, Result};
use crate::files::NodeFiles;
use bytes::Bytes;
use kit_cloud::ObjectStorageApi;
use kit_core::naming::bucket_name;
use std::sync::Arc;
use tracing::{debug, info};

/// Object storage target nodes pull their files from at boot
///
/// Every file is written under `{cluster}/{node}/{path}` where `path` is the
/// on-node absolute path without its leading slash, so a node can mirror its
/// own prefix onto `/`. Writes overwrite existing objects.
#[derive(Clone)]
pub struct Distributor {
    storage: Arc<dyn ObjectStorageApi>,
    cluster: String,
    bucket: String,
}

impl Distributor {
    pub fn new(storage: Arc<dyn ObjectStorageApi>, cluster: &str) -> Self {
        Self {
            storage,
            cluster: cluster.to_string(),
            bucket: bucket_name(cluster),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for a file on a node
    pub fn key(&self, node: &str, path: &str) -> String {
        format!("{}/{}/{}", self.cluster, node, path.trim_start_matches('/'))
    }

    /// Upload every staged file for a node
    pub async fn upload(&self, node: &str, files: &NodeFiles) -> Result<()> {
        for (path, content) in files.iter() {
            let key = self.key(node, path);
            debug!("Uploading s3://{}/{}", self.bucket, key);
            self.storage
                .put_object(&self.bucket, &key, Bytes::copy_from_slice(content))
                .await?;
        }
        info!(
            "Staged {} files for node {} in bucket {}",
            files.len(),
            node,
            self.bucket
        );
        Ok(())
    }

    /// Read back a previously staged file
    pub async fn fetch(&self, node: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let key = self.key(node, path);
        let content = self.storage.get_object(&self.bucket, &key).await?;
        Ok(content.map(|b| b.to_vec()))
    }

    /// Read back a staged file as text, `None` if it was never staged
    pub async fn fetch_text(&self, node: &str, path: &str) -> Result<Option<String>> {
        match self.fetch(node, path).await? {
            Some(content) => String::from_utf8(content)
                .map(Some)
                .map_err(|e| BootstrapError::invalid_material(path, e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kit_cloud::{owned_tags, MockCloud};

    async fn make_distributor() -> (Arc<MockCloud>, Distributor) {
        let cloud = Arc::new(MockCloud::new());
        cloud
            .create_bucket("kit-demo", owned_tags("demo", "kit-demo", None))
            .await
            .unwrap();
        let distributor = Distributor::new(cloud.clone(), "demo");
        (cloud, distributor)
    }

    #[test]
    fn test_key_strips_leading_slash() {
        let distributor = Distributor::new(Arc::new(MockCloud::new()), "demo");
        assert_eq!(
            distributor.key("i-1", "/etc/kubernetes/pki/ca.crt"),
            "demo/i-1/etc/kubernetes/pki/ca.crt"
        );
        assert_eq!(distributor.bucket(), "kit-demo");
    }

    #[tokio::test]
    async fn test_upload_then_fetch() {
        let (cloud, distributor) = make_distributor().await;
        let mut files = NodeFiles::new();
        files.insert("/etc/kubernetes/admin.conf", "config");
        files.insert("/var/lib/kubelet/config.yaml", "kubelet");

        distributor.upload("i-1", &files).await.unwrap();

        assert_eq!(cloud.list_objects("kit-demo", "demo/i-1/").await.unwrap().len(), 2);
        assert_eq!(
            distributor
                .fetch_text("i-1", "/etc/kubernetes/admin.conf")
                .await
                .unwrap()
                .as_deref(),
            Some("config")
        );
        assert!(distributor
            .fetch("i-2", "/etc/kubernetes/admin.conf")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let (cloud, distributor) = make_distributor().await;
        let mut files = NodeFiles::new();
        files.insert("/etc/kubernetes/admin.conf", "first");
        distributor.upload("i-1", &files).await.unwrap();
        files.insert("/etc/kubernetes/admin.conf", "second");
        distributor.upload("i-1", &files).await.unwrap();

        assert_eq!(cloud.list_objects("kit-demo", "demo/").await.unwrap().len(), 1);
        assert_eq!(
            distributor
                .fetch_text("i-1", "/etc/kubernetes/admin.conf")
                .await
                .unwrap()
                .as_deref(),
            Some("second")
        );
    }
}
