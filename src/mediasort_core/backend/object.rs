//! [`BlobStore`] over the `object_store` clients: Azure Blob Storage, S3,
//! a local directory tree or an in-process store, picked by URL scheme.
//!
//! Each container maps to one store instance built from the configured URL
//! template, e.g. `az://{container}`, `s3://{container}` or
//! `file:///srv/blobs/{container}`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload};
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use url::Url;

use crate::mediasort_core::backend::blob::{BlobProperties, BlobStore};
use crate::mediasort_core::backend::{ReadSeek, join_key};
use crate::mediasort_core::config::{BlobServiceConfig, CONTAINER_PLACEHOLDER};
use crate::mediasort_core::error::{MediasortError, Result};

/// Environment variables the cloud clients understand, passed through as options.
const ENV_OPTION_PREFIXES: &[&str] = &["AZURE_", "AWS_"];

struct Container {
    store: Arc<dyn ObjectStore>,
    /// Path of the container root inside `store`.
    root: Path,
    /// Set for `file://` containers.
    local_dir: Option<PathBuf>,
}

impl Container {
    fn path(&self, key: &str) -> Path {
        Path::from(join_key(self.root.as_ref(), key))
    }

    fn relative(&self, location: &Path) -> Option<String> {
        let root = self.root.as_ref();
        if root.is_empty() {
            return Some(location.to_string());
        }
        location
            .as_ref()
            .strip_prefix(root)?
            .strip_prefix('/')
            .map(str::to_string)
    }
}

/// A blob service reached through `object_store`.
pub struct ObjectBlobStore {
    url_template: String,
    options: BTreeMap<String, String>,
    runtime: Runtime,
    containers: Mutex<HashMap<String, Arc<Container>>>,
}

impl ObjectBlobStore {
    /// Build a store from configuration. Config options win over `AZURE_*` / `AWS_*`
    /// environment variables.
    pub fn new(config: &BlobServiceConfig) -> Result<Self> {
        let mut options: BTreeMap<String, String> = std::env::vars()
            .filter(|(key, _)| ENV_OPTION_PREFIXES.iter().any(|p| key.starts_with(p)))
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();
        options.extend(config.options.clone());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mediasort-blob")
            .enable_all()
            .build()?;

        Ok(Self {
            url_template: config.url.clone(),
            options,
            runtime,
            containers: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Container>>>> {
        self.containers
            .lock()
            .map_err(|_| MediasortError::Blob("container cache lock poisoned".to_string()))
    }

    fn container(&self, name: &str) -> Result<Arc<Container>> {
        let mut containers = self.lock()?;
        if let Some(container) = containers.get(name) {
            return Ok(Arc::clone(container));
        }
        if name.is_empty() || name.contains('/') {
            return Err(MediasortError::Argument(format!(
                "'{}' is not a container name",
                name
            )));
        }

        let raw = self.url_template.replace(CONTAINER_PLACEHOLDER, name);
        let url = Url::parse(&raw)
            .map_err(|e| MediasortError::Config(format!("blob url '{}': {}", raw, e)))?;
        let (store, root) = object_store::parse_url_opts(&url, self.options.iter())?;
        let local_dir = match url.scheme() {
            "file" => url.to_file_path().ok(),
            _ => None,
        };
        log::debug!("Opened container {} at {}", name, url);

        let container = Arc::new(Container {
            store: Arc::from(store),
            root,
            local_dir,
        });
        containers.insert(name.to_string(), Arc::clone(&container));
        Ok(container)
    }
}

impl std::fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("url_template", &self.url_template)
            .finish_non_exhaustive()
    }
}

fn properties(container: &Container, meta: ObjectMeta) -> Option<BlobProperties> {
    Some(BlobProperties {
        name: container.relative(&meta.location)?,
        content_length: meta.size as u64,
        content_type: None,
        last_modified: OffsetDateTime::from_unix_timestamp(meta.last_modified.timestamp()).ok(),
    })
}

impl BlobStore for ObjectBlobStore {
    fn container_exists(&self, container: &str) -> Result<bool> {
        let c = self.container(container)?;
        if let Some(dir) = &c.local_dir {
            return Ok(dir.is_dir());
        }
        match self.runtime.block_on(c.store.list_with_delimiter(Some(&c.root))) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create_container_if_not_exists(&self, container: &str) -> Result<()> {
        let c = self.container(container)?;
        match &c.local_dir {
            Some(dir) => fs::create_dir_all(dir)?,
            None => log::debug!("Assuming container {} is provisioned", container),
        }
        Ok(())
    }

    fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<BlobProperties>> {
        let c = self.container(container)?;
        let prefix = prefix.unwrap_or("");
        // Listing works on whole segments; the partial last one is filtered below.
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => c.path(dir),
            None => c.root.clone(),
        };

        let metas: Vec<ObjectMeta> = self
            .runtime
            .block_on(c.store.list(Some(&dir)).try_collect::<Vec<_>>())?;
        let mut blobs: Vec<BlobProperties> = metas
            .into_iter()
            .filter_map(|meta| properties(&c, meta))
            .filter(|blob| blob.name.starts_with(prefix))
            .collect();
        blobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(blobs)
    }

    fn blob_exists(&self, container: &str, name: &str) -> Result<bool> {
        let c = self.container(container)?;
        match self.runtime.block_on(c.store.head(&c.path(name))) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn open_blob(&self, container: &str, name: &str) -> Result<Box<dyn ReadSeek + Send>> {
        let c = self.container(container)?;
        let path = c.path(name);
        let bytes = self.runtime.block_on(async {
            let result = c.store.get(&path).await?;
            result.bytes().await
        })?;
        Ok(Box::new(Cursor::new(bytes.to_vec())))
    }

    fn upload_blob(
        &self,
        container: &str,
        name: &str,
        data: &mut dyn Read,
        content_type: Option<&str>,
        overwrite: bool,
    ) -> Result<()> {
        let c = self.container(container)?;
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer)?;

        // The filesystem store keeps no attributes.
        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type.filter(|_| c.local_dir.is_none()) {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let options = PutOptions {
            mode: if overwrite { PutMode::Overwrite } else { PutMode::Create },
            attributes,
            ..Default::default()
        };

        let path = c.path(name);
        let put = c.store.put_opts(&path, PutPayload::from(buffer), options);
        match self.runtime.block_on(put) {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => Err(
                MediasortError::DestinationExists(format!("{}/{}", container, name)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_blob_if_exists(&self, container: &str, name: &str) -> Result<bool> {
        let c = self.container(container)?;
        let path = c.path(name);
        match self.runtime.block_on(c.store.head(&path)) {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.runtime.block_on(c.store.delete(&path))?;
        Ok(true)
    }
}
