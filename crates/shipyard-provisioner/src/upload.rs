//! Recursive directory upload into an object store.

use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use shipyard_core::provider::{CloudProvider, ObjectUpload};
use shipyard_core::resource::{ResourceHandle, ResourceKind};
use shipyard_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Totals for one `upload_tree` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Content type served for a file, by extension.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "application/javascript",
        Some("json" | "map") => "application/json",
        Some("txt") => "text/plain",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("eot") => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

/// Object key for `path` relative to `root`, always `/`-separated.
fn object_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively collect every regular file under `dir`, skipping `.git`.
#[async_recursion::async_recursion]
async fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            collect_files(&path, out).await?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Upload every file under `root` to `store`, at most `concurrency` at a time.
///
/// The first failed upload aborts the rest.
pub async fn upload_tree(
    cloud: &dyn CloudProvider,
    store: &ResourceHandle,
    root: &Path,
    concurrency: usize,
) -> Result<UploadSummary> {
    let mut files = Vec::new();
    collect_files(root, &mut files).await.map_err(|e| {
        Error::Build(format!("failed to read output directory {}: {}", root.display(), e))
    })?;
    files.sort();

    info!(store = %store.name, files = files.len(), "Uploading directory");

    let mut uploads = futures::stream::iter(files)
        .map(|path| async move {
            let body = tokio::fs::read(&path).await.map_err(|e| {
                Error::Build(format!("failed to read {}: {}", path.display(), e))
            })?;
            let key = object_key(root, &path);
            let size = body.len() as u64;
            let object = ObjectUpload {
                checksum: hex::encode(Sha256::digest(&body)),
                content_type: content_type(&path).to_string(),
                body: Bytes::from(body),
                key: key.clone(),
            };
            cloud.put_object(store, object).await.map_err(|e| {
                Error::provisioning(ResourceKind::ObjectStore, format!("upload {key}: {e}"))
            })?;
            debug!(key = %key, bytes = size, "Uploaded object");
            Ok::<u64, Error>(size)
        })
        .buffer_unordered(concurrency.max(1));

    let mut summary = UploadSummary::default();
    while let Some(result) = uploads.next().await {
        summary.bytes += result?;
        summary.files += 1;
    }

    info!(store = %store.name, files = summary.files, bytes = summary.bytes, "Directory uploaded");
    Ok(summary)
}
