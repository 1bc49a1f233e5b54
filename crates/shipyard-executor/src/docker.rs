//! Docker image builder implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bytes::Bytes;
use futures::StreamExt;
use shipyard_core::executor::{ImageBuildRequest, ImageBuilder, LineSink, LogLine, LogStream};
use shipyard_core::provider::RegistryCredentials;
use shipyard_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name the generated Dockerfile is stored under inside the build context.
pub const GENERATED_DOCKERFILE: &str = "Dockerfile.shipyard";

/// Builds and pushes images through the local Docker daemon.
pub struct DockerImageBuilder {
    docker: Docker,
}

impl DockerImageBuilder {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Split `registry/repo:tag` into the image name and tag.
pub fn split_tag(reference: &str) -> (&str, &str) {
    match reference.rfind(':') {
        Some(idx) if !reference[idx..].contains('/') => (&reference[..idx], &reference[idx + 1..]),
        _ => (reference, "latest"),
    }
}

/// Pack the context directory plus the generated Dockerfile into a tar archive.
pub fn build_context(context: &Path, dockerfile: &str) -> std::io::Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);
    append_tree(&mut archive, context, Path::new(""))?;

    let mut header = tar::Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    archive.append_data(&mut header, GENERATED_DOCKERFILE, dockerfile.as_bytes())?;

    archive.into_inner()
}

fn append_tree(
    archive: &mut tar::Builder<Vec<u8>>,
    dir: &Path,
    prefix: &Path,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let path = entry.path();
        let relative: PathBuf = prefix.join(&name);

        if entry.file_type()?.is_dir() {
            // Skip VCS metadata and dependency trees the image reinstalls
            if matches!(name.to_str(), Some(".git" | "node_modules" | "vendor")) {
                continue;
            }
            archive.append_dir(&relative, &path)?;
            append_tree(archive, &path, &relative)?;
        } else {
            archive.append_path_with_name(&path, &relative)?;
        }
    }
    Ok(())
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn build(&self, request: &ImageBuildRequest, on_line: LineSink<'_>) -> Result<()> {
        let context = request.context.clone();
        let dockerfile = request.dockerfile.clone();
        let tarball = tokio::task::spawn_blocking(move || build_context(&context, &dockerfile))
            .await
            .map_err(|e| Error::Internal(format!("context packing panicked: {e}")))?
            .map_err(|e| Error::Build(format!("failed to pack build context: {e}")))?;

        info!(tag = %request.tag, bytes = tarball.len(), "Building image");

        let options = BuildImageOptions {
            dockerfile: GENERATED_DOCKERFILE.to_string(),
            t: request.tag.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(Bytes::from(tarball)));
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(Error::Build(format!("image build failed: {error}")));
                    }
                    if let Some(line) = info.stream.as_deref().map(str::trim_end) {
                        if !line.is_empty() {
                            on_line(LogLine::new(LogStream::Stdout, line));
                        }
                    }
                }
                Err(e) => {
                    return Err(Error::Build(format!("image build failed: {e}")));
                }
            }
        }

        info!(tag = %request.tag, "Image built");
        Ok(())
    }

    async fn push(
        &self,
        tag: &str,
        credentials: &RegistryCredentials,
        on_line: LineSink<'_>,
    ) -> Result<String> {
        let (name, version) = split_tag(tag);
        info!(image = %name, tag = %version, "Pushing image");

        let auth = DockerCredentials {
            username: Some(credentials.username.clone()),
            password: Some(credentials.password.clone()),
            serveraddress: Some(credentials.server.clone()),
            ..Default::default()
        };

        let mut stream = self.docker.push_image(
            name,
            Some(PushImageOptions {
                tag: version.to_string(),
            }),
            Some(auth),
        );
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(Error::Build(format!("image push failed: {error}")));
                    }
                    if let Some(status) = info.status {
                        debug!(status = %status, "Push progress");
                        on_line(LogLine::new(LogStream::System, status));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Push failed");
                    return Err(Error::Build(format!("image push failed: {e}")));
                }
            }
        }

        info!(image = %tag, "Image pushed");
        Ok(tag.to_string())
    }
}

/// Stand-in used when no Docker daemon can be reached; never available.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableImageBuilder;

#[async_trait]
impl ImageBuilder for UnavailableImageBuilder {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn available(&self) -> bool {
        false
    }

    async fn build(&self, request: &ImageBuildRequest, _on_line: LineSink<'_>) -> Result<()> {
        Err(Error::Build(format!(
            "no image builder available to build {}",
            request.tag
        )))
    }

    async fn push(
        &self,
        tag: &str,
        _credentials: &RegistryCredentials,
        _on_line: LineSink<'_>,
    ) -> Result<String> {
        Err(Error::Build(format!("no image builder available to push {tag}")))
    }
}
