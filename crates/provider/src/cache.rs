//! Downloads, extracts, and locates provider plugin binaries on disk,
//! keyed by `namespace_type@version`.

use std::io::Write;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use infractl_core::model::ProviderConfig;
use infractl_core::{Error, Result};

use crate::registry::RegistryClient;

/// Downloads, extracts, and locates provider plugin binaries under a single
/// working directory, keyed by `namespace_type@version`.
pub struct BinaryCache {
    base_dir: PathBuf,
    registry: RegistryClient,
    /// Per-key extraction latch: the contract requires at most one
    /// successful extraction per key per process.
    locks: DashMap<String, std::sync::Arc<Mutex<()>>>,
}

impl BinaryCache {
    /// Creates a cache rooted at `base_dir`, using `registry` to resolve
    /// downloads.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, registry: RegistryClient) -> Self {
        Self { base_dir: base_dir.into(), registry, locks: DashMap::new() }
    }

    /// The registry client this cache resolves downloads through.
    #[must_use]
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    fn cache_key(config: &ProviderConfig) -> String {
        format!("{}_{}@{}", config.namespace(), config.type_name(), config.version)
    }

    fn cache_dir(&self, config: &ProviderConfig) -> PathBuf {
        self.base_dir.join(Self::cache_key(config))
    }

    /// `Resolve(providerConfig) -> binaryPath`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderLoadFailed`] if the archive cannot be
    /// downloaded or extracted, or if no `terraform-provider-*` binary is
    /// found afterward.
    #[instrument(skip(self), fields(provider = %config.name, version = %config.version))]
    pub async fn resolve(&self, config: &ProviderConfig) -> Result<PathBuf> {
        let key = Self::cache_key(config);
        let dir = self.cache_dir(config);

        if let Some(existing) = find_provider_binary(&dir) {
            debug!(path = %existing.display(), "reusing cached provider binary");
            return Ok(existing);
        }

        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: another task may have just
        // finished extracting.
        if let Some(existing) = find_provider_binary(&dir) {
            return Ok(existing);
        }

        std::fs::create_dir_all(&dir)?;

        let os = std::env::consts::OS;
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };

        let download = self
            .registry
            .get_provider_download(config.namespace(), config.type_name(), &config.version, os, arch)
            .await?;

        info!(url = %download.download_url, "downloading provider archive");

        let archive_path = dir.join(&download.filename);
        self.download_to_file(&download.download_url, &archive_path).await?;
        extract_zip(&archive_path, &dir)?;
        let _ = std::fs::remove_file(&archive_path);

        find_provider_binary(&dir).ok_or_else(|| Error::ProviderLoadFailed {
            full_name: format!("{}@{}", config.name, config.version),
            message: format!("no terraform-provider-* binary found in {}", dir.display()),
        })
    }

    async fn download_to_file(&self, url: &str, dest: &Path) -> Result<()> {
        let mut stream = self.registry.download(url).await?;
        let mut file = std::fs::File::create(dest)?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::ProviderLoadFailed {
                full_name: String::new(),
                message: format!("failed reading archive stream: {e}"),
            })?;
            file.write_all(&chunk)?;
        }
        Ok(())
    }
}

/// Extracts every entry of a zip archive into `dest`, preserving Unix file
/// modes the same way the archive recorded them (mirrors the tar/gzip
/// extraction pattern used elsewhere in this workspace, adapted to the zip
/// format OpenTofu registry archives are published in).
fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| Error::ProviderLoadFailed {
        full_name: String::new(),
        message: format!("failed to open provider archive: {e}"),
    })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| Error::ProviderLoadFailed {
            full_name: String::new(),
            message: format!("failed to read archive entry {i}: {e}"),
        })?;
        let Some(out_path) = entry.enclosed_name() else { continue };
        let out_path = dest.join(out_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

fn find_provider_binary(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name()?.to_str()?;
        if !name.contains("terraform-provider-") {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = entry.metadata() {
                let mut perms = meta.permissions();
                if perms.mode() & 0o111 == 0 {
                    perms.set_mode(perms.mode() | 0o111);
                    let _ = std::fs::set_permissions(&path, perms);
                }
            }
        }
        return Some(path);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn finds_binary_by_basename_substring() {
        let dir = tempfile::tempdir().unwrap();
        let bin_path = dir.path().join("terraform-provider-random_v3.7.2");
        {
            let mut f = std::fs::File::create(&bin_path).unwrap();
            f.write_all(b"#!/bin/sh\n").unwrap();
        }
        let found = find_provider_binary(dir.path());
        assert_eq!(found, Some(bin_path));
    }

    #[test]
    fn no_binary_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_provider_binary(dir.path()).is_none());
    }
}
