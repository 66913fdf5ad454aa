//! Provisioning pipeline: copy host directories into a running container
//! and install extension dependencies.
//!
//! Copies travel as in-memory tar archives through the engine's upload
//! capability. The dependency pass never interpolates manifest content into
//! a command line; filtered manifests reach the container through the
//! engine's file-write primitive and are installed by path.

use crate::CoreError;
use atelier_engine::{ContainerEngine, ExecRequest};
use atelier_schema::{extensions_container_path, MountPlan, MountPoint};
use std::fs;
use std::path::Path;
use tokio::task;
use tracing::{debug, info, warn};

/// File name an extension declares its dependencies in.
pub const MANIFEST_FILE: &str = "requirements.txt";

/// Name of the filtered manifest written next to the original for the
/// duration of one install.
pub const TEMP_MANIFEST: &str = "temp_requirements.txt";

/// Runs the copy and dependency-install steps against one container.
pub struct Provisioner<'a> {
    engine: &'a dyn ContainerEngine,
    blacklist: &'a [String],
    excludes: &'a [String],
}

impl<'a> Provisioner<'a> {
    pub fn new(
        engine: &'a dyn ContainerEngine,
        blacklist: &'a [String],
        excludes: &'a [String],
    ) -> Self {
        Self {
            engine,
            blacklist,
            excludes,
        }
    }

    /// Copy every `copy` descriptor into the container, then, if the
    /// extensions directory was copied or is bind-mounted, install each
    /// extension's declared dependencies.
    ///
    /// Per-directory failures are logged and do not abort the remaining
    /// work. Returns true iff the extensions directory was provisioned,
    /// which tells the caller a container restart is needed.
    pub async fn provision(
        &self,
        container_id: &str,
        plan: &MountPlan,
        app_root: &str,
    ) -> Result<bool, CoreError> {
        let extensions_target = extensions_container_path(app_root);
        let mut extensions_touched = plan.has_extensions_bind(app_root);

        for point in plan.copies() {
            match self.copy_directory(container_id, point).await {
                Ok(()) => {
                    if point.container_path == extensions_target {
                        extensions_touched = true;
                    }
                }
                Err(error) => warn!(
                    container = container_id,
                    host = %point.host_path.display(),
                    %error,
                    "directory provisioning failed, continuing"
                ),
            }
        }

        if extensions_touched {
            if let Err(error) = self
                .install_extension_dependencies(container_id, &extensions_target)
                .await
            {
                warn!(container = container_id, %error, "dependency pass failed");
            }
        }

        Ok(extensions_touched)
    }

    async fn copy_directory(&self, id: &str, point: &MountPoint) -> Result<(), CoreError> {
        let host = point.host_path.clone();
        let excludes = self.excludes.to_vec();
        let archive = task::spawn_blocking(move || archive_directory(&host, &excludes))
            .await
            .map_err(|e| CoreError::Internal(format!("archive task failed: {e}")))??;

        self.ensure_container_dir(id, &point.container_path).await?;
        self.engine
            .upload_archive(id, &point.container_path, archive)
            .await?;
        info!(
            container = id,
            host = %point.host_path.display(),
            target = %point.container_path,
            "directory copied into container"
        );
        Ok(())
    }

    async fn ensure_container_dir(&self, id: &str, path: &str) -> Result<(), CoreError> {
        let out = self
            .engine
            .exec(id, &ExecRequest::new(["mkdir", "-p", path]))
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "mkdir -p {path} exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            )))
        }
    }

    /// Enumerate the immediate subdirectories of the extensions directory
    /// inside the container and install each one's manifest. Excluded names
    /// (the manager's reserved directory among them) are never installed;
    /// individual extension failures are logged and skipped.
    async fn install_extension_dependencies(
        &self,
        id: &str,
        extensions_dir: &str,
    ) -> Result<(), CoreError> {
        let listing = self
            .engine
            .exec(
                id,
                &ExecRequest::new([
                    "find",
                    extensions_dir,
                    "-mindepth",
                    "1",
                    "-maxdepth",
                    "1",
                    "-type",
                    "d",
                ]),
            )
            .await?;
        if !listing.success() {
            return Err(CoreError::Internal(format!(
                "listing {extensions_dir} exited {}: {}",
                listing.exit_code,
                listing.stderr.trim()
            )));
        }

        for subdir in listing.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let name = subdir.rsplit('/').next().unwrap_or(subdir);
            if self.excludes.iter().any(|e| e == name) {
                debug!(container = id, extension = subdir, "reserved directory, skipping");
                continue;
            }
            if let Err(error) = self.install_manifest(id, subdir).await {
                warn!(
                    container = id,
                    extension = subdir,
                    %error,
                    "dependency install failed, continuing"
                );
            }
        }
        Ok(())
    }

    async fn install_manifest(&self, id: &str, subdir: &str) -> Result<(), CoreError> {
        let manifest = format!("{subdir}/{MANIFEST_FILE}");
        let probe = self
            .engine
            .exec(id, &ExecRequest::new(["test", "-f", &manifest]))
            .await?;
        if !probe.success() {
            debug!(container = id, extension = subdir, "no manifest, skipping");
            return Ok(());
        }

        let raw = self
            .engine
            .exec(id, &ExecRequest::new(["cat", &manifest]))
            .await?;
        if !raw.success() {
            return Err(CoreError::Internal(format!(
                "reading {manifest} exited {}: {}",
                raw.exit_code,
                raw.stderr.trim()
            )));
        }

        let filtered = filter_requirements(&raw.stdout, self.blacklist);
        self.engine
            .write_file(id, subdir, TEMP_MANIFEST, filtered.as_bytes())
            .await?;

        let temp_path = format!("{subdir}/{TEMP_MANIFEST}");
        let install = self
            .engine
            .exec(id, &ExecRequest::new(["pip", "install", "-r", &temp_path]))
            .await?;

        if let Err(error) = self
            .engine
            .exec(id, &ExecRequest::new(["rm", "-f", &temp_path]))
            .await
        {
            debug!(container = id, %error, "temp manifest cleanup failed");
        }

        if install.success() {
            info!(container = id, extension = subdir, "dependencies installed");
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "pip install for {subdir} exited {}: {}",
                install.exit_code,
                install.stderr.trim()
            )))
        }
    }
}

/// Drop every manifest line whose leading package token exactly matches a
/// blacklisted name (case-insensitive); all other lines pass through
/// verbatim.
pub fn filter_requirements(manifest: &str, blacklist: &[String]) -> String {
    let mut out = String::with_capacity(manifest.len());
    for line in manifest.lines() {
        let token = leading_package_token(line);
        if !token.is_empty()
            && blacklist.iter().any(|b| token.eq_ignore_ascii_case(b))
        {
            debug!(line, "dropping blacklisted requirement");
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// The package name at the start of a requirement line, before any version
/// specifier, extras bracket or environment marker.
fn leading_package_token(line: &str) -> &str {
    let trimmed = line.trim_start();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(trimmed.len());
    &trimmed[..end]
}

/// Tar up a directory's contents with entry paths relative to `root`,
/// excluding directories whose name matches an exclusion at any depth.
/// Entries are sorted so an unchanged tree archives identically.
pub fn archive_directory(root: &Path, excludes: &[String]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    append_dir_contents(&mut builder, root, Path::new(""), excludes)?;
    builder.into_inner()
}

fn append_dir_contents(
    builder: &mut tar::Builder<Vec<u8>>,
    dir: &Path,
    rel: &Path,
    excludes: &[String],
) -> std::io::Result<()> {
    let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let entry_rel = rel.join(&name);

        if entry.file_type()?.is_dir() {
            if excludes.contains(&name) {
                debug!(path = %path.display(), "excluded from archive");
                continue;
            }
            builder.append_dir(&entry_rel, &path)?;
            append_dir_contents(builder, &path, &entry_rel, excludes)?;
        } else {
            builder.append_path_with_name(&path, &entry_rel)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blacklist(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn filtering_matches_exact_leading_token_only() {
        let manifest = "torch==2.1.0\ntorchvision\nnumpy>=1.24\n  torch\nTorch[cu12]\n";
        let filtered = filter_requirements(manifest, &blacklist(&["torch"]));
        assert_eq!(filtered, "torchvision\nnumpy>=1.24\n");
    }

    #[test]
    fn filtering_preserves_comments_and_blank_lines() {
        let manifest = "# pinned for cuda\n\nnumpy\n";
        let filtered = filter_requirements(manifest, &blacklist(&["numpy2"]));
        assert_eq!(filtered, manifest);
    }

    #[test]
    fn filtering_with_empty_blacklist_is_identity() {
        let manifest = "torch\nnumpy\n";
        assert_eq!(filter_requirements(manifest, &[]), manifest);
    }

    #[test]
    fn leading_token_stops_at_specifiers() {
        assert_eq!(leading_package_token("pillow>=9"), "pillow");
        assert_eq!(leading_package_token("scikit-learn==1.3"), "scikit-learn");
        assert_eq!(leading_package_token("ruamel.yaml"), "ruamel.yaml");
        assert_eq!(leading_package_token("pkg [extra]"), "pkg");
        assert_eq!(leading_package_token("# comment"), "");
        assert_eq!(leading_package_token(""), "");
    }

    #[test]
    fn archive_skips_excluded_directories_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ext-a/__pycache__")).unwrap();
        fs::create_dir_all(dir.path().join("ext-a/src")).unwrap();
        fs::write(dir.path().join("ext-a/src/node.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("ext-a/__pycache__/node.pyc"), "junk").unwrap();
        fs::write(dir.path().join("top.txt"), "hello").unwrap();

        let archive =
            archive_directory(dir.path(), &blacklist(&["__pycache__"])).unwrap();

        let mut reader = tar::Archive::new(archive.as_slice());
        let paths: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();

        assert!(paths.contains(&"ext-a/src/node.py".to_owned()));
        assert!(paths.contains(&"top.txt".to_owned()));
        assert!(!paths.iter().any(|p| p.contains("__pycache__")));
    }

    #[test]
    fn archive_of_unchanged_tree_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let first = archive_directory(dir.path(), &[]).unwrap();
        let second = archive_directory(dir.path(), &[]).unwrap();
        assert_eq!(first, second);
    }
}
