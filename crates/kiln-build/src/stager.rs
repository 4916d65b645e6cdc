//! Artifact staging
//!
//! Publishes toolchain outputs into a directory that other processes may be
//! reading at the same time. Every artifact is first copied into a temporary
//! file inside the publish directory and only renamed onto its final name once
//! the whole batch has been copied, so readers see either the previous file or
//! the complete new one.
//!
//! Files being replaced are hard-linked (or copied) aside before the first
//! rename. If a later rename fails, the already published artifacts are put
//! back from those links and the publish directory ends up as it started.
//!
//! Two pipelines staging into the same publish directory at once are not
//! coordinated; callers must give concurrent runs disjoint directories.

use crate::error::{BuildError, KilnResult};
use crate::targets::{validate_units, BuildUnit, StagedArtifact};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Prefix of temporary files written into the publish directory
pub const TEMP_PREFIX: &str = ".kiln-";
/// Suffix of temporary files written into the publish directory
pub const TEMP_SUFFIX: &str = ".tmp";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Artifact located in the toolchain output directory, ready to copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifact {
    /// Unit that produced the artifact
    pub unit: String,
    /// Artifact file name, kept in the publish directory
    pub artifact: String,
    /// Path in the toolchain output directory
    pub source: PathBuf,
    /// Size observed during the existence check
    pub size: u64,
}

/// Copy sitting in the publish directory under a temporary name
struct PendingArtifact {
    temp: NamedTempFile,
    artifact: StagedArtifact,
    /// Link to the file being replaced, if there was one
    backup: Option<NamedTempFile<()>>,
}

/// Stages artifacts into a publish directory
#[derive(Debug, Clone)]
pub struct ArtifactStager {
    publish_dir: PathBuf,
}

impl ArtifactStager {
    /// Create a stager publishing into `publish_dir`
    pub fn new(publish_dir: impl Into<PathBuf>) -> Self {
        Self {
            publish_dir: publish_dir.into(),
        }
    }

    /// Publish directory
    pub fn publish_dir(&self) -> &Path {
        &self.publish_dir
    }

    /// Check that every unit's artifact exists and is non-empty
    ///
    /// Nothing is written; the first missing artifact aborts the check.
    pub fn locate(
        &self,
        units: &[BuildUnit],
        output_dir: &Path,
    ) -> KilnResult<Vec<LocatedArtifact>> {
        units
            .iter()
            .map(|unit| {
                let source = output_dir.join(&unit.artifact);
                match fs::metadata(&source) {
                    Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(LocatedArtifact {
                        unit: unit.name.clone(),
                        artifact: unit.artifact.clone(),
                        source,
                        size: meta.len(),
                    }),
                    Ok(_) | Err(_) => Err(BuildError::artifact_missing(&unit.name, source)),
                }
            })
            .collect()
    }

    /// Stage every unit's artifact from `output_dir` into the publish directory
    pub fn stage(&self, units: &[BuildUnit], output_dir: &Path) -> KilnResult<Vec<StagedArtifact>> {
        validate_units(units)?;
        let located = self.locate(units, output_dir)?;
        self.publish(&located)
    }

    /// Publish artifacts returned by [`ArtifactStager::locate`]
    ///
    /// Either every artifact is published or the publish directory keeps its
    /// previous contents.
    pub fn publish(&self, located: &[LocatedArtifact]) -> KilnResult<Vec<StagedArtifact>> {
        fs::create_dir_all(&self.publish_dir)
            .map_err(|e| BuildError::not_writable(&self.publish_dir, e))?;

        // Copy everything first; dropping `pending` on error removes the temporaries
        let mut pending = Vec::with_capacity(located.len());
        for found in located {
            pending.push(self.copy_to_temp(found)?);
        }
        for item in &mut pending {
            item.backup = self.back_up(&item.artifact.destination)?;
        }

        let staged = commit(pending)?;

        sync_dir(&self.publish_dir);
        info!(
            count = staged.len(),
            publish_dir = %self.publish_dir.display(),
            "staged artifacts"
        );
        Ok(staged)
    }

    /// Remove temporary files left behind by an interrupted run
    ///
    /// Returns the number of files removed. A missing publish directory is not an error.
    pub fn sweep(&self) -> KilnResult<usize> {
        let entries = match fs::read_dir(&self.publish_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(BuildError::io(&self.publish_dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| BuildError::io(&self.publish_dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !is_temp_name(&name) {
                continue;
            }
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();
            fs::remove_file(&path).map_err(|e| BuildError::io(&path, e))?;
            warn!(path = %path.display(), "removed stale staging file");
            removed += 1;
        }

        Ok(removed)
    }

    fn copy_to_temp(&self, found: &LocatedArtifact) -> KilnResult<PendingArtifact> {
        let mut source = File::open(&found.source).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BuildError::artifact_missing(&found.unit, &found.source)
            } else {
                BuildError::io(&found.source, e)
            }
        })?;
        let permissions = source
            .metadata()
            .map_err(|e| BuildError::io(&found.source, e))?
            .permissions();

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.publish_dir)
            .map_err(|e| BuildError::not_writable(&self.publish_dir, e))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;
        let partial = |written: u64, error: std::io::Error| {
            warn!(unit = %found.unit, error = %error, "copy interrupted");
            BuildError::PartialWrite {
                unit: found.unit.clone(),
                expected: found.size,
                written,
            }
        };

        loop {
            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BuildError::io(&found.source, e)),
            };
            temp.write_all(&buffer[..n])
                .map_err(|e| partial(written, e))?;
            hasher.update(&buffer[..n]);
            written += n as u64;
        }

        temp.flush().map_err(|e| partial(written, e))?;
        temp.as_file().sync_all().map_err(|e| partial(written, e))?;

        if written != found.size {
            return Err(BuildError::PartialWrite {
                unit: found.unit.clone(),
                expected: found.size,
                written,
            });
        }

        // Temporary files are created private; keep the artifact's own mode
        fs::set_permissions(temp.path(), permissions)
            .map_err(|e| BuildError::not_writable(temp.path(), e))?;

        Ok(PendingArtifact {
            temp,
            artifact: StagedArtifact {
                unit: found.unit.clone(),
                source: found.source.clone(),
                destination: self.publish_dir.join(&found.artifact),
                size: written,
                sha256: format!("{:x}", hasher.finalize()),
            },
            backup: None,
        })
    }

    /// Keep the file at `destination` reachable under a temporary name
    ///
    /// A directory in the way fails here, before anything is renamed.
    fn back_up(&self, destination: &Path) -> KilnResult<Option<NamedTempFile<()>>> {
        match fs::symlink_metadata(destination) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BuildError::not_writable(destination, e)),
            Ok(meta) if meta.is_dir() => Err(BuildError::not_writable(
                destination,
                std::io::Error::other("a directory is in the way"),
            )),
            Ok(_) => tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .suffix(TEMP_SUFFIX)
                .make_in(&self.publish_dir, |path| link_or_copy(destination, path))
                .map(Some)
                .map_err(|e| BuildError::not_writable(destination, e)),
        }
    }
}

/// Stage `units` from `output_dir` into `publish_dir`
pub fn stage(
    units: &[BuildUnit],
    output_dir: &Path,
    publish_dir: &Path,
) -> KilnResult<Vec<StagedArtifact>> {
    ArtifactStager::new(publish_dir).stage(units, output_dir)
}

/// Rename every temporary onto its destination, undoing earlier renames on failure
fn commit(pending: Vec<PendingArtifact>) -> KilnResult<Vec<StagedArtifact>> {
    let mut published: Vec<(StagedArtifact, Option<NamedTempFile<()>>)> =
        Vec::with_capacity(pending.len());

    for PendingArtifact {
        temp,
        artifact,
        backup,
    } in pending
    {
        if let Err(e) = temp.persist(&artifact.destination) {
            let error = BuildError::not_writable(&artifact.destination, e.error);
            roll_back(&published);
            return Err(error);
        }
        debug!(
            unit = %artifact.unit,
            destination = %artifact.destination.display(),
            size = artifact.size,
            "artifact published"
        );
        published.push((artifact, backup));
    }

    // Dropping the backups removes the links to the replaced files
    Ok(published.into_iter().map(|(artifact, _)| artifact).collect())
}

fn roll_back(published: &[(StagedArtifact, Option<NamedTempFile<()>>)]) {
    for (artifact, backup) in published.iter().rev() {
        let restored = match backup {
            Some(backup) => fs::rename(backup.path(), &artifact.destination),
            None => fs::remove_file(&artifact.destination),
        };
        match restored {
            Ok(()) => debug!(unit = %artifact.unit, "previous artifact restored"),
            Err(e) => warn!(
                unit = %artifact.unit,
                destination = %artifact.destination.display(),
                error = %e,
                "could not restore previous artifact"
            ),
        }
    }
}

fn link_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(_) => fs::copy(from, to).map(|_| ()),
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Persist the renames themselves; best effort
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "could not sync publish directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        let publish = dir.path().join("res");
        fs::create_dir_all(&output).unwrap();
        for (name, bytes) in files {
            fs::write(output.join(name), bytes).unwrap();
        }
        (dir, output, publish)
    }

    #[test]
    fn test_is_temp_name() {
        assert!(is_temp_name(".kiln-abc123.tmp"));
        assert!(!is_temp_name("kt.wasm"));
        assert!(!is_temp_name(".kiln-notes"));
    }

    #[test]
    fn test_locate_reports_sizes() {
        let (_dir, output, publish) = setup(&[("a.bin", "abc")]);
        let stager = ArtifactStager::new(&publish);
        let located = stager
            .locate(&[BuildUnit::new("a", "a.bin")], &output)
            .unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].size, 3);
        assert_eq!(located[0].source, output.join("a.bin"));
        assert!(!publish.exists());
    }

    #[test]
    fn test_locate_rejects_empty_file() {
        let (_dir, output, publish) = setup(&[("a.bin", "")]);
        let err = ArtifactStager::new(&publish)
            .locate(&[BuildUnit::new("a", "a.bin")], &output)
            .unwrap_err();
        assert!(matches!(err, BuildError::ArtifactMissing { ref unit, .. } if unit == "a"));
    }

    #[test]
    fn test_locate_rejects_directory() {
        let (_dir, output, publish) = setup(&[]);
        fs::create_dir(output.join("a.bin")).unwrap();
        let err = ArtifactStager::new(&publish)
            .locate(&[BuildUnit::new("a", "a.bin")], &output)
            .unwrap_err();
        assert!(matches!(err, BuildError::ArtifactMissing { .. }));
    }

    #[test]
    fn test_stage_records_digest() {
        let (_dir, output, publish) = setup(&[("a.bin", "abc")]);
        let staged = stage(&[BuildUnit::new("a", "a.bin")], &output, &publish).unwrap();
        assert_eq!(
            staged[0].sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(staged[0].destination, publish.join("a.bin"));
        assert_eq!(fs::read(publish.join("a.bin")).unwrap(), b"abc");
    }

    #[test]
    fn test_stage_leaves_no_temporaries() {
        let (_dir, output, publish) = setup(&[("a.bin", "abc"), ("b.bin", "defg")]);
        let units = [BuildUnit::new("a", "a.bin"), BuildUnit::new("b", "b.bin")];
        stage(&units, &output, &publish).unwrap();

        let mut names: Vec<_> = fs::read_dir(&publish)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
    }

    #[test]
    fn test_sweep_removes_only_temporaries() {
        let (_dir, _output, publish) = setup(&[]);
        fs::create_dir_all(&publish).unwrap();
        fs::write(publish.join(".kiln-x1y2.tmp"), b"half").unwrap();
        fs::write(publish.join("kt.wasm"), b"keep").unwrap();

        let removed = ArtifactStager::new(&publish).sweep().unwrap();
        assert_eq!(removed, 1);
        assert!(publish.join("kt.wasm").exists());
        assert!(!publish.join(".kiln-x1y2.tmp").exists());
    }

    #[test]
    fn test_sweep_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let stager = ArtifactStager::new(dir.path().join("nope"));
        assert_eq!(stager.sweep().unwrap(), 0);
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_failed_rename_restores_published_files() {
        let (_dir, output, publish) = setup(&[
            ("alpha.bin", "NEW alpha"),
            ("gamma.bin", "NEW gamma"),
            ("beta.bin", "NEW beta"),
        ]);
        fs::create_dir_all(publish.join("beta.bin/nested")).unwrap();
        fs::write(publish.join("alpha.bin"), "OLD alpha").unwrap();

        let stager = ArtifactStager::new(&publish);
        let units = [
            BuildUnit::new("alpha", "alpha.bin"),
            BuildUnit::new("gamma", "gamma.bin"),
            BuildUnit::new("beta", "beta.bin"),
        ];
        let located = stager.locate(&units, &output).unwrap();
        let mut pending: Vec<_> = located
            .iter()
            .map(|found| stager.copy_to_temp(found).unwrap())
            .collect();
        // Skip the directory check so the third rename is the one that fails
        pending[0].backup = stager.back_up(&publish.join("alpha.bin")).unwrap();
        assert!(pending[0].backup.is_some());

        let err = commit(pending).unwrap_err();

        assert!(matches!(
            err,
            BuildError::DestinationNotWritable { ref path, .. } if *path == publish.join("beta.bin")
        ));
        assert_eq!(fs::read_to_string(publish.join("alpha.bin")).unwrap(), "OLD alpha");
        assert!(!publish.join("gamma.bin").exists());
        assert!(publish.join("beta.bin").is_dir());
        assert_eq!(entries(&publish), vec!["alpha.bin", "beta.bin"]);
    }

    #[test]
    fn test_back_up_links_existing_file() {
        let (_dir, _output, publish) = setup(&[]);
        fs::create_dir_all(&publish).unwrap();
        fs::write(publish.join("kt.wasm"), "old").unwrap();
        let stager = ArtifactStager::new(&publish);

        let backup = stager.back_up(&publish.join("kt.wasm")).unwrap().unwrap();
        assert!(is_temp_name(&backup.path().file_name().unwrap().to_string_lossy()));
        assert_eq!(fs::read_to_string(backup.path()).unwrap(), "old");
        drop(backup);

        assert_eq!(entries(&publish), vec!["kt.wasm"]);
        assert!(stager.back_up(&publish.join("absent.wasm")).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_stage_preserves_source_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, output, publish) = setup(&[("a.bin", "abc")]);
        fs::set_permissions(output.join("a.bin"), fs::Permissions::from_mode(0o644)).unwrap();
        stage(&[BuildUnit::new("a", "a.bin")], &output, &publish).unwrap();
        let mode = fs::metadata(publish.join("a.bin")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
