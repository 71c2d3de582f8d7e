//! Artifact persistence: the storage seam and its filesystem implementation

use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::ArtifactKind;
use crate::config::EngineConfig;
use crate::error::StorageFailure;
use crate::request::ArtifactName;

const MAX_VERSION_SUFFIX: u32 = 999;

/// What happens when the target name already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy
{   /// Fail with `StorageFailure::Collision`, leaving the existing file alone
    #[default]
    Reject
  , /// Store as `name_v2.abap`, `name_v3.abap`, ... instead
    VersionSuffix
}

/// Where a stored artifact can be loaded from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation(pub PathBuf);

impl StorageLocation
{   pub fn path(&self) -> &Path
    {   &self.0
    }
}

impl std::fmt::Display for StorageLocation
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {   write!(f, "{}", self.0.display())
    }
}

/// Durable storage for validated artifacts.
///
/// `store` is all or nothing: on failure no partial artifact is visible
/// under the name. `load` returns exactly the bytes that were stored.
#[async_trait]
pub trait ArtifactStore: Send + Sync
{   async fn store(
      &self
    , name: &ArtifactName
    , kind: ArtifactKind
    , bytes: &[u8]
    ) -> Result<StorageLocation, StorageFailure>;

    async fn load(
      &self
    , location: &StorageLocation
    ) -> Result<Vec<u8>, StorageFailure>;
}

/// Stores artifacts as files below a root directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore
{   root: PathBuf
  , collision_policy: CollisionPolicy
}

impl FsArtifactStore
{   pub fn new(
      root: impl Into<PathBuf>
    , collision_policy: CollisionPolicy
    ) -> Self
    {   FsArtifactStore
        {   root: root.into()
          , collision_policy
        }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &EngineConfig) -> Self
    {   Self::new(root, config.collision_policy)
    }

    pub fn root(&self) -> &Path
    {   &self.root
    }

    fn target_dir(&self, name: &ArtifactName) -> Result<PathBuf, StorageFailure>
    {   let relative = Path::new(&name.directory.0);
        for component in relative.components()
        {   match component
            {   Component::Normal(_) | Component::CurDir => {}
              , _ => {
                  return Err(StorageFailure::InvalidName(name.directory.0.clone()));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

fn check_file_name(file_name: &str) -> Result<(), StorageFailure>
{   let trimmed = file_name.trim();
    if trimmed.is_empty()
      || trimmed == "."
      || trimmed == ".."
      || trimmed.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
    {   return Err(StorageFailure::InvalidName(file_name.to_string()));
    }
    Ok(())
}

/// `name_vN.ext` for `name.ext`
fn versioned_name(file_name: &str, version: u32) -> String
{   match file_name.rsplit_once('.')
    {   Some((stem, ext)) if !stem.is_empty() => {
          format!("{}_v{}.{}", stem, version, ext)
        }
      , _ => format!("{}_v{}", file_name, version)
    }
}

fn io_failure(context: &str, err: std::io::Error) -> StorageFailure
{   StorageFailure::Io(format!("{}: {}", context, err))
}

/// Write through a synced temp file, then link it into place without
/// replacing anything
fn write_atomic(
  dir: &Path
, file_name: &str
, bytes: &[u8]
, policy: CollisionPolicy
) -> Result<PathBuf, StorageFailure>
{   std::fs::create_dir_all(dir)
      .map_err(|e| io_failure(&format!("creating {}", dir.display()), e))?;

    let mut temp = NamedTempFile::new_in(dir)
      .map_err(|e| io_failure("creating temporary file", e))?;
    temp.write_all(bytes)
      .map_err(|e| io_failure("writing temporary file", e))?;
    temp.as_file()
      .sync_all()
      .map_err(|e| io_failure("syncing temporary file", e))?;

    let mut target = dir.join(file_name);
    let mut version = 1;
    loop
    {   match temp.persist_noclobber(&target)
        {   Ok(_) => return Ok(target)
          , Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
              if policy == CollisionPolicy::Reject || version >= MAX_VERSION_SUFFIX
              {   return Err(StorageFailure::Collision(
                    target.display().to_string()
                  ));
              }
              version += 1;
              debug!("{} exists, trying version {}", target.display(), version);
              target = dir.join(versioned_name(file_name, version));
              temp = err.file;
            }
          , Err(err) => {
              return Err(io_failure(
                &format!("persisting {}", target.display()),
                err.error
              ));
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore
{   async fn store(
      &self
    , name: &ArtifactName
    , kind: ArtifactKind
    , bytes: &[u8]
    ) -> Result<StorageLocation, StorageFailure>
    {   check_file_name(&name.file_name)?;
        let dir = self.target_dir(name)?;
        let file_name = name.file_name.trim().to_string();
        let bytes = bytes.to_vec();
        let policy = self.collision_policy;

        let path = tokio::task::spawn_blocking(move || {
          write_atomic(&dir, &file_name, &bytes, policy)
        })
        .await
        .map_err(|e| StorageFailure::Io(format!("store task failed: {}", e)))?
        .map_err(|failure| {
          warn!("Storing {} artifact failed: {}", kind, failure);
          failure
        })?;

        info!("Stored {} artifact at {}", kind, path.display());
        Ok(StorageLocation(path))
    }

    async fn load(
      &self
    , location: &StorageLocation
    ) -> Result<Vec<u8>, StorageFailure>
    {   tokio::fs::read(location.path())
          .await
          .map_err(|e| match e.kind()
          {   ErrorKind::NotFound => StorageFailure::NotFound(location.to_string())
            , _ => io_failure(&format!("reading {}", location), e)
          })
    }
}
