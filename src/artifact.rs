use std::any::Any;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use uuid::Uuid;

use crate::codec::CodecRegistry;
use crate::document::Opaque;
use crate::error::LedgerError;

pub const RUN_DIR_KEY: &str = "__run_dir__";
pub const ID_KEY: &str = "__id__";
pub const TYPE_KEY: &str = "__type__";

/// Handle to a value persisted under a run's `artifacts/` directory.
///
/// Artifacts have reference semantics: cloning the handle never copies the
/// backing file, and every [`Artifact::create`] call writes a fresh file even
/// for identical values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    run_dir: PathBuf,
    id: String,
    type_name: String,
}

impl Artifact {
    /// Persist `value` under `run_dir` using the registry writer for `T`.
    pub fn create<T: Any>(value: &T, run_dir: &Path, registry: &CodecRegistry) -> Result<Self> {
        Self::create_dyn(value, std::any::type_name::<T>(), run_dir, registry)
    }

    /// Persist an opaque document value.
    pub fn create_opaque(value: &Opaque, run_dir: &Path, registry: &CodecRegistry) -> Result<Self> {
        Self::create_dyn(value.as_any(), value.type_name(), run_dir, registry)
    }

    fn create_dyn(
        value: &dyn Any,
        display_name: &str,
        run_dir: &Path,
        registry: &CodecRegistry,
    ) -> Result<Self> {
        if !registry.has_writer(Any::type_id(value)) {
            return Err(LedgerError::TypeNotSupported(display_name.to_string()).into());
        }
        let dir = artifacts_dir(run_dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let id = Uuid::new_v4().simple().to_string();
        let (type_name, stored) = registry.write_dyn(value, display_name, &dir.join(&id))?;
        tracing::debug!(artifact = %id, path = %stored.display(), "Wrote artifact");

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            id,
            type_name: type_name.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Reference fragment embedded in documents.
    pub fn to_reference(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            RUN_DIR_KEY.to_string(),
            serde_json::Value::String(self.run_dir.to_string_lossy().into_owned()),
        );
        map.insert(ID_KEY.to_string(), serde_json::Value::String(self.id.clone()));
        map.insert(
            TYPE_KEY.to_string(),
            serde_json::Value::String(self.type_name.clone()),
        );
        serde_json::Value::Object(map)
    }

    /// Whether `map` has exactly the shape of an artifact reference.
    pub fn is_reference(map: &serde_json::Map<String, serde_json::Value>) -> bool {
        map.len() == 3
            && [RUN_DIR_KEY, ID_KEY, TYPE_KEY]
                .iter()
                .all(|k| map.get(*k).is_some_and(|v| v.is_string()))
    }

    /// Rebuild a handle from its reference fragment. No file is touched.
    pub fn from_reference(map: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        if !Self::is_reference(map) {
            return None;
        }
        Some(Self {
            run_dir: PathBuf::from(map[RUN_DIR_KEY].as_str()?),
            id: map[ID_KEY].as_str()?.to_string(),
            type_name: map[TYPE_KEY].as_str()?.to_string(),
        })
    }

    /// Locate the backing file. Writers may have appended an extension, so
    /// any file in `artifacts/` whose stem is the id matches.
    pub fn stored_path(&self) -> Result<PathBuf> {
        let dir = artifacts_dir(&self.run_dir);
        let not_found = || LedgerError::ArtifactNotFound {
            id: self.id.clone(),
            dir: dir.clone(),
        };

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found().into()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(self.id.as_str()) {
                return Ok(path);
            }
        }
        Err(not_found().into())
    }

    /// Read the backing file with the reader registered for this artifact's type.
    pub fn load(&self, registry: &CodecRegistry) -> Result<Opaque> {
        let path = self.stored_path()?;
        let value = registry.read_named(&path, &self.type_name)?;
        Ok(Opaque::from_boxed(value, &self.type_name))
    }

    /// Typed variant of [`Artifact::load`].
    pub fn load_as<T: Any>(&self, registry: &CodecRegistry) -> Result<T> {
        let path = self.stored_path()?;
        registry.read::<T>(&path)
    }

    /// Remove the backing file. Removing an already-missing artifact is not an error.
    pub fn delete(&self) -> Result<()> {
        match self.stored_path() {
            Ok(path) => {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                tracing::debug!(artifact = %self.id, "Deleted artifact");
                Ok(())
            }
            Err(e)
                if matches!(
                    e.downcast_ref::<LedgerError>(),
                    Some(LedgerError::ArtifactNotFound { .. })
                ) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

pub fn artifacts_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("artifacts")
}
