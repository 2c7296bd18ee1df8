pub mod ndarray;
pub mod table;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::Result;

use crate::error::LedgerError;

pub use self::ndarray::{ArrayData, NdArray};
pub use self::table::Table;

/// A type that can be written to and read from an artifact file.
///
/// `TYPE_NAME` is what ends up in the `__type__` field of an artifact
/// reference, so it must stay stable across releases.
pub trait Storable: Any + Send + Sync {
    const TYPE_NAME: &'static str;
}

type WriteFn = Arc<dyn Fn(&dyn Any, &Path) -> Result<PathBuf> + Send + Sync>;
type ReadFn = Arc<dyn Fn(&Path) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;

struct WriterEntry {
    type_name: &'static str,
    write: WriteFn,
}

#[derive(Default)]
struct Entries {
    writers: HashMap<TypeId, WriterEntry>,
    readers: HashMap<&'static str, ReadFn>,
    reader_names: HashMap<TypeId, &'static str>,
}

/// Registry of writer/reader functions keyed by concrete runtime type.
///
/// Lookups are exact: a writer registered for `T` is never used for a
/// wrapper or a type that merely converts into `T`.
#[derive(Default)]
pub struct CodecRegistry {
    entries: RwLock<Entries>,
}

impl CodecRegistry {
    /// An empty registry, without the built-in codecs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `Table` and `NdArray` codecs.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_writer::<Table, _>(table::write_csv);
        registry.register_reader::<Table, _>(table::read_csv);
        registry.register_writer::<NdArray, _>(ndarray::write_npy);
        registry.register_reader::<NdArray, _>(ndarray::read_npy);
        registry
    }

    /// Process-wide default registry, initialized with the built-ins on first use.
    pub fn global() -> Arc<CodecRegistry> {
        static GLOBAL: OnceLock<Arc<CodecRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(CodecRegistry::with_builtins()))
            .clone()
    }

    /// Register (or replace) the writer for `T`. The last registration wins.
    pub fn register_writer<T, F>(&self, writer: F)
    where
        T: Storable,
        F: Fn(&T, &Path) -> Result<PathBuf> + Send + Sync + 'static,
    {
        let write: WriteFn = Arc::new(move |value: &dyn Any, path: &Path| {
            let value = value
                .downcast_ref::<T>()
                .ok_or_else(|| LedgerError::TypeNotSupported(T::TYPE_NAME.to_string()))?;
            writer(value, path)
        });
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.writers.insert(
            TypeId::of::<T>(),
            WriterEntry {
                type_name: T::TYPE_NAME,
                write,
            },
        );
    }

    /// Register (or replace) the reader for `T`. The last registration wins.
    pub fn register_reader<T, F>(&self, reader: F)
    where
        T: Storable,
        F: Fn(&Path) -> Result<T> + Send + Sync + 'static,
    {
        let read: ReadFn = Arc::new(move |path: &Path| {
            let value = reader(path)?;
            Ok(Box::new(value) as Box<dyn Any + Send + Sync>)
        });
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.readers.insert(T::TYPE_NAME, read);
        entries.reader_names.insert(TypeId::of::<T>(), T::TYPE_NAME);
    }

    /// Drop both the writer and the reader registered for `T`.
    pub fn unregister<T: Storable>(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.writers.remove(&TypeId::of::<T>());
        entries.readers.remove(T::TYPE_NAME);
        entries.reader_names.remove(&TypeId::of::<T>());
    }

    /// Whether a writer exists for the given runtime type.
    pub fn has_writer(&self, type_id: TypeId) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.writers.contains_key(&type_id)
    }

    /// Stable type name of the writer registered for `type_id`.
    pub fn type_name_of(&self, type_id: TypeId) -> Option<&'static str> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.writers.get(&type_id).map(|w| w.type_name)
    }

    /// Write `value` at `base_path`. Returns the stored path, which may carry
    /// an extension the writer appended.
    pub fn write<T: Any>(&self, value: &T, base_path: &Path) -> Result<PathBuf> {
        self.write_dyn(value, std::any::type_name::<T>(), base_path)
            .map(|(_, path)| path)
    }

    /// Type-erased write used by the document encoder. Returns the registered
    /// type name alongside the stored path.
    pub fn write_dyn(
        &self,
        value: &dyn Any,
        display_name: &str,
        base_path: &Path,
    ) -> Result<(&'static str, PathBuf)> {
        let (type_name, write) = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let entry = entries
                .writers
                .get(&Any::type_id(value))
                .ok_or_else(|| LedgerError::TypeNotSupported(display_name.to_string()))?;
            (entry.type_name, entry.write.clone())
        };
        let stored = write(value, base_path)?;
        Ok((type_name, stored))
    }

    /// Read a `T` from `stored_path`.
    pub fn read<T: Any>(&self, stored_path: &Path) -> Result<T> {
        let type_name = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .reader_names
                .get(&TypeId::of::<T>())
                .copied()
                .ok_or_else(|| {
                    LedgerError::TypeNotSupported(std::any::type_name::<T>().to_string())
                })?
        };
        let value = self.read_named(stored_path, type_name)?;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| LedgerError::TypeNotSupported(type_name.to_string()).into())
    }

    /// Read a value by its registered type name, as recorded in an artifact reference.
    pub fn read_named(
        &self,
        stored_path: &Path,
        type_name: &str,
    ) -> Result<Box<dyn Any + Send + Sync>> {
        let read = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries
                .readers
                .get(type_name)
                .cloned()
                .ok_or_else(|| LedgerError::TypeNotSupported(type_name.to_string()))?
        };
        read(stored_path)
    }
}

/// Append `.ext` to `path` unless it already ends with it.
pub(crate) fn with_suffix(path: &Path, ext: &str) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(ext) {
        return path.to_path_buf();
    }
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}
