//! # Model Store
//!
//! A namespaced, insertion-ordered document of text fields plus one opaque
//! parameter blob per namespace. Training writes it incrementally, stage by
//! stage, and flushes it once; inference loads it once, read-only.
//!
//! On disk the store is a single safetensors file. The ordered fields live
//! as a JSON document in the header metadata, so `head -c` on the artifact
//! shows every hyperparameter. Each blob is a one-dimensional `U8` tensor
//! named after its namespace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TwpipeError};

const FORMAT_KEY: &str = "twpipe.format";
const FORMAT_VERSION: &str = "1";
const STAGES_KEY: &str = "twpipe.stages";

/// Fields and parameters recorded under one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Namespace {
    stage: String,
    fields: Vec<(String, String)>,
    #[serde(skip)]
    parameters: Option<Vec<u8>>,
}

/// The persisted model artifact of one pipeline.
#[derive(Debug, Clone, Default)]
pub struct ModelStore {
    path: Option<PathBuf>,
    read_only: bool,
    namespaces: Vec<Namespace>,
}

impl ModelStore {
    /// An empty, writable store that is never flushed to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// An empty, writable store that [`ModelStore::flush`] writes to `path`.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Loads every namespace of the artifact at `path`. The result is
    /// read-only.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buffer = std::fs::read(path)?;
        let mut store = Self::from_bytes(&buffer)?;
        store.path = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            stages = store.namespaces.len(),
            "[store] loaded model artifact"
        );
        Ok(store)
    }

    /// Decodes an artifact held in memory. The result is read-only.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        let (_, metadata) = SafeTensors::read_metadata(buffer)
            .map_err(|e| TwpipeError::corrupt("artifact", format!("unreadable header: {e}")))?;
        let header = metadata
            .metadata()
            .as_ref()
            .ok_or_else(|| TwpipeError::corrupt("artifact", "header carries no metadata"))?;

        match header.get(FORMAT_KEY).map(String::as_str) {
            Some(FORMAT_VERSION) => {}
            Some(other) => {
                return Err(TwpipeError::corrupt(
                    "artifact",
                    format!("unsupported format version {other:?}"),
                ));
            }
            None => return Err(TwpipeError::corrupt("artifact", "missing format version")),
        }

        let document = header
            .get(STAGES_KEY)
            .ok_or_else(|| TwpipeError::corrupt("artifact", "missing stage document"))?;
        let mut namespaces: Vec<Namespace> = serde_json::from_str(document)
            .map_err(|e| {
                TwpipeError::corrupt("artifact", format!("malformed stage document: {e}"))
            })?;

        let tensors = SafeTensors::deserialize(buffer)
            .map_err(|e| TwpipeError::corrupt("artifact", format!("unreadable tensors: {e}")))?;
        for (name, view) in tensors.tensors() {
            let namespace = namespaces
                .iter_mut()
                .find(|ns| ns.stage == name)
                .ok_or_else(|| {
                    TwpipeError::corrupt(&name, "parameter blob without a recorded namespace")
                })?;
            if view.dtype() != Dtype::U8 {
                return Err(TwpipeError::corrupt(
                    &name,
                    format!("parameter blob has dtype {:?}, expected U8", view.dtype()),
                ));
            }
            namespace.parameters = Some(view.data().to_vec());
        }

        Ok(Self {
            path: None,
            read_only: true,
            namespaces,
        })
    }

    /// Encodes the store in its durable form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = HashMap::new();
        header.insert(FORMAT_KEY.to_string(), FORMAT_VERSION.to_string());
        header.insert(
            STAGES_KEY.to_string(),
            serde_json::to_string(&self.namespaces)?,
        );

        let mut views = Vec::new();
        for ns in &self.namespaces {
            if let Some(bytes) = &ns.parameters {
                let view = TensorView::new(Dtype::U8, vec![bytes.len()], bytes)?;
                views.push((ns.stage.clone(), view));
            }
        }

        Ok(safetensors::serialize(views, &Some(header))?)
    }

    /// Writes the store to the path given to [`ModelStore::create`].
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            debug!("[store] in-memory store, nothing to flush");
            return Ok(());
        };
        if self.read_only {
            return Err(TwpipeError::ReadOnlyStore {
                stage: "*".into(),
                field: "*".into(),
            });
        }
        std::fs::write(path, self.to_bytes()?)?;
        info!(
            path = %path.display(),
            stages = self.namespaces.len(),
            "[store] model artifact written"
        );
        Ok(())
    }

    /// Whether the store was produced by [`ModelStore::load`].
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Records `field = value` under `namespace`. Re-recording a field
    /// replaces its value and keeps its position.
    pub fn put(&mut self, namespace: &str, field: &str, value: impl Into<String>) -> Result<()> {
        self.check_writable(namespace, field)?;
        let value = value.into();
        let ns = self.namespace_mut(namespace);
        if let Some(slot) = ns.fields.iter_mut().find(|(key, _)| key == field) {
            warn!(namespace, field, old = %slot.1, new = %value, "[store] field overwritten");
            slot.1 = value;
        } else {
            debug!(namespace, field, value = %value, "[store] put");
            ns.fields.push((field.to_string(), value));
        }
        Ok(())
    }

    /// Value of `field` under `namespace`, if recorded.
    pub fn get(&self, namespace: &str, field: &str) -> Option<&str> {
        self.namespace(namespace)?
            .fields
            .iter()
            .find(|(key, _)| key == field)
            .map(|(_, value)| value.as_str())
    }

    /// Whether anything was recorded under `namespace`.
    pub fn contains(&self, namespace: &str) -> bool {
        self.namespace(namespace).is_some()
    }

    /// Recorded namespaces, in first-write order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.iter().map(|ns| ns.stage.as_str())
    }

    /// Fields of `namespace` in the order they were written.
    pub fn fields(&self, namespace: &str) -> impl Iterator<Item = (&str, &str)> {
        self.namespace(namespace)
            .map(|ns| ns.fields.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// A positional reader over the fields of `namespace`.
    pub fn reader<'a>(&'a self, namespace: &'a str) -> FieldReader<'a> {
        FieldReader {
            namespace,
            fields: self
                .namespace(namespace)
                .map(|ns| ns.fields.as_slice())
                .unwrap_or_default(),
            position: 0,
        }
    }

    /// Stores the raw trained parameters of `namespace`.
    pub fn put_parameters(&mut self, namespace: &str, parameters: Vec<u8>) -> Result<()> {
        self.check_writable(namespace, "parameters")?;
        debug!(namespace, bytes = parameters.len(), "[store] put parameters");
        self.namespace_mut(namespace).parameters = Some(parameters);
        Ok(())
    }

    /// Raw trained parameters of `namespace`, if recorded.
    pub fn parameters(&self, namespace: &str) -> Option<&[u8]> {
        self.namespace(namespace)?.parameters.as_deref()
    }

    fn check_writable(&self, namespace: &str, field: &str) -> Result<()> {
        if self.read_only {
            return Err(TwpipeError::ReadOnlyStore {
                stage: namespace.to_string(),
                field: field.to_string(),
            });
        }
        Ok(())
    }

    fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.stage == name)
    }

    fn namespace_mut(&mut self, name: &str) -> &mut Namespace {
        let index = match self.namespaces.iter().position(|ns| ns.stage == name) {
            Some(index) => index,
            None => {
                self.namespaces.push(Namespace {
                    stage: name.to_string(),
                    ..Namespace::default()
                });
                self.namespaces.len() - 1
            }
        };
        &mut self.namespaces[index]
    }
}

/// Reads a namespace's fields strictly in recorded order.
#[derive(Debug)]
pub struct FieldReader<'a> {
    namespace: &'a str,
    fields: &'a [(String, String)],
    position: usize,
}

impl<'a> FieldReader<'a> {
    /// Consumes the next field, which must be `field`.
    pub fn expect(&mut self, field: &str) -> Result<&'a str> {
        match self.fields.get(self.position) {
            Some((key, value)) if key == field => {
                self.position += 1;
                Ok(value.as_str())
            }
            Some((key, _)) => Err(TwpipeError::corrupt(
                self.namespace,
                format!("expected field {field:?} at position {}, found {key:?}", self.position),
            )),
            None => Err(TwpipeError::corrupt(
                self.namespace,
                format!("missing field {field:?}"),
            )),
        }
    }

    /// Fails if any field was left unread.
    pub fn finish(self) -> Result<()> {
        match self.fields.get(self.position) {
            None => Ok(()),
            Some((key, _)) => Err(TwpipeError::corrupt(
                self.namespace,
                format!("unexpected field {key:?} at position {}", self.position),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> ModelStore {
        let mut store = ModelStore::in_memory();
        store.put("tokenizer", "name", "linear-gru").unwrap();
        store.put("postagger", "name", "char-gru").unwrap();
        store.put("postagger", "n-chars", "50").unwrap();
        store.put("postagger", "char-dim", "16").unwrap();
        store.put("tokenizer", "n-chars", "50").unwrap();
        store.put_parameters("postagger", vec![1, 2, 3, 4]).unwrap();
        store
    }

    #[test]
    fn namespaces_do_not_collide() {
        let store = sample_store();
        assert_eq!(store.get("tokenizer", "name"), Some("linear-gru"));
        assert_eq!(store.get("postagger", "name"), Some("char-gru"));
        assert_eq!(store.get("parser", "name"), None);
        assert_eq!(store.get("postagger", "tag-dim"), None);
        assert!(store.contains("tokenizer"));
        assert!(!store.contains("parser"));
    }

    #[test]
    fn fields_keep_insertion_order() {
        let store = sample_store();
        let keys: Vec<_> = store.fields("postagger").map(|(k, _)| k).collect();
        assert_eq!(keys, ["name", "n-chars", "char-dim"]);
        assert_eq!(store.fields("parser").count(), 0);
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut store = sample_store();
        store.put("postagger", "n-chars", "51").unwrap();
        let fields: Vec<_> = store.fields("postagger").collect();
        assert_eq!(fields[1], ("n-chars", "51"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn bytes_round_trip_preserves_everything() {
        let store = sample_store();
        let loaded = ModelStore::from_bytes(&store.to_bytes().unwrap()).unwrap();

        let ns: Vec<_> = loaded.namespaces().collect();
        assert_eq!(ns, ["tokenizer", "postagger"]);
        assert_eq!(
            loaded.fields("postagger").collect::<Vec<_>>(),
            store.fields("postagger").collect::<Vec<_>>()
        );
        assert_eq!(loaded.parameters("postagger"), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(loaded.parameters("tokenizer"), None);
    }

    #[test]
    fn loaded_store_is_read_only() {
        let store = sample_store();
        let mut loaded = ModelStore::from_bytes(&store.to_bytes().unwrap()).unwrap();
        assert!(loaded.is_read_only());

        let err = loaded.put("parser", "name", "arcstd-gru").unwrap_err();
        assert!(matches!(err, TwpipeError::ReadOnlyStore { .. }));
        let err = loaded.put_parameters("parser", vec![0]).unwrap_err();
        assert!(matches!(err, TwpipeError::ReadOnlyStore { .. }));
    }

    #[test]
    fn flush_and_load_from_disk() {
        let path = std::env::temp_dir().join(format!("twpipe-store-{}.twpipe", std::process::id()));
        let mut store = ModelStore::create(&path);
        store.put("postagger", "name", "char-lstm").unwrap();
        store.put_parameters("postagger", vec![9; 32]).unwrap();
        store.flush().unwrap();

        let loaded = ModelStore::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.get("postagger", "name"), Some("char-lstm"));
        assert_eq!(loaded.parameters("postagger").map(<[u8]>::len), Some(32));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = ModelStore::from_bytes(b"definitely not a model").unwrap_err();
        assert!(matches!(err, TwpipeError::CorruptModelArtifact { .. }));

        let bytes = sample_store().to_bytes().unwrap();
        let err = ModelStore::from_bytes(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, TwpipeError::CorruptModelArtifact { .. }));
    }

    #[test]
    fn reader_is_positional() {
        let store = sample_store();
        let mut reader = store.reader("postagger");
        assert_eq!(reader.expect("name").unwrap(), "char-gru");
        assert!(matches!(
            reader.expect("char-dim"),
            Err(TwpipeError::CorruptModelArtifact { .. })
        ));
        assert_eq!(reader.expect("n-chars").unwrap(), "50");
        assert_eq!(reader.expect("char-dim").unwrap(), "16");
        reader.finish().unwrap();
    }

    #[test]
    fn reader_reports_leftovers_and_gaps() {
        let store = sample_store();
        let mut reader = store.reader("postagger");
        reader.expect("name").unwrap();
        assert!(matches!(
            reader.finish(),
            Err(TwpipeError::CorruptModelArtifact { .. })
        ));

        let mut reader = store.reader("parser");
        let err = reader.expect("name").unwrap_err();
        assert!(err.to_string().contains("missing field"));
    }
}
