//! Model serialization.
//!
//! A run carries its model as a [`SerializableModel`]: either an in-memory
//! object exposing one of the capability traits below, or a path to an
//! already saved artifact. [`select_serializer`] picks the framework-specific
//! [`ModelSerializer`] that turns it into the bytes uploaded with the run.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ModelError, SerializeError};
use crate::framework::Framework;

/// In-memory estimator that can dump itself to bytes.
pub trait EstimatorDump: Send + Sync {
    fn dump(&self) -> Result<Vec<u8>, serde_json::Error>;
}

/// Model that writes itself as a SavedModel directory.
pub trait SavedModelExport: Send + Sync {
    fn write_saved_model(&self, dir: &Path) -> Result<(), ModelError>;
}

/// Module that writes itself as a scripted module file.
pub trait TorchScript: Send + Sync {
    fn write_script(&self, path: &Path) -> Result<(), ModelError>;
}

/// The model artifact attached to a run.
#[derive(Clone)]
pub enum SerializableModel {
    Estimator(Arc<dyn EstimatorDump>),
    SavedModel(Arc<dyn SavedModelExport>),
    TorchModule(Arc<dyn TorchScript>),
    Path(PathBuf),
}

impl SerializableModel {
    pub fn estimator(estimator: impl EstimatorDump + 'static) -> Self {
        Self::Estimator(Arc::new(estimator))
    }

    pub fn saved_model(model: impl SavedModelExport + 'static) -> Self {
        Self::SavedModel(Arc::new(model))
    }

    pub fn torch_module(module: impl TorchScript + 'static) -> Self {
        Self::TorchModule(Arc::new(module))
    }

    /// The framework implied by an in-memory model. Paths imply nothing on
    /// their own.
    pub fn framework(&self) -> Framework {
        match self {
            Self::Estimator(_) => Framework::Sklearn,
            Self::SavedModel(_) => Framework::Tensorflow,
            Self::TorchModule(_) => Framework::Pytorch,
            Self::Path(_) => Framework::Unknown,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for SerializableModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Estimator(_) => f.write_str("Estimator(..)"),
            Self::SavedModel(_) => f.write_str("SavedModel(..)"),
            Self::TorchModule(_) => f.write_str("TorchModule(..)"),
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
        }
    }
}

impl From<PathBuf> for SerializableModel {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for SerializableModel {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

/// Turns one model into upload bytes.
pub trait ModelSerializer: Send {
    /// The framework reported alongside the bytes.
    fn framework(&self) -> Framework;

    fn serialize(&mut self, model: &SerializableModel) -> Result<Vec<u8>, SerializeError>;

    /// Release temporary artifacts.
    fn close(self: Box<Self>);
}

/// Pick the serializer for `model`.
///
/// In-memory models determine their own framework. For paths, a known
/// `framework_hint` wins over the file extension.
pub fn select_serializer(
    model: &SerializableModel,
    framework_hint: Framework,
) -> Result<Box<dyn ModelSerializer>, SerializeError> {
    let framework = match model {
        SerializableModel::Path(path) if framework_hint.is_known() => {
            debug!(path = %path.display(), framework = %framework_hint, "Using explicit framework");
            framework_hint
        }
        SerializableModel::Path(path) => Framework::sniff_path(path),
        in_memory => in_memory.framework(),
    };

    match framework {
        Framework::Sklearn => Ok(Box::new(SklearnSerializer)),
        Framework::Tensorflow => Ok(Box::new(TensorflowSerializer::new()?)),
        Framework::Pytorch => Ok(Box::new(TorchSerializer::new()?)),
        Framework::Unknown => Err(SerializeError::UnknownFramework),
    }
}

fn unsupported(framework: Framework, model: &SerializableModel) -> SerializeError {
    SerializeError::Export(format!(
        "{framework} serializer cannot handle {model:?}"
    ))
}

/// Pickle-equivalent dump of estimators, or a `.pkl` file.
pub struct SklearnSerializer;

impl ModelSerializer for SklearnSerializer {
    fn framework(&self) -> Framework {
        Framework::Sklearn
    }

    fn serialize(&mut self, model: &SerializableModel) -> Result<Vec<u8>, SerializeError> {
        match model {
            SerializableModel::Estimator(estimator) => Ok(estimator.dump()?),
            SerializableModel::Path(path) => {
                if path.extension().and_then(|e| e.to_str()) != Some("pkl") {
                    return Err(SerializeError::InvalidPath {
                        framework: "sklearn",
                        path: path.clone(),
                        expected: "a .pkl file",
                    });
                }
                Ok(std::fs::read(path)?)
            }
            other => Err(unsupported(self.framework(), other)),
        }
    }

    fn close(self: Box<Self>) {}
}

/// Gzipped tar of a SavedModel directory. The archive lives in a temporary
/// file until the serializer is closed.
pub struct TensorflowSerializer {
    archive: NamedTempFile,
}

impl TensorflowSerializer {
    pub fn new() -> Result<Self, SerializeError> {
        let archive = tempfile::Builder::new()
            .prefix("ntcore-model-")
            .suffix(".tar.gz")
            .tempfile()?;
        Ok(Self { archive })
    }

    /// Location of the temporary archive.
    pub fn archive_path(&self) -> &Path {
        self.archive.path()
    }

    fn compress(&self, dir: &Path) -> Result<Vec<u8>, SerializeError> {
        let file = File::create(self.archive.path())?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("model", dir)?;
        builder.into_inner()?.finish()?;
        debug!(archive = %self.archive.path().display(), "Compressed SavedModel directory");
        Ok(std::fs::read(self.archive.path())?)
    }
}

impl ModelSerializer for TensorflowSerializer {
    fn framework(&self) -> Framework {
        Framework::Tensorflow
    }

    fn serialize(&mut self, model: &SerializableModel) -> Result<Vec<u8>, SerializeError> {
        match model {
            SerializableModel::SavedModel(export) => {
                let dir = tempfile::tempdir()?;
                export
                    .write_saved_model(dir.path())
                    .map_err(|e| SerializeError::Export(e.to_string()))?;
                self.compress(dir.path())
            }
            SerializableModel::Path(path) => {
                if !path.is_dir() {
                    return Err(SerializeError::InvalidPath {
                        framework: "tensorflow",
                        path: path.clone(),
                        expected: "a SavedModel directory",
                    });
                }
                self.compress(path)
            }
            other => Err(unsupported(self.framework(), other)),
        }
    }

    fn close(self: Box<Self>) {
        debug!(archive = %self.archive.path().display(), "Removing temporary archive");
    }
}

/// Scripted module bytes, or a `.pt`/`.pth` file.
pub struct TorchSerializer {
    script: NamedTempFile,
}

impl TorchSerializer {
    pub fn new() -> Result<Self, SerializeError> {
        let script = tempfile::Builder::new()
            .prefix("ntcore-model-")
            .suffix(".pt")
            .tempfile()?;
        Ok(Self { script })
    }
}

impl ModelSerializer for TorchSerializer {
    fn framework(&self) -> Framework {
        Framework::Pytorch
    }

    fn serialize(&mut self, model: &SerializableModel) -> Result<Vec<u8>, SerializeError> {
        match model {
            SerializableModel::TorchModule(module) => {
                module
                    .write_script(self.script.path())
                    .map_err(|e| SerializeError::Export(e.to_string()))?;
                Ok(std::fs::read(self.script.path())?)
            }
            SerializableModel::Path(path) => {
                match path.extension().and_then(|e| e.to_str()) {
                    Some("pt" | "pth") => Ok(std::fs::read(path)?),
                    _ => Err(SerializeError::InvalidPath {
                        framework: "pytorch",
                        path: path.clone(),
                        expected: "a .pt or .pth file",
                    }),
                }
            }
            other => Err(unsupported(self.framework(), other)),
        }
    }

    fn close(self: Box<Self>) {}
}
