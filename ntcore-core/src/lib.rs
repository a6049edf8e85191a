//! # NTCore Core
//!
//! Experiment capture for the NTCore platform. Training entry points of
//! supported frameworks are routed through a wrapper registry; when a call is
//! given an [`Experiment`], its hyperparameters, training metrics and the
//! trained model are recorded and uploaded to the workspace on
//! [`Experiment::save`].
//!
//! ```no_run
//! use ntcore_core::{Client, SdkConfig};
//!
//! # fn main() -> ntcore_core::Result<()> {
//! let client = Client::new(&SdkConfig::default())?;
//! let mut run = client.start_run("WS1");
//! run.save_model(std::path::PathBuf::from("model.pkl"))?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod args;
pub mod client;
pub mod config;
pub mod error;
pub mod experiment;
pub mod framework;
pub mod integrations;
pub mod interception;
pub mod serializer;

pub use api::{ApiClient, ApiResponse, HttpApiClient, Payload};
pub use args::{ArgValue, CallArgs, Matrix, Metrics, Params, Signature};
pub use client::Client;
pub use config::{ConfigOverrides, Credentials, MonitorConfig, SdkConfig, load_config};
pub use error::{ApiError, ConfigError, ModelError, NtcoreError, Result, SerializeError};
pub use experiment::{Experiment, RunStatus};
pub use framework::Framework;
pub use interception::{Patch, PatchRegistry, PatchTarget, registry};
pub use serializer::{
    EstimatorDump, ModelSerializer, SavedModelExport, SerializableModel, TorchScript,
    select_serializer,
};

/// Runtime identifier reported with every uploaded run.
pub fn runtime_version() -> String {
    format!("rust-{}", env!("CARGO_PKG_RUST_VERSION"))
}
