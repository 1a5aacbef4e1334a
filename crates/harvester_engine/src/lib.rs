//! Harvester engine: the orchestrator, its session drivers, and the
//! capability adapters they talk to.
mod capability;
mod credentials;
mod error;
mod http;
mod orchestrator;
mod session;
mod sink;

pub use capability::{
    Capabilities, CapabilityError, CapabilityErrorKind, CollectCommand, CollectMode, CollectReply,
    CollectorBridge, ContextManager, CredentialProvider, Product, ResultSink, WorkSource,
};
pub use credentials::{EnvCredentials, StaticCredentials, DEFAULT_TOKEN_ENV};
pub use error::{SessionFailure, StartError};
pub use http::{ApiClient, HttpBrowser, HttpResultSink, HttpSettings, HttpWorkSource};
pub use orchestrator::Orchestrator;
pub use sink::{ensure_output_dir, result_filename, AtomicFileWriter, FileResultSink, PersistError};
