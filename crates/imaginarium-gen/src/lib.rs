//! Imaginarium Gen - client-side orchestration for remote image generation
//!
//! Wraps the Blockade Labs imagine/skybox API in a typed pipeline: dynamic
//! generator fields, asynchronous job submission and polling, texture and
//! depth-map materialization, and persistence of the results as loose image
//! files and managed assets.

pub mod api;
pub mod catalog;
pub mod config;
pub mod field;
pub mod job;
pub mod persist;
pub mod pipeline;
pub mod poller;
pub mod session;

pub use api::{
    BlockadeClient, CatalogService, FetchService, StatusService, SubmissionService,
};
pub use catalog::CatalogState;
pub use config::ImaginariumConfig;
pub use field::{
    build_generator_fields, build_skybox_style_fields, FieldKind, Generator, GeneratorField,
    ParamOption, ParamSpec, SkyboxStyle,
};
pub use job::{Job, JobContext, JobStatus, Stage, StateObserver, IDLE_PROGRESS};
pub use persist::{PersistenceSink, SaveConfig, SaveFormat};
pub use pipeline::AssetBundle;
pub use poller::ImagineResult;
pub use session::GenerationSession;
