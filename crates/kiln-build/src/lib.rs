//! Kiln build-and-stage pipeline
//!
//! Compiles a set of workspace units with an external toolchain and publishes
//! the resulting artifacts into a directory read by a host runtime:
//! - Batched toolchain invocation with captured diagnostics
//! - Existence and size checks on every expected artifact
//! - All-or-nothing, atomic publishing (temp file + rename)
//! - Build targets and profiles following the toolchain's output layout

pub mod error;
pub mod pipeline;
pub mod profile;
pub mod stager;
pub mod targets;
pub mod toolchain;

// Re-export main types
pub use error::{BuildError, FailureStage, KilnResult};
pub use pipeline::{
    Pipeline, PipelineConfig, PipelineReport, PipelineStats, DEFAULT_PUBLISH_DIR, TARGET_DIR_ENV,
};
pub use profile::Profile;
pub use stager::{stage, ArtifactStager, LocatedArtifact};
pub use targets::{
    validate_units, BuildResult, BuildTarget, BuildUnit, StagedArtifact, UnitStatus,
    DEFAULT_TRIPLE,
};
pub use toolchain::{CargoToolchain, Toolchain, DEFAULT_PROGRAM};
