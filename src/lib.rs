//! Time-window dumps of a Prometheus-style TSDB data directory.
//!
//! The extraction side ([`catalog`], [`select`], [`archive`]) runs next to
//! the data and streams the matching blocks as a gzipped tar. The operator
//! side ([`distribute`], [`remote`], [`orchestrator`]) ships the extraction
//! program into a container and drives it there.

#[cfg(feature = "extract")]
pub mod archive;
pub mod catalog;
pub mod config;
pub mod error;
pub mod layout;
pub mod mmap;
pub mod select;
pub mod time;

#[cfg(feature = "remote")]
pub mod distribute;
#[cfg(feature = "remote")]
pub mod orchestrator;
#[cfg(feature = "remote")]
pub mod remote;

#[cfg(feature = "extract")]
pub use archive::{ArchiveOutcome, ArchiveStats, Archiver, ArchiverConfig, SkippedEntry, NO_DATA_MARKER};
pub use catalog::{Block, BlockCatalog, Catalog, CatalogSummary, HeadSummary};
pub use config::{ArtifactSource, DumpConfig, TargetConfig};
pub use error::{Error, Result};
pub use select::{select, Selection};
pub use time::{Clock, FixedClock, SystemClock, TimeRange, Timestamp};

#[cfg(feature = "remote")]
pub use distribute::{ArtifactDistributor, CachedArtifact, DistributorConfig, FetchedArtifact};
#[cfg(feature = "remote")]
pub use orchestrator::{OperationContext, Orchestrator};
#[cfg(feature = "remote")]
pub use remote::{
    AccessReview, ChannelState, ExecIo, KubectlExecutor, RemoteChannel, RemoteCommand, RemoteExecutor,
    RemoteTarget,
};
