//! **ccsync** - two-way sync between a local content tree and a storefront's
//! design repository (widgets, elements, stacks, themes, text snippets).
//!
//! `grab` pulls everything editable into a directory tree with per-file etags
//! in `.ccc/`; `put` sends local edits back under optimistic locking, and
//! `transfer-all` replays a tree onto another node of the same build.

/// Command-line interface with clap integration
pub mod cli;

/// Command runners behind each subcommand
pub mod commands;
pub use commands::{etag_run, grab_run, put_all_run, put_run, transfer_run};

/// Shell completion generation
pub mod completion;

/// Sync engine - classification, bookkeeping, identity and both directions
pub mod core {
    /// Asset kinds and their put order
    pub mod asset;
    pub use asset::AssetType;

    /// Path to asset kind, without touching the disk
    pub mod classify;
    pub use classify::classify;

    /// Run errors, exit codes and per-item outcomes
    pub mod error;
    pub use error::{PutOutcome, SyncError};

    /// Etag files under the tracking directory
    pub mod etag;

    /// Download orchestrator
    pub mod grab;

    /// Local path to remote id resolution
    pub mod identity;

    /// Directory names, file names and server constants
    pub mod layout;

    /// Wire types returned by the server
    pub mod model;

    /// Upload orchestrator
    pub mod put;

    /// Per-invocation settings
    pub mod run;
    pub use run::RunConfig;

    /// Sidecar metadata records
    pub mod sidecar;

    /// Destination-side entity cache for one run
    pub mod snapshot;

    /// Transport trait and endpoint names
    pub mod transport;
    pub use transport::{ApiCall, ApiResponse, Endpoint, Transport};
}

/// Infrastructure - configuration, HTTP, file I/O and logging
pub mod infra {
    /// Settings file, environment and `ccs init`
    pub mod config;
    pub use config::{Settings, load_settings};

    /// reqwest-backed transport
    pub mod http;

    /// Content root and atomic writes
    pub mod io;
    pub use io::ContentRoot;

    /// tracing subscriber setup
    pub mod logging;

    /// Directory walking with the ignore crate
    pub mod walk;
    pub use walk::ContentWalker;
}

pub use cli::{AppContext, Cli, Commands};
