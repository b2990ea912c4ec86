//! Asynchronous image loading engine.
//!
//! Given a source URI and a display target, the engine fetches the bytes,
//! decodes them no larger than the target needs and hands the result back on
//! a single delivery thread, caching on the way in memory and on disk.
//!
//! # Features
//!
//! - **Coalescing**: concurrent requests for the same [`RequestKey`] share one
//!   fetch and one decode; every waiter receives the same result
//! - **Two cache tiers**: byte-bounded LRU of decoded images, persistent
//!   disk cache of remote bytes
//! - **Size-aware decoding**: power-of-two subsampling driven by the target's
//!   geometry
//! - **Stale-delivery guard**: a target rebound to a new request never shows
//!   the old one, without any cancel signal reaching the workers
//! - **Serialized delivery**: all target and listener callbacks run in
//!   posting order on one thread
//!
//! # Quick Start
//!
//! ```no_run
//! use quiver_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let loaded = engine
//!     .load("https://example.com/cat.jpg")
//!     .size(400, 300)
//!     .fire()
//!     .wait();
//! match loaded {
//!     Ok(loaded) => println!("{} from {}", loaded.image.size(), loaded.from),
//!     Err(e) => eprintln!("load failed: {e}"),
//! }
//! # Ok::<(), quiver_engine::EngineError>(())
//! ```
//!
//! # Architecture
//!
//! - **Callers**: build a [`RequestKey`], bind the target, then answer from
//!   the memory cache, join a running task or start one
//! - **Workers**: fixed pool running fetch then decode, committing to the
//!   memory cache before waking waiters
//! - **Delivery thread**: checks each result against the target's current
//!   binding and applies it or drops it
//!
//! # Error Handling
//!
//! Per-request failures are [`LoadError`]s delivered to the target and the
//! listener; engine construction and configuration failures are
//! [`EngineError`]s. Errors are categorized as **retryable** (network, I/O,
//! paused) or **fatal** (malformed data, unsupported format, shutdown).

#![forbid(unsafe_code)]

pub mod binder;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod key;
pub mod options;
pub mod registry;
pub mod target;

mod dispatcher;
mod engine;
mod request;

pub use binder::{Binding, DisplayBinder};
pub use config::{ConfigBuilder, EngineConfig};
pub use engine::{DownloadResult, Engine, EngineBuilder, EngineStats, ImageResult, Loaded};
pub use errors::{EngineError, LoadError};
pub use fetch::{
    AssetFetcher, Fetched, Fetcher, FileFetcher, NoTransport, RemoteFetcher, ResourceFetcher,
    SchemeFetcher, Transport,
};
pub use key::RequestKey;
pub use options::{OptionsRegistry, RequestOptions};
pub use registry::{Submission, TaskRegistry, Waiter, WaiterId};
pub use request::{
    DisplayHandle, DisplayHelper, DownloadHandle, DownloadHelper, LoadHandle, LoadHelper,
};
pub use target::{
    DisplayListener, DisplayTarget, DownloadListener, LoadListener, LoadedFrom, TargetId,
    Transition,
};

pub use quiver_cache::{CacheStats, DiskStats};
pub use quiver_common::{ImageUri, PixelLayout, Scheme, Size, SizeHint, SizeSpec, UriError};
pub use quiver_decode::{DecodeError, DecodeOptions, DecodedImage, Decoder, FetchError};
