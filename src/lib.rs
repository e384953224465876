pub mod config;
pub mod datum;
pub mod disk_queue;
pub mod domains;
pub mod fetcher;
pub mod grouping;
pub mod host_queue;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod queue_manager;
pub mod robots;
pub mod scoring;
pub mod simulation;
pub mod sink;

// Re-export the main types for library usage
pub use config::FetcherPolicy;
pub use datum::{
    FetchStatus, FetchedDatum, GroupedUrlDatum, Metadata, ScoredUrlDatum, StatusDatum, UrlDatum,
    UrlStatus,
};
pub use disk_queue::DiskSpillQueue;
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use grouping::{GroupingKey, GroupingKeyGenerator};
pub use host_queue::HostQueue;
pub use manager::FetcherManager;
pub use pipeline::FetchPipe;
pub use queue_manager::QueueManager;
pub use robots::RobotsRules;
pub use scoring::{LastFetchScoreGenerator, ScoreGenerator, SKIP_SCORE};
pub use sink::OutputSink;
