//! Buffered GET and streaming-to-disk downloads.

mod fetcher;

pub use fetcher::{FetchError, FetchedBody, HttpFetcher};
