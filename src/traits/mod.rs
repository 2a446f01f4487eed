pub mod fetcher;
pub mod peripheral;

#[cfg(feature = "http")]
pub mod http;

pub use fetcher::{FetchError, FileFetcher, ResourceFetcher};
pub use peripheral::{Central, LinkError, Notifications, PeripheralConnection, WriteKind};

#[cfg(feature = "http")]
pub use http::HttpFetcher;

#[cfg(test)]
pub use fetcher::MockResourceFetcher;
