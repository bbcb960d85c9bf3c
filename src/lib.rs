pub mod crawler;
pub mod extract;
pub mod logger;
pub mod networking;
pub mod reactor;

#[cfg(test)]
pub(crate) mod test_support;

pub use crawler::{CrawlConfig, CrawlError, CrawlStats, CrawledPage, CrawlFailure, Crawler};
pub use reactor::{Dispatch, Reactor, StopHandle};
