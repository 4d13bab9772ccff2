pub mod api;
pub mod auth;
pub mod fetcher;
pub mod rate_limiter;
pub mod retry;
pub mod tree;
pub mod wire;


pub use api::{RedditApiClient, RedditTransport};
pub use auth::AppAuthenticator;
pub use fetcher::{FetchedThread, FetcherConfig, ListingRequest, ListingResult, RawThread, ThreadFetcher};
pub use rate_limiter::{GovernorPermit, GovernorStatus, RateGovernor, RateLimitConfig};
pub use retry::{RetryConfig, RetryExecutor};
pub use tree::BuiltTree;
pub use wire::{MorePlaceholder, ParentRef, RawComment, RawNode};
