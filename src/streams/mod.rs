pub mod live;
pub mod replay;

pub use live::{run_feed, FeedConfig, FeedDecoder, FeedError, FeedEvent, DEFAULT_WS_URL};
pub use replay::load_ticks;
