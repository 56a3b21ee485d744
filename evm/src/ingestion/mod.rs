mod cache;
mod coordinator;
mod reader;
mod stream;

pub use self::cache::{DedupCache, DedupCacheOptions};
pub use self::coordinator::{
    IngestionCoordinator, IngestionError, IngestionOptions, ProcessSummary, StreamLoopStats,
};
pub use self::reader::{ChainReader, RpcChainReader};
pub use self::stream::{
    decode_frame, ChainStream, ChainStreamOptions, NeverReconnect, ReconnectPolicy, StreamError,
};
