use std::time::Duration;

use clap::Args;
use error_stack::{Result, ResultExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{
    error::BlockDbError,
    provider::{JsonRpcProvider, JsonRpcProviderOptions},
};

#[derive(Args, Debug, Clone)]
pub struct RpcArgs {
    /// EVM JSON-RPC URL.
    #[arg(
        long = "rpc.url",
        env = "BLOCKDB_RPC_URL",
        default_value = "https://api.avax.network/ext/bc/C/rpc"
    )]
    pub rpc_url: String,

    /// Request timeout.
    #[arg(
        long = "rpc.timeout-sec",
        env = "BLOCKDB_RPC_TIMEOUT_SEC",
        default_value = "30"
    )]
    pub rpc_timeout_sec: u64,

    /// RPC rate limit, in requests per second.
    #[arg(
        long = "rpc.rate-limit",
        env = "BLOCKDB_RPC_RATE_LIMIT",
        default_value = "1000"
    )]
    pub rpc_rate_limit: u32,

    /// How many concurrent requests to send.
    #[arg(
        long = "rpc.concurrency",
        env = "BLOCKDB_RPC_CONCURRENCY",
        default_value = "100"
    )]
    pub rpc_concurrency: usize,

    /// How many times a failed request is retried.
    #[arg(
        long = "rpc.max-retries",
        env = "BLOCKDB_RPC_MAX_RETRIES",
        default_value = "5"
    )]
    pub rpc_max_retries: usize,

    /// Headers to send with the requests, as `name:value`.
    #[arg(long = "rpc.headers", env = "BLOCKDB_RPC_HEADERS")]
    pub rpc_headers: Vec<String>,
}

impl RpcArgs {
    pub fn to_json_rpc_provider(&self) -> Result<JsonRpcProvider, BlockDbError> {
        let url = self
            .rpc_url
            .parse::<Url>()
            .change_context(BlockDbError::Configuration)
            .attach_printable("failed to parse RPC URL")
            .attach_printable_lazy(|| format!("url: {}", self.rpc_url))?;

        let options = self.to_provider_options()?;

        JsonRpcProvider::new(url, options).change_context(BlockDbError::Configuration)
    }

    pub fn to_provider_options(&self) -> Result<JsonRpcProviderOptions, BlockDbError> {
        let headers = {
            let mut headers = HeaderMap::default();

            for kv in self.rpc_headers.iter() {
                let (key, value) = kv
                    .split_once(':')
                    .ok_or(BlockDbError::Configuration)
                    .attach_printable("invalid header")
                    .attach_printable_lazy(|| format!("header: {}", kv))?;

                headers.insert(
                    key.trim()
                        .parse::<HeaderName>()
                        .change_context(BlockDbError::Configuration)
                        .attach_printable("invalid header name")
                        .attach_printable_lazy(|| format!("header name: {}", key))?,
                    value
                        .trim()
                        .parse::<HeaderValue>()
                        .change_context(BlockDbError::Configuration)
                        .attach_printable("invalid header value")
                        .attach_printable_lazy(|| format!("header value: {}", value))?,
                );
            }

            headers
        };

        Ok(JsonRpcProviderOptions {
            timeout: Duration::from_secs(self.rpc_timeout_sec),
            headers,
            rate_limit: self.rpc_rate_limit,
            concurrency: self.rpc_concurrency,
            max_retries: self.rpc_max_retries,
            ..JsonRpcProviderOptions::default()
        })
    }
}
