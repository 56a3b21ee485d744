use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};

use alloy_json_rpc::RpcError;
use alloy_primitives::U256;
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_transport::{TransportErrorKind, TransportResult};
use alloy_transport_http::Http;
use backon::{ExponentialBuilder, Retryable};
use error_stack::{Report, Result, ResultExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::Semaphore;
use tracing::warn;
use url::Url;

use super::models::{self, BlockNumberOrTag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcProviderError {
    /// The request could not be sent. Transient.
    Request,
    /// The request timed out. Transient.
    Timeout,
    /// The server returned a 5xx or 429 status. Transient.
    ServerError,
    /// The server returned a JSON-RPC error object.
    Rpc,
    DeserializeResponse,
    NotFound,
    Configuration,
}

#[derive(Debug, Clone)]
pub struct JsonRpcProviderOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Headers to send with the requests.
    pub headers: HeaderMap<HeaderValue>,
    /// Maximum number of requests per second.
    pub rate_limit: u32,
    /// Maximum number of requests in flight.
    pub concurrency: usize,
    /// How many times a transient failure is retried.
    pub max_retries: usize,
    /// First backoff delay. Doubles at each retry.
    pub retry_min_delay: Duration,
}

#[derive(Clone)]
pub struct JsonRpcProvider {
    provider: RootProvider,
    options: JsonRpcProviderOptions,
    limiter: Arc<DefaultDirectRateLimiter>,
    semaphore: Arc<Semaphore>,
}

pub trait JsonRpcProviderErrorExt {
    fn is_not_found(&self) -> bool;
    fn is_transient(&self) -> bool;
}

impl JsonRpcProvider {
    pub fn new(url: Url, options: JsonRpcProviderOptions) -> Result<Self, JsonRpcProviderError> {
        if options.concurrency == 0 {
            return Err(JsonRpcProviderError::Configuration)
                .attach_printable("concurrency must be greater than zero");
        }

        let http_client = reqwest::Client::builder()
            .default_headers(options.headers.clone())
            .build()
            .change_context(JsonRpcProviderError::Configuration)
            .attach_printable("failed to build http client")?;

        let transport = Http::with_client(http_client, url);
        let provider = RootProvider::new(RpcClient::new(transport, false));

        let limiter = new_limiter(options.rate_limit);
        let semaphore = Semaphore::new(options.concurrency);

        Ok(Self {
            provider,
            options,
            limiter: Arc::new(limiter),
            semaphore: Arc::new(semaphore),
        })
    }

    pub async fn block_number(&self) -> Result<u64, JsonRpcProviderError> {
        self.send_request("eth_blockNumber", || async {
            self.provider.get_block_number().await
        })
        .await
    }

    pub async fn get_block_by_number(
        &self,
        number: u64,
    ) -> Result<models::RpcBlock, JsonRpcProviderError> {
        self.send_request("eth_getBlockByNumber", || async {
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await
        })
        .await?
        .ok_or(JsonRpcProviderError::NotFound)
        .attach_printable_lazy(|| format!("block number: {number}"))
    }

    pub async fn get_block_by_hash(
        &self,
        hash: &str,
    ) -> Result<models::RpcBlock, JsonRpcProviderError> {
        self.send_request("eth_getBlockByHash", || async {
            self.provider
                .client()
                .request::<_, Option<models::RpcBlock>>(
                    "eth_getBlockByHash",
                    (hash.to_string(), false),
                )
                .await
        })
        .await?
        .ok_or(JsonRpcProviderError::NotFound)
        .attach_printable_lazy(|| format!("block hash: {hash}"))
    }

    pub async fn get_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<models::RpcTransaction, JsonRpcProviderError> {
        self.send_request("eth_getTransactionByHash", || async {
            self.provider
                .client()
                .request::<_, Option<models::RpcTransaction>>(
                    "eth_getTransactionByHash",
                    (hash.to_string(),),
                )
                .await
        })
        .await?
        .ok_or(JsonRpcProviderError::NotFound)
        .attach_printable_lazy(|| format!("transaction hash: {hash}"))
    }

    pub async fn get_balance(&self, address: &str) -> Result<U256, JsonRpcProviderError> {
        self.send_request("eth_getBalance", || async {
            self.provider
                .client()
                .request::<_, U256>(
                    "eth_getBalance",
                    (address.to_string(), BlockNumberOrTag::Latest),
                )
                .await
        })
        .await
        .attach_printable_lazy(|| format!("address: {address}"))
    }

    /// Send a request, retrying transient failures with exponential backoff.
    ///
    /// The request holds a concurrency permit for its whole lifetime, retries included.
    async fn send_request<T, F, Fut>(
        &self,
        method: &'static str,
        request: F,
    ) -> Result<T, JsonRpcProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .change_context(JsonRpcProviderError::Request)
            .attach_printable("provider semaphore closed")?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.options.retry_min_delay)
            .with_max_times(self.options.max_retries);

        let request = &request;
        (move || async move { self.send_request_once(method, request).await })
            .retry(backoff)
            .when(|err: &Report<JsonRpcProviderError>| err.is_transient())
            .notify(|err: &Report<JsonRpcProviderError>, delay: Duration| {
                warn!(
                    method,
                    error = %err.current_context(),
                    delay = ?delay,
                    "retrying rpc request"
                );
            })
            .await
    }

    async fn send_request_once<T, F, Fut>(
        &self,
        method: &'static str,
        request: &F,
    ) -> Result<T, JsonRpcProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        self.limiter.until_ready().await;

        let Ok(response) = tokio::time::timeout(self.options.timeout, request()).await else {
            return Err(JsonRpcProviderError::Timeout)
                .attach_printable_lazy(|| format!("method: {method}"));
        };

        response
            .map_err(error_to_report)
            .attach_printable_lazy(|| format!("method: {method}"))
    }
}

/// Classify a transport error so that only transient failures are retried.
fn error_to_report(err: RpcError<TransportErrorKind>) -> Report<JsonRpcProviderError> {
    match err {
        RpcError::ErrorResp(payload) => Report::new(JsonRpcProviderError::Rpc)
            .attach_printable(format!("code: {}", payload.code))
            .attach_printable(format!("message: {}", payload.message)),
        RpcError::NullResp => Report::new(JsonRpcProviderError::NotFound),
        RpcError::DeserError { err, text } => Report::new(err)
            .change_context(JsonRpcProviderError::DeserializeResponse)
            .attach_printable(format!("response: {text}")),
        RpcError::Transport(TransportErrorKind::HttpError(http))
            if http.status >= 500 || http.status == 429 =>
        {
            Report::new(JsonRpcProviderError::ServerError)
                .attach_printable(format!("status: {}", http.status))
        }
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            Report::new(JsonRpcProviderError::Request)
                .attach_printable(format!("status: {}", http.status))
        }
        err => Report::new(JsonRpcProviderError::Request).attach_printable(format!("{err}")),
    }
}

fn new_limiter(rate_limit: u32) -> DefaultDirectRateLimiter {
    let quota = NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_second(quota).allow_burst(quota);
    RateLimiter::direct(quota)
}

impl Default for JsonRpcProviderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            headers: HeaderMap::default(),
            rate_limit: 1_000,
            concurrency: 100,
            max_retries: 5,
            retry_min_delay: Duration::from_millis(500),
        }
    }
}

impl JsonRpcProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JsonRpcProviderError::Request
                | JsonRpcProviderError::Timeout
                | JsonRpcProviderError::ServerError
        )
    }
}

impl error_stack::Context for JsonRpcProviderError {}

impl std::fmt::Display for JsonRpcProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcProviderError::Request => write!(f, "failed to send request"),
            JsonRpcProviderError::Timeout => write!(f, "request timed out"),
            JsonRpcProviderError::ServerError => write!(f, "server error"),
            JsonRpcProviderError::Rpc => write!(f, "json-rpc error response"),
            JsonRpcProviderError::DeserializeResponse => write!(f, "failed to deserialize response"),
            JsonRpcProviderError::NotFound => write!(f, "not found"),
            JsonRpcProviderError::Configuration => write!(f, "configuration error"),
        }
    }
}

impl JsonRpcProviderErrorExt for Report<JsonRpcProviderError> {
    fn is_not_found(&self) -> bool {
        matches!(self.current_context(), JsonRpcProviderError::NotFound)
    }

    fn is_transient(&self) -> bool {
        self.current_context().is_transient()
    }
}
