use std::ops::Deref;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use gasprobe_common::fallback::{Error as FallbackError, FailurePredicate, WithFallback};
use gasprobe_common::{log_if_error, measure_duration, metric};
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;

use crate::quantity::quantity_from_value;
use crate::types::{Block, BlockTag, FeeData, TransactionReceipt, TransactionRequest};
use crate::{Configuration, Error, RpcAdapter};

/// Tip used when the node does not implement `eth_maxPriorityFeePerGas`.
const DEFAULT_PRIORITY_FEE: u64 = 1_000_000_000;

#[derive(Clone)]
struct EthereumRpcClient(HttpClient);

impl EthereumRpcClient {
    fn new(endpoint: &str, timeout: u64) -> Result<Self, Error> {
        HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(timeout))
            .build(endpoint)
            .map(Self)
            .map_err(|e| Error::transport(format!("invalid endpoint {}: {}", endpoint, e)))
    }
}

impl Deref for EthereumRpcClient {
    type Target = HttpClient;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FailurePredicate<ClientError> for EthereumRpcClient {
    fn is_err(&self, err: &ClientError) -> bool {
        !matches!(err, ClientError::Call(_))
    }
}

impl From<FallbackError<ClientError>> for Error {
    fn from(value: FallbackError<ClientError>) -> Self {
        match value {
            FallbackError::Rejected => Error::transport("no endpoint available"),
            FallbackError::Inner(ClientError::Call(e)) => {
                let data = e.data().and_then(|raw| serde_json::from_str(raw.get()).ok());
                Error::rpc(i64::from(e.code()), e.message(), data)
            },
            FallbackError::Inner(ClientError::RequestTimeout) => Error::transport("request timeout"),
            FallbackError::Inner(ClientError::ParseError(e)) => Error::transport(format!("malformed response: {}", e)),
            FallbackError::Inner(e) => Error::transport(e.to_string()),
        }
    }
}

/// JSON-RPC client over HTTP with ordered endpoint failover.
#[derive(Clone)]
pub struct Client {
    inner: WithFallback<EthereumRpcClient>,
    receipt_poll_interval: Duration,
}

impl Client {
    pub fn new(configuration: &Configuration) -> Result<Self, Error> {
        let mut inner = WithFallback::new().with(EthereumRpcClient::new(&configuration.endpoint, configuration.timeout)?);
        for fallback in &configuration.fallbacks {
            inner = inner.with(EthereumRpcClient::new(fallback, configuration.timeout)?);
        }

        Ok(Self {
            inner,
            receipt_poll_interval: Duration::from_millis(configuration.receipt_poll_interval_ms),
        })
    }

    async fn request<R>(&self, method: &'static str, params: ArrayParams) -> Result<R, Error>
    where
        R: DeserializeOwned + Send,
    {
        let (result, duration) = measure_duration!(log_if_error!(self
            .inner
            .call(|x| async move { x.request::<R, _>(method, params).await })
            .await
            .map_err(Error::from)));

        metric!(counter[rpc_request] = 1, method = method);
        metric!(histogram[rpc_request_duration_milliseconds] = duration.as_millis(), method = method);
        metric!(on error result => counter [ rpc_request_error ] = 1, method = method);

        result
    }

    async fn request_quantity(&self, method: &'static str, params: ArrayParams) -> Result<U256, Error> {
        let value: Value = self.request(method, params).await?;
        quantity_from_value(&value).ok_or_else(|| Error::transport(format!("malformed response: {} is not a quantity", value)))
    }
}

#[async_trait]
impl RpcAdapter for Client {
    #[instrument(name = "eth_chainId", skip(self))]
    async fn chain_id(&self) -> Result<u64, Error> {
        let value = self.request_quantity("eth_chainId", rpc_params![]).await?;
        u64::try_from(value).map_err(|_| Error::transport(format!("malformed response: chain id {} out of range", value)))
    }

    #[instrument(name = "eth_getBlockByNumber", skip(self))]
    async fn get_block(&self, tag: BlockTag) -> Result<Option<Block>, Error> {
        self.request("eth_getBlockByNumber", rpc_params![tag, false]).await
    }

    #[instrument(name = "eth_getBalance", skip(self))]
    async fn get_balance(&self, address: Address) -> Result<U256, Error> {
        self.request_quantity("eth_getBalance", rpc_params![address, BlockTag::Latest]).await
    }

    #[instrument(name = "eth_getCode", skip(self))]
    async fn get_code(&self, address: Address) -> Result<Bytes, Error> {
        self.request("eth_getCode", rpc_params![address, BlockTag::Latest]).await
    }

    #[instrument(name = "eth_call", skip(self, transaction))]
    async fn call(&self, transaction: &TransactionRequest) -> Result<Bytes, Error> {
        self.request("eth_call", rpc_params![transaction, BlockTag::Latest]).await
    }

    #[instrument(name = "eth_estimateGas", skip(self, transaction))]
    async fn estimate_gas(&self, transaction: &TransactionRequest) -> Result<U256, Error> {
        self.request_quantity("eth_estimateGas", rpc_params![transaction]).await
    }

    #[instrument(name = "get_fee_data", skip(self))]
    async fn get_fee_data(&self) -> Result<FeeData, Error> {
        let gas_price = self.request_quantity("eth_gasPrice", rpc_params![]).await?;
        let base_fee = self.get_block(BlockTag::Latest).await?.and_then(|block| block.base_fee_per_gas);

        let Some(base_fee) = base_fee else {
            return Ok(FeeData {
                gas_price: Some(gas_price),
                ..FeeData::default()
            });
        };

        let priority_fee = match self.request_quantity("eth_maxPriorityFeePerGas", rpc_params![]).await {
            Ok(fee) => fee,
            Err(Error::Rpc(_)) => U256::from(DEFAULT_PRIORITY_FEE),
            Err(e) => return Err(e),
        };

        Ok(FeeData {
            gas_price: Some(gas_price),
            max_fee_per_gas: Some(base_fee.saturating_mul(U256::from(2u64)).saturating_add(priority_fee)),
            max_priority_fee_per_gas: Some(priority_fee),
        })
    }

    #[instrument(name = "eth_sendTransaction", skip(self, transaction))]
    async fn send_transaction(&self, transaction: &TransactionRequest) -> Result<B256, Error> {
        self.request("eth_sendTransaction", rpc_params![transaction]).await
    }

    #[instrument(name = "eth_getTransactionByHash", skip(self))]
    async fn get_transaction(&self, hash: B256) -> Result<Option<Value>, Error> {
        self.request("eth_getTransactionByHash", rpc_params![hash]).await
    }

    #[instrument(name = "eth_getTransactionReceipt", skip(self))]
    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, Error> {
        self.request("eth_getTransactionReceipt", rpc_params![hash]).await
    }

    fn receipt_poll_interval(&self) -> Duration {
        self.receipt_poll_interval
    }
}
