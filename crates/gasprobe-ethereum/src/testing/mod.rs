//! Scriptable [`RpcAdapter`] for tests. Each method answers through the closure registered
//! with the matching `on_*` builder; methods left unscripted fail with a transport fault.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::types::{Block, BlockTag, FeeData, TransactionReceipt, TransactionRequest};
use crate::{Error, RpcAdapter};

type Handler<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, Error>> + Send + Sync>;

fn handler<A, T, F, Fut>(f: F) -> Option<Handler<A, T>>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    Some(Arc::new(move |args| Box::pin(f(args))))
}

#[derive(Clone, Default)]
pub struct MockAdapter {
    chain_id: Option<Handler<(), u64>>,
    get_block: Option<Handler<BlockTag, Option<Block>>>,
    get_balance: Option<Handler<Address, U256>>,
    get_code: Option<Handler<Address, Bytes>>,
    call: Option<Handler<TransactionRequest, Bytes>>,
    estimate_gas: Option<Handler<TransactionRequest, U256>>,
    get_fee_data: Option<Handler<(), FeeData>>,
    send_transaction: Option<Handler<TransactionRequest, B256>>,
    get_transaction: Option<Handler<B256, Option<Value>>>,
    get_transaction_receipt: Option<Handler<B256, Option<TransactionReceipt>>>,

    receipt_poll_interval: Option<Duration>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the adapter methods invoked so far, in invocation order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn on_chain_id<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(()) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, Error>> + Send + 'static,
    {
        self.chain_id = handler(f);
        self
    }

    pub fn on_get_block<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(BlockTag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Block>, Error>> + Send + 'static,
    {
        self.get_block = handler(f);
        self
    }

    pub fn on_get_balance<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U256, Error>> + Send + 'static,
    {
        self.get_balance = handler(f);
        self
    }

    pub fn on_get_code<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, Error>> + Send + 'static,
    {
        self.get_code = handler(f);
        self
    }

    pub fn on_call<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TransactionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, Error>> + Send + 'static,
    {
        self.call = handler(f);
        self
    }

    pub fn on_estimate_gas<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TransactionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U256, Error>> + Send + 'static,
    {
        self.estimate_gas = handler(f);
        self
    }

    pub fn on_get_fee_data<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(()) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FeeData, Error>> + Send + 'static,
    {
        self.get_fee_data = handler(f);
        self
    }

    pub fn on_send_transaction<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TransactionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B256, Error>> + Send + 'static,
    {
        self.send_transaction = handler(f);
        self
    }

    pub fn on_get_transaction<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(B256) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, Error>> + Send + 'static,
    {
        self.get_transaction = handler(f);
        self
    }

    pub fn on_get_transaction_receipt<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(B256) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<TransactionReceipt>, Error>> + Send + 'static,
    {
        self.get_transaction_receipt = handler(f);
        self
    }

    /// Defaults to 10 ms.
    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = Some(interval);
        self
    }

    async fn dispatch<A, T>(&self, name: &'static str, handler: &Option<Handler<A, T>>, args: A) -> Result<T, Error> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name);
        }

        match handler {
            Some(handler) => handler(args).await,
            None => Err(Error::transport(format!("unmocked method {}", name))),
        }
    }
}

#[async_trait]
impl RpcAdapter for MockAdapter {
    async fn chain_id(&self) -> Result<u64, Error> {
        self.dispatch("chain_id", &self.chain_id, ()).await
    }

    async fn get_block(&self, tag: BlockTag) -> Result<Option<Block>, Error> {
        self.dispatch("get_block", &self.get_block, tag).await
    }

    async fn get_balance(&self, address: Address) -> Result<U256, Error> {
        self.dispatch("get_balance", &self.get_balance, address).await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, Error> {
        self.dispatch("get_code", &self.get_code, address).await
    }

    async fn call(&self, transaction: &TransactionRequest) -> Result<Bytes, Error> {
        self.dispatch("call", &self.call, transaction.clone()).await
    }

    async fn estimate_gas(&self, transaction: &TransactionRequest) -> Result<U256, Error> {
        self.dispatch("estimate_gas", &self.estimate_gas, transaction.clone()).await
    }

    async fn get_fee_data(&self) -> Result<FeeData, Error> {
        self.dispatch("get_fee_data", &self.get_fee_data, ()).await
    }

    async fn send_transaction(&self, transaction: &TransactionRequest) -> Result<B256, Error> {
        self.dispatch("send_transaction", &self.send_transaction, transaction.clone()).await
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<Value>, Error> {
        self.dispatch("get_transaction", &self.get_transaction, hash).await
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, Error> {
        self.dispatch("get_transaction_receipt", &self.get_transaction_receipt, hash).await
    }

    fn receipt_poll_interval(&self) -> Duration {
        self.receipt_poll_interval.unwrap_or(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_methods_answer_and_are_recorded() {
        let adapter = MockAdapter::new().on_chain_id(|_| async { Ok(5) });

        assert_eq!(adapter.chain_id().await, Ok(5));
        assert!(matches!(adapter.get_fee_data().await, Err(Error::Transport { .. })));
        assert_eq!(adapter.calls(), vec!["chain_id", "get_fee_data"]);
    }

    #[tokio::test]
    async fn receipt_is_polled_at_the_configured_interval() {
        let lookups = Arc::new(Mutex::new(0));
        let adapter = {
            let lookups = lookups.clone();
            MockAdapter::new()
                .with_receipt_poll_interval(Duration::from_millis(20))
                .on_get_transaction_receipt(move |hash| {
                    let lookups = lookups.clone();
                    async move {
                        let mut lookups = lookups.lock().unwrap();
                        *lookups += 1;
                        Ok((*lookups == 3).then(|| TransactionReceipt {
                            transaction_hash: hash,
                            block_number: Some(1),
                            gas_used: U256::from(21_000u64),
                            effective_gas_price: None,
                            status: Some(1),
                        }))
                    }
                })
        };

        let started = std::time::Instant::now();
        let receipt = adapter.wait_for_receipt(B256::ZERO).await.unwrap();

        assert_eq!(receipt.gas_used, U256::from(21_000u64));
        assert_eq!(*lookups.lock().unwrap(), 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
