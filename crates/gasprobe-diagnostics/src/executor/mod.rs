//! Probe execution.
//!
//! A [`ProbeRun`] walks a plan produced by the registry. Read-only probes whose
//! dependencies are complete are handed to a bounded worker pool; mutating probes are
//! dispatched one at a time, in plan order. Results come out in completion order, either
//! one by one through [`ProbeRun::next`] or as a stream through [`ProbeRun::into_stream`].

mod outcome;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use chrono::Utc;
use futures::Stream;
use gasprobe_common::concurrency::ConcurrentExecutor;
use gasprobe_common::{measure_duration, task};
use gasprobe_ethereum::quantity::quantity_from_value;
use gasprobe_ethereum::RpcAdapter;
pub use outcome::{ProbeOutcome, ProbeResult};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::{Invocation, ParamValue, ProbeSpec};
use crate::Configuration;

pub const UNRESOLVED_DEPENDENCY: &str = "unresolved dependency";
pub const CANCELLED: &str = "cancelled";

type Worker = ConcurrentExecutor<Arc<dyn RpcAdapter>, (usize, ProbeResult)>;

/// One pass over a plan. Consumed by iteration, it cannot be restarted.
pub struct ProbeRun {
    plan: Vec<ProbeSpec>,
    cancellation: CancellationToken,
    probe_timeout: Duration,

    workers: Worker,
    pending: VecDeque<usize>,
    in_flight: BTreeSet<usize>,
    outputs: HashMap<String, ProbeOutcome>,
    ready: VecDeque<ProbeResult>,
    finished: bool,
}

impl ProbeRun {
    pub fn new(plan: Vec<ProbeSpec>, adapter: Arc<dyn RpcAdapter>, configuration: &Configuration, cancellation: CancellationToken) -> Self {
        let pending = (0..plan.len()).collect();

        Self {
            plan,
            cancellation,
            probe_timeout: Duration::from_millis(configuration.probe_timeout_ms),

            workers: ConcurrentExecutor::new(adapter, configuration.concurrency_limit.max(1)),
            pending,
            in_flight: BTreeSet::new(),
            outputs: HashMap::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// Next completed probe, `None` once every probe of the plan produced a result.
    pub async fn next(&mut self) -> Option<ProbeResult> {
        loop {
            if let Some(result) = self.ready.pop_front() {
                return Some(result);
            }

            if self.finished {
                return None;
            }

            if self.cancellation.is_cancelled() {
                self.abandon();
                continue;
            }

            self.dispatch();
            if !self.ready.is_empty() {
                continue;
            }

            if self.workers.is_empty() {
                self.settle();
                continue;
            }

            tokio::select! {
                biased;

                _ = self.cancellation.cancelled() => self.abandon(),
                joined = self.workers.next() => match joined {
                    Some(Ok((index, result))) => return Some(self.record(index, result)),
                    Some(Err(e)) => warn!(message = "probe task failed", error = %e),
                    None => {},
                },
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProbeResult> + Send {
        futures::stream::unfold(self, |mut run| async move { run.next().await.map(|result| (result, run)) })
    }

    fn dispatch(&mut self) {
        let mut waiting = VecDeque::with_capacity(self.pending.len());
        while let Some(index) = self.pending.pop_front() {
            if self.can_start(index) {
                self.start(index);
            } else {
                waiting.push_back(index);
            }
        }

        self.pending = waiting;
    }

    fn can_start(&self, index: usize) -> bool {
        let spec = &self.plan[index];
        if !spec.depends_on.iter().all(|dependency| self.outputs.contains_key(dependency)) {
            return false;
        }

        if !spec.mutates_chain_state {
            return true;
        }

        // Mutations run alone and after every earlier mutation completed.
        let earlier_mutation_open = self.plan[..index].iter().any(|other| other.mutates_chain_state && !self.outputs.contains_key(&other.id));
        let mutation_in_flight = self.in_flight.iter().any(|&i| self.plan[i].mutates_chain_state);

        !earlier_mutation_open && !mutation_in_flight
    }

    fn start(&mut self, index: usize) {
        let spec = &self.plan[index];

        let params = match resolve(spec, &self.outputs) {
            Some(params) => params,
            None => {
                self.complete(index, Value::Null, ProbeOutcome::transport(UNRESOLVED_DEPENDENCY));
                return;
            },
        };

        let invocation = match spec.method.decode(params.clone()) {
            Ok(invocation) => invocation,
            Err(cause) => {
                self.complete(index, params, ProbeOutcome::transport(format!("invalid parameters: {}", cause)));
                return;
            },
        };

        debug!(probe = %spec.id, method = spec.method.as_str(), "dispatching probe");

        let spec_id = spec.id.clone();
        let method = spec.method;
        let timeout = self.probe_timeout;

        self.in_flight.insert(index);
        self.workers.register(task!(|adapter| {
            let started_at = Utc::now();
            let (outcome, duration) = measure_duration!(invoke(invocation, adapter, timeout).await);

            (
                index,
                ProbeResult {
                    spec_id,
                    method,
                    params,
                    started_at,
                    duration_ms: duration.as_millis() as u64,
                    outcome,
                },
            )
        }));
    }

    fn record(&mut self, index: usize, result: ProbeResult) -> ProbeResult {
        self.in_flight.remove(&index);
        self.outputs.insert(result.spec_id.clone(), result.outcome.clone());
        result
    }

    fn complete(&mut self, index: usize, params: Value, outcome: ProbeOutcome) {
        let spec = &self.plan[index];
        let result = ProbeResult {
            spec_id: spec.id.clone(),
            method: spec.method,
            params,
            started_at: Utc::now(),
            duration_ms: 0,
            outcome,
        };

        self.outputs.insert(result.spec_id.clone(), result.outcome.clone());
        self.ready.push_back(result);
    }

    /// Keeps the probes that already finished, drops the worker pool and closes every
    /// other probe as cancelled.
    fn abandon(&mut self) {
        for joined in self.workers.finished() {
            match joined {
                Ok((index, result)) => {
                    let result = self.record(index, result);
                    self.ready.push_back(result);
                },
                Err(e) => warn!(message = "probe task failed", error = %e),
            }
        }

        let discarded = self.workers.shutdown();
        debug!(discarded, "probe run cancelled");

        let unfinished: BTreeSet<usize> = std::mem::take(&mut self.in_flight).into_iter().chain(self.pending.drain(..)).collect();
        for index in unfinished {
            self.complete(index, Value::Null, ProbeOutcome::transport(CANCELLED));
        }

        self.finished = true;
    }

    /// Closes the run once the pool is idle. Probes lost by the pool or never startable are
    /// closed with a fault so that every planned probe yields a result.
    fn settle(&mut self) {
        let lost = std::mem::take(&mut self.in_flight);
        for index in lost {
            self.complete(index, Value::Null, ProbeOutcome::transport("aborted"));
        }

        let stuck: Vec<usize> = self.pending.drain(..).collect();
        for index in stuck {
            self.complete(index, Value::Null, ProbeOutcome::transport(UNRESOLVED_DEPENDENCY));
        }

        self.finished = true;
    }
}

/// Lazily executes `plan`. The stream ends once every probe produced a result.
pub fn run(plan: Vec<ProbeSpec>, adapter: Arc<dyn RpcAdapter>, configuration: &Configuration, cancellation: CancellationToken) -> impl Stream<Item = ProbeResult> + Send {
    ProbeRun::new(plan, adapter, configuration, cancellation).into_stream()
}

async fn invoke(invocation: Invocation, adapter: Arc<dyn RpcAdapter>, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, invocation.invoke(adapter.as_ref())).await {
        Ok(result) => ProbeOutcome::from(result),
        Err(_) => ProbeOutcome::transport(format!("timeout after {} ms", timeout.as_millis())),
    }
}

/// Substitutes output references. `None` when a referenced probe did not succeed or its
/// output has nothing at the pointer.
fn resolve(spec: &ProbeSpec, outputs: &HashMap<String, ProbeOutcome>) -> Option<Value> {
    let mut params = Map::with_capacity(spec.params.len());
    for (key, value) in &spec.params {
        let value = match value {
            ParamValue::Literal(value) => value.clone(),
            ParamValue::Output(reference) => {
                let output = outputs.get(&reference.output_of)?.value()?;
                let value = output.pointer(&reference.pointer).filter(|value| !value.is_null())?;

                match reference.percent {
                    Some(percent) => {
                        let quantity = quantity_from_value(value)?;
                        Value::String((quantity.saturating_mul(U256::from(percent)) / U256::from(100u64)).to_string())
                    },
                    None => value.clone(),
                }
            },
        };

        params.insert(key.clone(), value);
    }

    Some(Value::Object(params))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use gasprobe_ethereum::testing::MockAdapter;
    use gasprobe_ethereum::Error;
    use serde_json::json;

    use super::*;
    use crate::registry::{ProbeRegistry, RpcMethod};

    fn configuration(concurrency_limit: usize) -> Configuration {
        Configuration {
            probe_timeout_ms: 200,
            concurrency_limit,
            ..Configuration::default()
        }
    }

    fn plan(specs: Vec<ProbeSpec>) -> Vec<ProbeSpec> {
        let mut registry = ProbeRegistry::new();
        for spec in specs {
            registry.register(spec).unwrap();
        }

        registry.topological_order().unwrap()
    }

    async fn collect(plan: Vec<ProbeSpec>, adapter: MockAdapter, concurrency_limit: usize) -> Vec<ProbeResult> {
        run(plan, Arc::new(adapter), &configuration(concurrency_limit), CancellationToken::new()).collect().await
    }

    fn outcome_of<'a>(results: &'a [ProbeResult], id: &str) -> &'a ProbeOutcome {
        &results.iter().find(|result| result.spec_id == id).unwrap().outcome
    }

    mod run {
        use super::*;

        #[tokio::test]
        async fn should_yield_one_result_per_probe() {
            // Given
            let adapter = MockAdapter::new().on_chain_id(|_| async { Ok(1337) }).on_get_fee_data(|_| async { Ok(Default::default()) });
            let plan = plan(vec![ProbeSpec::new("chain", RpcMethod::ChainId), ProbeSpec::new("fees", RpcMethod::GetFeeData)]);

            // When
            let results = collect(plan, adapter, 4).await;

            // Then
            assert_eq!(results.len(), 2);
            assert_eq!(outcome_of(&results, "chain"), &ProbeOutcome::ok(json!(1337)));
        }

        #[tokio::test]
        async fn should_keep_rpc_and_transport_faults_apart() {
            // Given
            let adapter = MockAdapter::new()
                .on_chain_id(|_| async { Err(Error::rpc(-32601, "method not found", None)) })
                .on_get_fee_data(|_| async { Err(Error::transport("connection refused")) });
            let plan = plan(vec![ProbeSpec::new("chain", RpcMethod::ChainId), ProbeSpec::new("fees", RpcMethod::GetFeeData)]);

            // When
            let results = collect(plan, adapter, 4).await;

            // Then
            assert!(matches!(outcome_of(&results, "chain"), ProbeOutcome::RpcFault(fault) if fault.code == -32601));
            assert_eq!(outcome_of(&results, "fees"), &ProbeOutcome::transport("connection refused"));
        }

        #[tokio::test]
        async fn should_bound_each_probe_by_the_timeout() {
            // Given
            let adapter = MockAdapter::new().on_chain_id(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            });
            let plan = plan(vec![ProbeSpec::new("chain", RpcMethod::ChainId)]);

            // When
            let results = collect(plan, adapter, 1).await;

            // Then
            assert_eq!(outcome_of(&results, "chain"), &ProbeOutcome::transport("timeout after 200 ms"));
        }

        #[tokio::test]
        async fn should_feed_outputs_into_dependent_params() {
            // Given
            let adapter = MockAdapter::new()
                .on_estimate_gas(|_| async { Ok(U256::from(21000u64)) })
                .on_call(|transaction| async move {
                    assert_eq!(transaction.gas, Some(U256::from(23100u64)));
                    Ok(Default::default())
                });
            let plan = plan(vec![
                ProbeSpec::new("estimate", RpcMethod::EstimateGas),
                ProbeSpec::new("simulate", RpcMethod::Call).output_scaled("gas", "estimate", "", Some(110)),
            ]);

            // When
            let results = collect(plan, adapter, 2).await;

            // Then
            assert_eq!(outcome_of(&results, "simulate"), &ProbeOutcome::ok(json!("0x")));
            assert_eq!(results.iter().find(|result| result.spec_id == "simulate").unwrap().params, json!({ "gas": "23100" }));
        }

        #[tokio::test]
        async fn should_skip_probes_whose_reference_failed() {
            // Given
            let adapter = MockAdapter::new().on_send_transaction(|_| async { Err(Error::rpc(-32000, "insufficient funds", None)) });
            let plan = plan(vec![
                ProbeSpec::new("send", RpcMethod::SendTransaction).mutating(1),
                ProbeSpec::new("receipt", RpcMethod::GetTransactionReceipt).output("hash", "send", ""),
            ]);

            // When
            let results = collect(plan, adapter.clone(), 2).await;

            // Then
            assert_eq!(outcome_of(&results, "receipt"), &ProbeOutcome::transport(UNRESOLVED_DEPENDENCY));
            assert_eq!(adapter.calls(), vec!["send_transaction"]);
        }

        #[tokio::test]
        async fn should_report_undecodable_resolved_params() {
            // Given
            let adapter = MockAdapter::new().on_chain_id(|_| async { Ok(5) });
            let plan = plan(vec![
                ProbeSpec::new("chain", RpcMethod::ChainId),
                ProbeSpec::new("balance", RpcMethod::GetBalance).output("address", "chain", ""),
            ]);

            // When
            let results = collect(plan, adapter.clone(), 2).await;

            // Then
            assert!(matches!(
                outcome_of(&results, "balance"),
                ProbeOutcome::TransportFault { cause } if cause.starts_with("invalid parameters: ")
            ));
            assert_eq!(adapter.calls(), vec!["chain_id"]);
        }

        #[tokio::test]
        async fn should_serialize_mutating_probes_in_sequence_order() {
            // Given
            let active = Arc::new(AtomicUsize::new(0));
            let order = Arc::new(std::sync::Mutex::new(vec![]));
            let adapter = {
                let active = active.clone();
                let order = order.clone();
                MockAdapter::new().on_send_transaction(move |transaction| {
                    let active = active.clone();
                    let order = order.clone();
                    async move {
                        assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        order.lock().unwrap().push(transaction.nonce.unwrap_or_default());
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(Default::default())
                    }
                })
            };
            let plan = plan(vec![
                ProbeSpec::new("third", RpcMethod::SendTransaction).literal("nonce", 3).mutating(3),
                ProbeSpec::new("first", RpcMethod::SendTransaction).literal("nonce", 1).mutating(1),
                ProbeSpec::new("second", RpcMethod::SendTransaction).literal("nonce", 2).mutating(2),
            ]);

            // When
            let results = collect(plan, adapter, 8).await;

            // Then
            assert_eq!(results.len(), 3);
            assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        }

        #[tokio::test]
        async fn should_cancel_unfinished_probes() {
            // Given
            let cancellation = CancellationToken::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let adapter = {
                let cancellation = cancellation.clone();
                MockAdapter::new().on_chain_id(move |_| {
                    let cancellation = cancellation.clone();
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if call == 2 {
                            cancellation.cancel();
                            std::future::pending::<()>().await;
                        }
                        Ok(call as u64)
                    }
                })
            };
            let plan = plan((0..5).map(|i| ProbeSpec::new(format!("probe_{}", i), RpcMethod::ChainId)).collect());

            // When
            let results: Vec<ProbeResult> = run(plan, Arc::new(adapter), &configuration(1), cancellation).collect().await;

            // Then
            assert_eq!(results.len(), 5);
            assert_eq!(results.iter().filter(|result| result.outcome.is_ok()).count(), 2);
            assert_eq!(
                results.iter().filter(|result| result.outcome == ProbeOutcome::transport(CANCELLED)).count(),
                3
            );
        }

        #[tokio::test]
        async fn should_keep_results_finished_alongside_cancellation() {
            // Given
            let cancellation = CancellationToken::new();
            let adapter = {
                let cancellation = cancellation.clone();
                MockAdapter::new().on_chain_id(|_| async { Ok(7) }).on_get_fee_data(move |_| {
                    let cancellation = cancellation.clone();
                    async move {
                        cancellation.cancel();
                        std::future::pending::<()>().await;
                        Ok(Default::default())
                    }
                })
            };
            let plan = plan(vec![ProbeSpec::new("fast", RpcMethod::ChainId), ProbeSpec::new("slow", RpcMethod::GetFeeData)]);

            // When
            let results: Vec<ProbeResult> = run(plan, Arc::new(adapter.clone()), &configuration(2), cancellation).collect().await;

            // Then
            assert_eq!(adapter.calls(), vec!["chain_id", "get_fee_data"]);
            assert_eq!(outcome_of(&results, "fast"), &ProbeOutcome::ok(json!(7)));
            assert_eq!(outcome_of(&results, "slow"), &ProbeOutcome::transport(CANCELLED));
        }

        #[tokio::test]
        async fn should_return_nothing_for_empty_plan() {
            let results = collect(vec![], MockAdapter::new(), 1).await;

            assert!(results.is_empty());
        }
    }

    mod resolve {
        use super::*;

        #[test]
        fn should_read_pointer_into_output() {
            // Given
            let spec = ProbeSpec::new("send", RpcMethod::SendTransaction).output_scaled("gasPrice", "fees", "/gasPrice", Some(200));
            let outputs = HashMap::from([("fees".to_string(), ProbeOutcome::ok(json!({ "gasPrice": "1000000000" })))]);

            // When
            let params = resolve(&spec, &outputs);

            // Then
            assert_eq!(params, Some(json!({ "gasPrice": "2000000000" })));
        }

        #[test]
        fn should_not_resolve_missing_or_null_pointer() {
            let spec = ProbeSpec::new("send", RpcMethod::SendTransaction).output("maxFeePerGas", "fees", "/maxFeePerGas");

            for output in [json!({}), json!({ "maxFeePerGas": null })] {
                let outputs = HashMap::from([("fees".to_string(), ProbeOutcome::ok(output))]);
                assert_eq!(resolve(&spec, &outputs), None);
            }
        }
    }
}
