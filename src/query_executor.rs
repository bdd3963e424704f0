use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::error::{ExecutionError, StitchError};
use crate::query_planner::{FetchNode, OperationKind, QueryPlan};
use crate::response::{GraphQLError, GraphQLResponse, Path};
use crate::result_stitcher::ResultStitcher;
use crate::schema_registry::SupergraphSchema;

/// Extension point at the subgraph-call boundary. Hooks run in
/// registration order, before the request leaves and after a response
/// arrives.
#[async_trait]
pub trait ExecutorHook: Send + Sync {
    async fn before_dispatch(&self, _subgraph: &str, _url: &str, _body: &Value) {}
    async fn after_response(&self, _subgraph: &str, _envelope: &Value) {}
    async fn on_failure(&self, _subgraph: &str, _error: &ExecutionError) {}
}

/// Default hook logging every subgraph round trip.
pub struct LoggingHook;

#[async_trait]
impl ExecutorHook for LoggingHook {
    async fn before_dispatch(&self, subgraph: &str, url: &str, _body: &Value) {
        debug!(subgraph, url, "dispatching subgraph fetch");
    }

    async fn after_response(&self, subgraph: &str, envelope: &Value) {
        let error_count = envelope
            .get("errors")
            .and_then(Value::as_array)
            .map(|e| e.len())
            .unwrap_or(0);
        debug!(subgraph, error_count, "subgraph fetch completed");
    }

    async fn on_failure(&self, subgraph: &str, error: &ExecutionError) {
        debug!(subgraph, %error, "subgraph fetch failed");
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Deadline for each individual fetch, including any time spent
    /// waiting for a connection slot.
    pub subgraph_timeout: Duration,
    /// Deadline for the whole operation; outstanding fetches are
    /// cancelled when it passes.
    pub request_timeout: Duration,
    /// Maximum in-flight requests per subgraph.
    pub max_concurrent_per_subgraph: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            subgraph_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_concurrent_per_subgraph: 64,
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs the plan to completion and stitches the partial results.
    /// Execution failures come back inside the response as path-scoped
    /// errors; only a stitch invariant violation aborts.
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        variables: Option<&Value>,
        auth_headers: Option<&HashMap<String, String>>,
        schema: &SupergraphSchema,
    ) -> Result<GraphQLResponse, StitchError>;
}

/// Dataflow executor over HTTP subgraphs: a node is dispatched the
/// instant its last dependency produced results, independent nodes run
/// concurrently on the pooled client.
pub struct HttpQueryExecutor {
    client: reqwest::Client,
    config: ExecutorConfig,
    hooks: Vec<Arc<dyn ExecutorHook>>,
    limits: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HttpQueryExecutor {
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        HttpQueryExecutor {
            client: reqwest::Client::new(),
            config,
            hooks: vec![Arc::new(LoggingHook)],
            limits: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_hook(&mut self, hook: Arc<dyn ExecutorHook>) {
        self.hooks.push(hook);
    }

    fn limit_for(&self, subgraph: &str) -> Arc<Semaphore> {
        let mut limits = self.limits.lock().expect("limits lock poisoned");
        Arc::clone(limits.entry(subgraph.to_string()).or_insert_with(|| {
            Arc::new(Semaphore::new(self.config.max_concurrent_per_subgraph))
        }))
    }

    fn spawn_fetch(
        &self,
        node: &FetchNode,
        body: Value,
        url: String,
        auth_headers: Option<&HashMap<String, String>>,
    ) -> BoxFuture<'static, (usize, Result<Value, ExecutionError>)> {
        let id = node.id;
        let subgraph = node.subgraph.clone();
        let kind = node.operation_kind;
        let client = self.client.clone();
        let hooks = self.hooks.clone();
        let headers = auth_headers.cloned();
        let deadline = self.config.subgraph_timeout;
        let semaphore = self.limit_for(&node.subgraph);

        async move {
            let started = Instant::now();
            let outcome = match timeout(deadline, semaphore.acquire_owned()).await {
                Ok(Ok(_permit)) => {
                    for hook in &hooks {
                        hook.before_dispatch(&subgraph, &url, &body).await;
                    }
                    let remaining = deadline.saturating_sub(started.elapsed());
                    match timeout(
                        remaining,
                        send_with_retry(&client, &url, &body, headers.as_ref(), kind, &subgraph),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ExecutionError::FetchTimeout {
                            subgraph: subgraph.clone(),
                            deadline_ms: deadline.as_millis() as u64,
                        }),
                    }
                }
                _ => Err(ExecutionError::ResourceExhausted {
                    subgraph: subgraph.clone(),
                }),
            };
            match &outcome {
                Ok(envelope) => {
                    for hook in &hooks {
                        hook.after_response(&subgraph, envelope).await;
                    }
                }
                Err(error) => {
                    for hook in &hooks {
                        hook.on_failure(&subgraph, error).await;
                    }
                }
            }
            (id, outcome)
        }
        .boxed()
    }
}

impl Default for HttpQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    InFlight,
    Done,
    Failed,
    Skipped,
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        variables: Option<&Value>,
        auth_headers: Option<&HashMap<String, String>>,
        schema: &SupergraphSchema,
    ) -> Result<GraphQLResponse, StitchError> {
        let stitcher = ResultStitcher::new();
        let node_count = plan.nodes.len();
        let mut data = json!({});
        let mut errors: Vec<GraphQLError> = Vec::new();
        let mut state = vec![NodeState::Waiting; node_count];
        let mut unmet: Vec<usize> = plan.nodes.iter().map(|n| n.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        for node in &plan.nodes {
            for dep in &node.depends_on {
                dependents[*dep].push(node.id);
            }
        }
        // Concrete (indexed) paths an entity fetch's results stitch
        // back into, recorded at dispatch time.
        let mut entity_targets: HashMap<usize, Vec<Path>> = HashMap::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, (usize, Result<Value, ExecutionError>)>> =
            FuturesUnordered::new();
        let mut ready: VecDeque<usize> = plan
            .nodes
            .iter()
            .filter(|n| n.depends_on.is_empty())
            .map(|n| n.id)
            .collect();
        let global_deadline = Instant::now() + self.config.request_timeout;

        loop {
            while let Some(id) = ready.pop_front() {
                let node = &plan.nodes[id];
                let mut request_variables = build_variables(node, variables);
                if let Some(requirement) = &node.requires {
                    let found =
                        stitcher.collect_representations(&data, &node.produces_path, requirement);
                    if found.is_empty() {
                        // No parent objects survived to resolve.
                        state[id] = NodeState::Done;
                        note_completion(id, false, plan, &dependents, &mut unmet, &mut state, &mut ready);
                        continue;
                    }
                    let (targets, representations): (Vec<Path>, Vec<Value>) =
                        found.into_iter().unzip();
                    entity_targets.insert(id, targets);
                    request_variables
                        .insert("representations".to_string(), Value::Array(representations));
                }
                let Some(url) = schema.subgraph_url(&node.subgraph) else {
                    state[id] = NodeState::Failed;
                    fail_node(node, &ExecutionError::UnknownSubgraph { subgraph: node.subgraph.clone() }, &stitcher, &mut data, &mut errors);
                    note_completion(id, true, plan, &dependents, &mut unmet, &mut state, &mut ready);
                    continue;
                };
                let body = json!({
                    "query": node.operation,
                    "variables": Value::Object(request_variables),
                });
                state[id] = NodeState::InFlight;
                in_flight.push(self.spawn_fetch(node, body, url.to_string(), auth_headers));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                completed = in_flight.next() => {
                    let Some((id, outcome)) = completed else { continue };
                    let node = &plan.nodes[id];
                    match outcome {
                        Ok(envelope) => {
                            collect_subgraph_errors(&envelope, &node.subgraph, &mut errors);
                            let merged = merge_envelope(
                                node,
                                envelope,
                                entity_targets.get(&id),
                                &stitcher,
                                &mut data,
                            )?;
                            match merged {
                                Ok(()) => {
                                    state[id] = NodeState::Done;
                                    note_completion(id, false, plan, &dependents, &mut unmet, &mut state, &mut ready);
                                }
                                Err(error) => {
                                    state[id] = NodeState::Failed;
                                    fail_node(node, &error, &stitcher, &mut data, &mut errors);
                                    note_completion(id, true, plan, &dependents, &mut unmet, &mut state, &mut ready);
                                }
                            }
                        }
                        Err(error) => {
                            warn!(subgraph = %node.subgraph, %error, "subgraph fetch failed");
                            state[id] = NodeState::Failed;
                            fail_node(node, &error, &stitcher, &mut data, &mut errors);
                            note_completion(id, true, plan, &dependents, &mut unmet, &mut state, &mut ready);
                        }
                    }
                }
                _ = tokio::time::sleep_until(global_deadline) => {
                    // Global deadline: abandon everything still pending
                    // or in flight and mark their paths.
                    for node in &plan.nodes {
                        if matches!(state[node.id], NodeState::Waiting | NodeState::InFlight) {
                            state[node.id] = NodeState::Failed;
                            fail_node(
                                node,
                                &ExecutionError::DeadlineExceeded { subgraph: node.subgraph.clone() },
                                &stitcher,
                                &mut data,
                                &mut errors,
                            );
                        }
                    }
                    break;
                }
            }
        }

        let ordered = stitcher.reorder(&data, &plan.root_selections);
        Ok(GraphQLResponse {
            data: Some(ordered),
            errors,
        })
    }
}

/// Restricts the client-supplied variables to the ones the node's
/// operation actually references.
fn build_variables(node: &FetchNode, variables: Option<&Value>) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(provided) = variables.and_then(Value::as_object) else {
        return out;
    };
    for name in &node.variable_usages {
        if let Some(value) = provided.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

/// Applies a successful envelope to the response tree. The outer
/// `Result` is a stitch invariant violation and aborts the operation;
/// the inner one is a node-scoped execution failure.
fn merge_envelope(
    node: &FetchNode,
    mut envelope: Value,
    targets: Option<&Vec<Path>>,
    stitcher: &ResultStitcher,
    data: &mut Value,
) -> Result<Result<(), ExecutionError>, StitchError> {
    let env_data = envelope
        .as_object_mut()
        .and_then(|o| o.remove("data"))
        .unwrap_or(Value::Null);

    if node.requires.is_some() {
        let targets = targets.map(Vec::as_slice).unwrap_or(&[]);
        let entities = match env_data {
            Value::Object(mut object) => match object.remove("_entities") {
                Some(Value::Array(entities)) if entities.len() == targets.len() => Some(entities),
                _ => None,
            },
            _ => None,
        };
        match entities {
            Some(entities) => {
                stitcher.merge_entities(data, targets, entities)?;
                Ok(Ok(()))
            }
            None => Ok(Err(ExecutionError::MalformedResponse {
                subgraph: node.subgraph.clone(),
                message: "missing or mismatched _entities in response".to_string(),
            })),
        }
    } else {
        match env_data {
            Value::Object(_) => {
                stitcher.merge_fragment(data, &node.produces_path, env_data)?;
                Ok(Ok(()))
            }
            _ => Ok(Err(ExecutionError::MalformedResponse {
                subgraph: node.subgraph.clone(),
                message: "response carried no data".to_string(),
            })),
        }
    }
}

/// Nulls the node's produced paths and records one path-scoped error
/// per top-level produced field.
fn fail_node(
    node: &FetchNode,
    error: &ExecutionError,
    stitcher: &ResultStitcher,
    data: &mut Value,
    errors: &mut Vec<GraphQLError>,
) {
    for path in node.error_paths() {
        stitcher.null_at_path(data, path);
        errors.push(GraphQLError::at_path(error.to_string(), path).with_code(error_code(error)));
    }
}

/// Propagates a node's completion to its dependents. A failed (or
/// skipped) dependency skips every downstream entity fetch, since its
/// key inputs are gone; ordering-only dependencies (mutation chaining)
/// still run.
fn note_completion(
    id: usize,
    failed: bool,
    plan: &QueryPlan,
    dependents: &[Vec<usize>],
    unmet: &mut [usize],
    state: &mut [NodeState],
    ready: &mut VecDeque<usize>,
) {
    let mut work = vec![(id, failed)];
    while let Some((done, done_failed)) = work.pop() {
        for &dependent in &dependents[done] {
            if state[dependent] != NodeState::Waiting {
                continue;
            }
            unmet[dependent] -= 1;
            let node = &plan.nodes[dependent];
            if done_failed && node.requires.is_some() {
                state[dependent] = NodeState::Skipped;
                work.push((dependent, true));
            } else if unmet[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }
}

/// Errors reported by the subgraph itself are forwarded to the client
/// with the subgraph's name attached.
fn collect_subgraph_errors(envelope: &Value, subgraph: &str, errors: &mut Vec<GraphQLError>) {
    let Some(entries) = envelope.get("errors").and_then(Value::as_array) else {
        return;
    };
    for entry in entries {
        let message = entry
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("subgraph error")
            .to_string();
        let mut error = GraphQLError::new(message);
        error.path = entry.get("path").cloned();
        let extensions = error.extensions.get_or_insert_with(Map::new);
        if let Some(original) = entry.get("extensions").and_then(Value::as_object) {
            extensions.extend(original.clone());
        }
        extensions.insert("service".to_string(), Value::String(subgraph.to_string()));
        errors.push(error);
    }
}

fn error_code(error: &ExecutionError) -> &'static str {
    match error {
        ExecutionError::SubgraphRequest { .. } => "SUBGRAPH_REQUEST_FAILED",
        ExecutionError::SubgraphStatus { .. } => "SUBGRAPH_HTTP_ERROR",
        ExecutionError::MalformedResponse { .. } => "MALFORMED_SUBGRAPH_RESPONSE",
        ExecutionError::FetchTimeout { .. } => "FETCH_TIMEOUT",
        ExecutionError::DeadlineExceeded { .. } => "REQUEST_DEADLINE_EXCEEDED",
        ExecutionError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
        ExecutionError::DependencyFailed { .. } => "DEPENDENCY_FAILED",
        ExecutionError::UnknownSubgraph { .. } => "UNKNOWN_SUBGRAPH",
    }
}

fn is_transient(error: &ExecutionError) -> bool {
    match error {
        ExecutionError::SubgraphRequest { source, .. } => {
            source.is_connect() || source.is_timeout()
        }
        ExecutionError::SubgraphStatus { status, .. } => status.is_server_error(),
        _ => false,
    }
}

async fn send_once(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    headers: Option<&HashMap<String, String>>,
    subgraph: &str,
) -> Result<Value, ExecutionError> {
    let mut request = client.post(url).json(body);
    if let Some(headers) = headers {
        for (name, value) in headers {
            request = request.header(name, value);
        }
    }
    let response = request
        .send()
        .await
        .map_err(|e| ExecutionError::SubgraphRequest {
            subgraph: subgraph.to_string(),
            source: e,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExecutionError::SubgraphStatus {
            subgraph: subgraph.to_string(),
            status,
        });
    }
    let envelope: Value =
        response
            .json()
            .await
            .map_err(|e| ExecutionError::SubgraphRequest {
                subgraph: subgraph.to_string(),
                source: e,
            })?;
    if !envelope.is_object() {
        return Err(ExecutionError::MalformedResponse {
            subgraph: subgraph.to_string(),
            message: "response body is not a JSON object".to_string(),
        });
    }
    Ok(envelope)
}

/// Idempotent reads retry once on transient transport failure; writes
/// never do.
async fn send_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    headers: Option<&HashMap<String, String>>,
    kind: OperationKind,
    subgraph: &str,
) -> Result<Value, ExecutionError> {
    match send_once(client, url, body, headers, subgraph).await {
        Err(error) if kind == OperationKind::Query && is_transient(&error) => {
            debug!(subgraph, %error, "retrying transient subgraph failure");
            send_once(client, url, body, headers, subgraph).await
        }
        other => other,
    }
}
