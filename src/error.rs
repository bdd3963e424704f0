use thiserror::Error;

/// Errors raised while composing or consulting the supergraph schema.
///
/// Fatal at startup; at runtime they reject the offending operation
/// before any subgraph call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("unknown field: {type_name}.{field_name}")]
    UnknownField {
        type_name: String,
        field_name: String,
    },

    #[error("type {0} is not an entity (no @key declared)")]
    NotAnEntity(String),

    #[error("invalid entity key on {type_name}: {reason}")]
    InvalidEntityKey { type_name: String, reason: String },

    #[error(
        "composition conflict: field {type_name}.{field_name} is declared by both {first} and {second}"
    )]
    CompositionConflict {
        type_name: String,
        field_name: String,
        first: String,
        second: String,
    },

    #[error("failed to parse schema for subgraph {subgraph}: {message}")]
    ParseFailure { subgraph: String, message: String },
}

/// Errors raised while turning a validated operation into a query plan.
/// Planning failures abort before any subgraph call: the client gets a
/// GraphQL error with no partial data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("failed to parse operation: {0}")]
    ParseFailure(String),

    #[error("operation {0:?} not found in document")]
    UnknownOperation(Option<String>),

    #[error("subscriptions are not supported")]
    SubscriptionUnsupported,

    #[error(
        "field {type_name}.{field_name} in subgraph {owner} is unreachable: parent type has no resolvable entity key"
    )]
    UnreachableField {
        type_name: String,
        field_name: String,
        owner: String,
    },

    #[error("operation selects nothing plannable")]
    EmptyPlan,

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Errors scoped to one fetch node during execution. These never abort
/// the response: the node's path is nulled, an error entry is recorded at
/// that path, and independent nodes keep running.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("request to subgraph {subgraph} failed: {source}")]
    SubgraphRequest {
        subgraph: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("subgraph {subgraph} returned HTTP {status}")]
    SubgraphStatus {
        subgraph: String,
        status: reqwest::StatusCode,
    },

    #[error("subgraph {subgraph} returned a malformed response: {message}")]
    MalformedResponse { subgraph: String, message: String },

    #[error("fetch from subgraph {subgraph} exceeded its {deadline_ms}ms deadline")]
    FetchTimeout { subgraph: String, deadline_ms: u64 },

    #[error("request deadline exceeded before fetch from subgraph {subgraph} completed")]
    DeadlineExceeded { subgraph: String },

    #[error("no connection to subgraph {subgraph} became available in time")]
    ResourceExhausted { subgraph: String },

    #[error("dependency fetch failed, skipping fetch from subgraph {subgraph}")]
    DependencyFailed { subgraph: String },

    #[error("no routing URL registered for subgraph {subgraph}")]
    UnknownSubgraph { subgraph: String },
}

/// Merge invariant violations. A stitch error means planning or
/// composition let two subgraphs claim the same concrete value, so no
/// partial data can be trusted: the whole response is replaced with a
/// generic internal error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StitchError {
    #[error("conflicting values for field at {path}")]
    ConflictingFieldValue { path: String },

    #[error("no placeholder object at {path} to merge an entity into")]
    MissingPlaceholder { path: String },

    #[error("path {path} does not exist in the response tree")]
    InvalidPath { path: String },
}

/// Top-level gateway failures, mostly startup and configuration.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Stitch(#[from] StitchError),

    #[error("failed to read {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse supergraph config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}
