pub mod error;
pub mod federation_gateway;
pub mod query_executor;
pub mod query_planner;
pub mod response;
pub mod result_stitcher;
pub mod schema_registry;

pub use error::{ExecutionError, GatewayError, PlanningError, SchemaError, StitchError};
pub use federation_gateway::FederationGateway;
pub use query_executor::{ExecutorHook, HttpQueryExecutor, LoggingHook};
pub use query_planner::{FederatedQueryPlanner, QueryPlan};
pub use response::{GraphQLError, GraphQLResponse, Path, PathElement};
pub use schema_registry::{InMemorySchemaRegistry, SupergraphSchema};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A subgraph known to the gateway: a stable name, a reachable URL and
/// the SDL fragment it contributed to the supergraph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubgraphConfig {
    pub name: String,
    pub url: String,
    pub schema: String,
}

/// An incoming GraphQL operation as posted by the client.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(rename = "operationName", default)]
    pub operation_name: Option<String>,
    #[serde(skip)]
    pub auth_headers: Option<HashMap<String, String>>,
}
