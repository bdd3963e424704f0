use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path as FsPath;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::GatewayError;
use crate::query_executor::QueryExecutor;
use crate::query_planner::QueryPlanner;
use crate::response::{GraphQLError, GraphQLResponse};
use crate::schema_registry::SchemaRegistry;
use crate::{GraphQLRequest, SubgraphConfig};

/// `supergraph.yaml` layout: subgraph name to routing URL plus the SDL
/// file it contributes. A `BTreeMap` keeps registration order stable so
/// composition is deterministic across restarts.
#[derive(Debug, Deserialize)]
pub struct SupergraphConfig {
    pub subgraphs: BTreeMap<String, SubgraphEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SubgraphEntry {
    pub routing_url: String,
    pub schema: SchemaFile,
}

#[derive(Debug, Deserialize)]
pub struct SchemaFile {
    pub file: String,
}

pub fn parse_supergraph_config(contents: &str) -> Result<SupergraphConfig, GatewayError> {
    Ok(serde_yaml::from_str(contents)?)
}

/// The gateway context: registry, planner and executor wired together.
/// Constructed explicitly at startup and shared behind an `Arc`, so a
/// process (or a test) can run any number of independent gateways.
pub struct FederationGateway {
    schema_registry: Arc<dyn SchemaRegistry + Send + Sync>,
    query_planner: Arc<dyn QueryPlanner + Send + Sync>,
    query_executor: Arc<dyn QueryExecutor + Send + Sync>,
}

impl FederationGateway {
    pub fn new(
        schema_registry: Box<dyn SchemaRegistry + Send + Sync>,
        query_planner: Box<dyn QueryPlanner + Send + Sync>,
        query_executor: Box<dyn QueryExecutor + Send + Sync>,
    ) -> Self {
        FederationGateway {
            schema_registry: Arc::from(schema_registry),
            query_planner: Arc::from(query_planner),
            query_executor: Arc::from(query_executor),
        }
    }

    /// Full pipeline for one operation: snapshot, plan, execute. Always
    /// produces a response body; schema and planning failures reject
    /// the operation with no data, execution failures surface inside
    /// the response, and stitch invariant violations are reported as a
    /// generic internal error.
    pub async fn process_request(&self, request: GraphQLRequest) -> GraphQLResponse {
        let schema = match self.schema_registry.snapshot().await {
            Ok(schema) => schema,
            Err(e) => {
                return GraphQLResponse::from_error(
                    GraphQLError::new(e.to_string()).with_code("SCHEMA_ERROR"),
                );
            }
        };

        let plan = match self
            .query_planner
            .plan(&request.query, request.operation_name.as_deref(), &schema)
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                return GraphQLResponse::from_error(
                    GraphQLError::new(e.to_string()).with_code("PLANNING_FAILED"),
                );
            }
        };

        match self
            .query_executor
            .execute_plan(
                &plan,
                request.variables.as_ref(),
                request.auth_headers.as_ref(),
                &schema,
            )
            .await
        {
            Ok(response) => response,
            Err(stitch_error) => {
                error!(%stitch_error, "response stitching violated a merge invariant");
                GraphQLResponse::from_error(
                    GraphQLError::new("internal error while assembling the response")
                        .with_code("INTERNAL_ERROR"),
                )
            }
        }
    }

    pub async fn register_subgraph(&self, subgraph: SubgraphConfig) -> Result<(), GatewayError> {
        self.schema_registry.register_subgraph(subgraph).await?;
        Ok(())
    }

    /// Reads the supergraph config and registers every subgraph with
    /// its SDL. Safe to call again at runtime: the composed schema is
    /// replaced as one atomic snapshot, in-flight operations keep the
    /// snapshot they started with.
    pub async fn load_schemas(&self, config_path: &FsPath) -> Result<(), GatewayError> {
        let config_dir = config_path.parent().unwrap_or_else(|| FsPath::new(""));
        let contents =
            std::fs::read_to_string(config_path).map_err(|e| GatewayError::ConfigIo {
                path: config_path.display().to_string(),
                source: e,
            })?;
        let config = parse_supergraph_config(&contents)?;

        for (name, entry) in config.subgraphs {
            let schema_path = config_dir.join(&entry.schema.file);
            let schema =
                std::fs::read_to_string(&schema_path).map_err(|e| GatewayError::ConfigIo {
                    path: schema_path.display().to_string(),
                    source: e,
                })?;
            info!(subgraph = %name, url = %entry.routing_url, "registering subgraph");
            self.register_subgraph(SubgraphConfig {
                name,
                url: entry.routing_url,
                schema,
            })
            .await?;
        }
        // Compose eagerly so bad fragments fail here, not on the first
        // request.
        self.schema_registry.snapshot().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_executor::HttpQueryExecutor;
    use crate::query_planner::FederatedQueryPlanner;
    use crate::schema_registry::InMemorySchemaRegistry;
    use pretty_assertions::assert_eq;

    fn gateway() -> FederationGateway {
        FederationGateway::new(
            Box::new(InMemorySchemaRegistry::new()),
            Box::new(FederatedQueryPlanner::new()),
            Box::new(HttpQueryExecutor::new()),
        )
    }

    #[test]
    fn supergraph_config_parses_the_expected_layout() {
        let config = parse_supergraph_config(
            r#"
            subgraphs:
              products:
                routing_url: http://localhost:4001/graphql
                schema:
                  file: products.graphql
              reviews:
                routing_url: http://localhost:4003/graphql
                schema:
                  file: reviews.graphql
            "#,
        )
        .unwrap();
        assert_eq!(config.subgraphs.len(), 2);
        assert_eq!(
            config.subgraphs["products"].routing_url,
            "http://localhost:4001/graphql"
        );
        assert_eq!(config.subgraphs["reviews"].schema.file, "reviews.graphql");
    }

    #[tokio::test]
    async fn planning_failures_reject_the_operation_with_no_data() {
        let gateway = gateway();
        gateway
            .register_subgraph(SubgraphConfig {
                name: "products".to_string(),
                url: "http://products.internal/graphql".to_string(),
                schema: r#"
                type Query { products: [Product!]! }
                type Product @key(fields: "id") { id: ID! name: String! }
                "#
                .to_string(),
            })
            .await
            .unwrap();

        let response = gateway
            .process_request(GraphQLRequest {
                query: "{ products { id flavor } }".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(response.data, Some(serde_json::Value::Null));
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].extensions.as_ref().unwrap()["code"],
            "PLANNING_FAILED"
        );
    }

    #[tokio::test]
    async fn malformed_operations_are_rejected() {
        let gateway = gateway();
        gateway
            .register_subgraph(SubgraphConfig {
                name: "products".to_string(),
                url: "http://products.internal/graphql".to_string(),
                schema: "type Query { ping: String }".to_string(),
            })
            .await
            .unwrap();
        let response = gateway
            .process_request(GraphQLRequest {
                query: "{ products {".to_string(),
                ..Default::default()
            })
            .await;
        assert_eq!(response.data, Some(serde_json::Value::Null));
        assert!(!response.errors.is_empty());
    }
}
