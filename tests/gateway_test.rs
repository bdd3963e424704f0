use junction::error::ExecutionError;
use junction::federation_gateway::FederationGateway;
use junction::query_executor::{ExecutorConfig, ExecutorHook, HttpQueryExecutor};
use junction::query_planner::FederatedQueryPlanner;
use junction::schema_registry::InMemorySchemaRegistry;
use junction::{GraphQLRequest, SubgraphConfig};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCTS_SDL: &str = r#"
type Query { products: [Product!]! }
type Mutation { createProduct(name: String!): Product! }
type Product @key(fields: "id") {
    id: ID!
    name: String!
}
"#;

const USERS_SDL: &str = r#"
type Query { users: [User!]! }
type User @key(fields: "id") {
    id: ID!
    username: String!
}
"#;

const REVIEWS_SDL: &str = r#"
type Query { reviews: [Review!]! }
type Review { id: ID! rating: Int! }
type Product @key(fields: "id") {
    id: ID!
    reviews: [Review!]!
}
"#;

async fn gateway_for(subgraphs: &[(&str, &str, String)], config: ExecutorConfig) -> FederationGateway {
    let gateway = FederationGateway::new(
        Box::new(InMemorySchemaRegistry::new()),
        Box::new(FederatedQueryPlanner::new()),
        Box::new(HttpQueryExecutor::with_config(config)),
    );
    for (name, sdl, url) in subgraphs {
        gateway
            .register_subgraph(SubgraphConfig {
                name: name.to_string(),
                url: url.clone(),
                schema: sdl.to_string(),
            })
            .await
            .unwrap();
    }
    gateway
}

fn request(query: &str) -> GraphQLRequest {
    GraphQLRequest {
        query: query.to_string(),
        ..Default::default()
    }
}

fn error_code(error: &junction::GraphQLError) -> &str {
    error
        .extensions
        .as_ref()
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

#[tokio::test]
async fn products_and_reviews_stitch_into_one_response() {
    let products = MockServer::start().await;
    let reviews = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({
            "query": "query { products { id name __typename } }"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": [
                {"id": "1", "name": "Table", "__typename": "Product"},
                {"id": "2", "name": "Couch", "__typename": "Product"},
            ]}
        })))
        .expect(1)
        .mount(&products)
        .await;

    // The entity fetch must carry one representation per product, in
    // order.
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({
            "variables": {"representations": [
                {"__typename": "Product", "id": "1"},
                {"__typename": "Product", "id": "2"},
            ]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"_entities": [
                {"reviews": [{"rating": 5}, {"rating": 4}]},
                {"reviews": [{"rating": 2}]},
            ]}
        })))
        .expect(1)
        .mount(&reviews)
        .await;

    let gateway = gateway_for(
        &[
            ("products", PRODUCTS_SDL, products.uri()),
            ("reviews", REVIEWS_SDL, reviews.uri()),
        ],
        ExecutorConfig::default(),
    )
    .await;

    let response = gateway
        .process_request(request("{ products { id name reviews { rating } } }"))
        .await;

    assert!(response.errors.is_empty(), "unexpected errors: {:?}", response.errors);
    // Field order follows the query, and the injected __typename is
    // stripped.
    assert_eq!(
        serde_json::to_string(&response.data.unwrap()).unwrap(),
        r#"{"products":[{"id":"1","name":"Table","reviews":[{"rating":5},{"rating":4}]},{"id":"2","name":"Couch","reviews":[{"rating":2}]}]}"#
    );
}

#[tokio::test]
async fn one_failing_subgraph_does_not_discard_sibling_data() {
    let products = MockServer::start().await;
    let users = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": [{"id": "1", "name": "Table"}]}
        })))
        .mount(&products)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&users)
        .await;

    let gateway = gateway_for(
        &[
            ("products", PRODUCTS_SDL, products.uri()),
            ("users", USERS_SDL, users.uri()),
        ],
        ExecutorConfig::default(),
    )
    .await;

    let response = gateway
        .process_request(request("{ products { id name } users { id username } }"))
        .await;

    let data = response.data.unwrap();
    assert_eq!(data["products"], json!([{"id": "1", "name": "Table"}]));
    assert_eq!(data["users"], Value::Null);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path, Some(json!(["users"])));
    assert_eq!(error_code(&response.errors[0]), "SUBGRAPH_HTTP_ERROR");
}

#[tokio::test]
async fn slow_subgraph_times_out_at_its_own_deadline() {
    let products = MockServer::start().await;
    let users = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": [{"id": "1", "name": "Table"}]}
        })))
        .mount(&products)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"users": []}}))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&users)
        .await;

    let gateway = gateway_for(
        &[
            ("products", PRODUCTS_SDL, products.uri()),
            ("users", USERS_SDL, users.uri()),
        ],
        ExecutorConfig {
            subgraph_timeout: Duration::from_millis(50),
            ..ExecutorConfig::default()
        },
    )
    .await;

    let response = gateway
        .process_request(request("{ products { id } users { id } }"))
        .await;

    let data = response.data.unwrap();
    assert_eq!(data["products"], json!([{"id": "1"}]));
    assert_eq!(data["users"], Value::Null);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path, Some(json!(["users"])));
    assert_eq!(error_code(&response.errors[0]), "FETCH_TIMEOUT");
}

#[tokio::test]
async fn global_deadline_cancels_all_outstanding_fetches() {
    let products = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"products": []}}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&products)
        .await;

    let gateway = gateway_for(
        &[("products", PRODUCTS_SDL, products.uri())],
        ExecutorConfig {
            subgraph_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_millis(50),
            ..ExecutorConfig::default()
        },
    )
    .await;

    let response = gateway.process_request(request("{ products { id } }")).await;
    assert_eq!(response.data.unwrap()["products"], Value::Null);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(error_code(&response.errors[0]), "REQUEST_DEADLINE_EXCEEDED");
}

#[tokio::test]
async fn exhausted_subgraph_pool_surfaces_a_resource_error() {
    let products = MockServer::start().await;

    // A connection slot never frees up, so the fetch must fail without
    // reaching the subgraph.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": []}
        })))
        .expect(0)
        .mount(&products)
        .await;

    let gateway = gateway_for(
        &[("products", PRODUCTS_SDL, products.uri())],
        ExecutorConfig {
            subgraph_timeout: Duration::from_millis(50),
            max_concurrent_per_subgraph: 0,
            ..ExecutorConfig::default()
        },
    )
    .await;

    let response = gateway.process_request(request("{ products { id } }")).await;
    assert_eq!(response.data.unwrap()["products"], Value::Null);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path, Some(json!(["products"])));
    assert_eq!(error_code(&response.errors[0]), "RESOURCE_EXHAUSTED");
}

#[tokio::test]
async fn transient_failures_on_reads_are_retried_once() {
    let products = MockServer::start().await;

    // First call fails with a 5xx, the retry succeeds.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&products)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": [{"id": "1"}]}
        })))
        .mount(&products)
        .await;

    let gateway = gateway_for(
        &[("products", PRODUCTS_SDL, products.uri())],
        ExecutorConfig::default(),
    )
    .await;

    let response = gateway.process_request(request("{ products { id } }")).await;
    assert!(response.errors.is_empty());
    assert_eq!(response.data.unwrap()["products"], json!([{"id": "1"}]));
}

#[tokio::test]
async fn mutations_are_never_retried() {
    let products = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&products)
        .await;
    // A retry would hit this and succeed; mutations must not.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"createProduct": {"id": "9"}}
        })))
        .mount(&products)
        .await;

    let gateway = gateway_for(
        &[("products", PRODUCTS_SDL, products.uri())],
        ExecutorConfig::default(),
    )
    .await;

    let response = gateway
        .process_request(request("mutation { createProduct(name: \"Lamp\") { id } }"))
        .await;
    assert_eq!(response.data.unwrap()["createProduct"], Value::Null);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(error_code(&response.errors[0]), "SUBGRAPH_HTTP_ERROR");
}

#[tokio::test]
async fn failed_parent_fetch_skips_the_dependent_entity_fetch() {
    let products = MockServer::start().await;
    let reviews = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&products)
        .await;
    // Must never be called: its key inputs are gone.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"_entities": []}
        })))
        .expect(0)
        .mount(&reviews)
        .await;

    let gateway = gateway_for(
        &[
            ("products", PRODUCTS_SDL, products.uri()),
            ("reviews", REVIEWS_SDL, reviews.uri()),
        ],
        ExecutorConfig::default(),
    )
    .await;

    let response = gateway
        .process_request(request("{ products { id reviews { rating } } }"))
        .await;
    assert_eq!(response.data.unwrap()["products"], Value::Null);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path, Some(json!(["products"])));
}

#[tokio::test]
async fn auth_headers_are_forwarded_to_subgraphs() {
    let products = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer sesame"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": []}
        })))
        .expect(1)
        .mount(&products)
        .await;

    let gateway = gateway_for(
        &[("products", PRODUCTS_SDL, products.uri())],
        ExecutorConfig::default(),
    )
    .await;

    let mut req = request("{ products { id } }");
    req.auth_headers = Some(HashMap::from([(
        "Authorization".to_string(),
        "Bearer sesame".to_string(),
    )]));
    let response = gateway.process_request(req).await;
    assert!(response.errors.is_empty());
}

struct RecordingHook {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ExecutorHook for RecordingHook {
    async fn before_dispatch(&self, subgraph: &str, _url: &str, _body: &Value) {
        self.calls.lock().unwrap().push(format!("before:{subgraph}"));
    }

    async fn after_response(&self, subgraph: &str, _envelope: &Value) {
        self.calls.lock().unwrap().push(format!("after:{subgraph}"));
    }

    async fn on_failure(&self, subgraph: &str, _error: &ExecutionError) {
        self.calls.lock().unwrap().push(format!("failure:{subgraph}"));
    }
}

#[tokio::test]
async fn hooks_observe_successful_and_failed_fetches() {
    let products = MockServer::start().await;
    let users = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": []}
        })))
        .mount(&products)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&users)
        .await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut executor = HttpQueryExecutor::new();
    executor.add_hook(Arc::new(RecordingHook {
        calls: Arc::clone(&calls),
    }));
    let gateway = FederationGateway::new(
        Box::new(InMemorySchemaRegistry::new()),
        Box::new(FederatedQueryPlanner::new()),
        Box::new(executor),
    );
    for (name, sdl, url) in [
        ("products", PRODUCTS_SDL, products.uri()),
        ("users", USERS_SDL, users.uri()),
    ] {
        gateway
            .register_subgraph(SubgraphConfig {
                name: name.to_string(),
                url,
                schema: sdl.to_string(),
            })
            .await
            .unwrap();
    }

    let response = gateway
        .process_request(request("{ products { id } users { id } }"))
        .await;
    assert_eq!(response.errors.len(), 1);

    let recorded = calls.lock().unwrap().clone();
    // Per subgraph, dispatch precedes the outcome callback.
    let position = |event: &str| recorded.iter().position(|c| c == event).unwrap();
    assert!(position("before:products") < position("after:products"));
    assert!(position("before:users") < position("failure:users"));

    let mut sorted = recorded;
    sorted.sort();
    assert_eq!(
        sorted,
        vec!["after:products", "before:products", "before:users", "failure:users"]
    );
}

#[tokio::test]
async fn subgraph_reported_errors_reach_the_client_tagged_with_the_service() {
    let products = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"products": [{"id": "1", "name": null}]},
            "errors": [{"message": "name unavailable", "path": ["products", 0, "name"]}],
        })))
        .mount(&products)
        .await;

    let gateway = gateway_for(
        &[("products", PRODUCTS_SDL, products.uri())],
        ExecutorConfig::default(),
    )
    .await;

    let response = gateway
        .process_request(request("{ products { id name } }"))
        .await;
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "name unavailable");
    assert_eq!(
        response.errors[0].extensions.as_ref().unwrap()["service"],
        json!("products")
    );
    assert_eq!(
        response.data.unwrap()["products"],
        json!([{"id": "1", "name": null}])
    );
}

#[tokio::test]
async fn variables_reach_only_the_subgraphs_that_use_them() {
    let products = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"variables": {"name": "Table"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"createProduct": {"id": "7", "name": "Table"}}
        })))
        .expect(1)
        .mount(&products)
        .await;

    let gateway = gateway_for(
        &[("products", PRODUCTS_SDL, products.uri())],
        ExecutorConfig::default(),
    )
    .await;

    let mut req = request("mutation Create($name: String!) { createProduct(name: $name) { id name } }");
    req.variables = Some(json!({"name": "Table", "extraneous": 1}));
    let response = gateway.process_request(req).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data.unwrap()["createProduct"],
        json!({"id": "7", "name": "Table"})
    );
}
