use junction::GraphQLRequest;
use junction::federation_gateway::FederationGateway;
use junction::query_executor::{ExecutorConfig, HttpQueryExecutor};
use junction::query_planner::FederatedQueryPlanner;
use junction::response::{GraphQLError, GraphQLResponse};
use junction::schema_registry::InMemorySchemaRegistry;

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "junction", about = "Federated GraphQL gateway")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:4000")]
    listen: SocketAddr,

    /// Path to the supergraph configuration file.
    #[arg(long, default_value = "./schemas/supergraph.yaml")]
    config: PathBuf,

    /// Deadline for a whole client operation, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    request_timeout_ms: u64,

    /// Deadline for each individual subgraph fetch, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    subgraph_timeout_ms: u64,
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - Junction Federation Gateway</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    const token = localStorage.getItem('auth_token') || '';

    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: {
          'Content-Type': 'application/json',
          'Authorization': token ? `Bearer ${token}` : '',
        },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(full("Internal Server Error"))
        .unwrap()
}

fn json_response(response: &GraphQLResponse) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = serde_json::to_string(response).unwrap_or_else(|_| {
        serde_json::to_string(&GraphQLResponse::from_error(GraphQLError::new(
            "failed to serialize response",
        )))
        .unwrap_or_default()
    });
    Response::builder()
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

fn extract_auth_headers(req: &Request<Incoming>) -> Option<HashMap<String, String>> {
    let mut auth_headers = HashMap::new();

    for header_name in ["Authorization", "x-api-key", "x-token"] {
        if let Some(header_value) = req.headers().get(header_name) {
            if let Ok(value) = header_value.to_str() {
                auth_headers.insert(header_name.to_string(), value.to_string());
            }
        }
    }

    if auth_headers.is_empty() {
        None
    } else {
        Some(auth_headers)
    }
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let auth_headers = extract_auth_headers(&req);

    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => {
                    return Ok(Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body(full("Failed to read request body"))
                        .unwrap_or_else(|_| internal_server_error()));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(mut graphql_request) => {
                    graphql_request.auth_headers = auth_headers;
                    let response = gateway.process_request(graphql_request).await;
                    // 200 even for partial errors, per GraphQL convention.
                    json_response(&response)
                }
                Err(e) => Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .header("Access-Control-Allow-Origin", "*")
                    .body(full(format!("Invalid JSON request: {}", e)))
                    .unwrap_or_else(|_| internal_server_error()),
            }
        }

        (&Method::GET, "/graphiql") => Response::builder()
            .header("Content-Type", "text/html")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(GRAPHIQL_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", "/graphiql")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization",
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Access-Control-Allow-Origin", "*")
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(result)
}

#[derive(Clone)]
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let executor = HttpQueryExecutor::with_config(ExecutorConfig {
        request_timeout: Duration::from_millis(args.request_timeout_ms),
        subgraph_timeout: Duration::from_millis(args.subgraph_timeout_ms),
        ..ExecutorConfig::default()
    });

    let gateway = Arc::new(FederationGateway::new(
        Box::new(InMemorySchemaRegistry::new()),
        Box::new(FederatedQueryPlanner::new()),
        Box::new(executor),
    ));

    if let Err(e) = gateway.load_schemas(&args.config).await {
        error!(config = %args.config.display(), %e, "failed to load subgraph schemas");
        return Err(e.into());
    }

    let listener = TcpListener::bind(args.listen).await?;
    info!("GraphQL federation gateway listening on http://{}", args.listen);
    info!("GraphiQL UI available at http://{}/graphiql", args.listen);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let gateway_clone = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway_clone.clone();
                handle_request(req, gateway)
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                .serve_connection(io, service)
                .await
            {
                warn!("error processing connection: {}", e);
            }
        });
    }
}
