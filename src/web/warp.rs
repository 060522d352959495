use crate::web::error::ApiError;
use anyhow::Context;
use hyper::Server;
use serde::Serialize;
use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::task::Poll;
use tower::{Service, ServiceBuilder};
use tracing::debug_span;
use warp::http::header::CONTENT_TYPE;
use warp::http::{HeaderValue, Request, StatusCode};
use warp::hyper::Body;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply, reply};

const DEFAULT_PORT: &str = "8080";

/// Injects a cloneable value into a filter chain.
pub fn with_cloneable<C: Clone + Send>(
    value: C,
) -> impl Filter<Extract = (C,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

pub fn into_response<S: Serialize>(result: anyhow::Result<S>) -> Result<impl Reply, Rejection> {
    into_response_with_status(result.map(|data| (StatusCode::OK, data)))
}

pub fn into_response_with_status<S: Serialize>(
    response: anyhow::Result<(StatusCode, S)>,
) -> Result<impl Reply, Rejection> {
    let response = response.and_then(|(status_code, data)| {
        match serde_json::to_vec(&data).context("Failed to serialize data") {
            Ok(data) => Ok((status_code, data)),
            Err(err) => Err(err),
        }
    });

    match response {
        Ok((status, data)) => {
            let mut res = Response::new(data.into());
            *res.status_mut() = status;
            res.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Ok(res)
        }
        Err(err) => Err(into_rejection(err)),
    }
}

pub fn into_rejection(err: anyhow::Error) -> Rejection {
    match err.downcast_ref::<ApiError>() {
        Some(api_error) => api_error.clone().into(),
        None => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err)).into(),
    }
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(err) = err.find::<ApiError>() {
        Ok(reply::with_status(reply::json(&err), err.status))
    } else {
        Err(err)
    }
}

#[macro_export]
macro_rules! routes {
    [$route:expr] => {
        $route
    };
    [$route:expr, $($rest:expr),+] => {
        warp::Filter::or($route, routes![$($rest),+])
    };
}

/// The address to serve on. Cloud Foundry assigns the port through the `PORT`
/// environment variable; everything listens on all interfaces.
fn bind_address() -> anyhow::Result<SocketAddr> {
    let port = env::var("PORT").unwrap_or(DEFAULT_PORT.to_string());
    SocketAddr::from_str(&format!("0.0.0.0:{}", port))
        .with_context(|| format!("Failed to parse port '{}'", port))
}

/// Runs the HTTP server until the process is told to shut down
/// (CTRL-C/SIGHUP). Rejections carrying an [`ApiError`] are rendered as JSON
/// error bodies; every request passes through a tracing middleware recording
/// method, path and status.
pub async fn run_webserver<F>(routes: F) -> anyhow::Result<()>
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply,
    F::Error: Into<Rejection> + 'static,
{
    let bind_address = bind_address()?;

    tracing::info!("Starting server at {}", bind_address);

    let filter = routes.boxed().recover(handle_rejection);

    let svc = warp::service(filter);
    let traced_svc = ServiceBuilder::new()
        .layer_fn(|inner| TracingMiddleware { inner })
        .service(svc);

    let server = Server::try_bind(&bind_address)
        .with_context(|| format!("Failed to bind HTTP server to {}", bind_address))?
        .serve(hyper::service::make_service_fn(move |_| {
            let svc = traced_svc.clone();
            async move { Ok::<_, Infallible>(svc) }
        }));

    tracing::info!(
        "Running HTTP server at effective address {}",
        server.local_addr()
    );

    server
        .with_graceful_shutdown(crate::await_termination("web server"))
        .await
        .context("HTTP server failed")?;

    tracing::info!("HTTP Server has terminated...");

    Ok(())
}

#[derive(Clone)]
struct TracingMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingMiddleware<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let span = debug_span!(
            "http_request",
            app = crate::APP_NAME.as_str(),
            http.method = %method,
            http.url = %path,
            http.status_code = tracing::field::Empty,
        );

        let mut inner = self.inner.clone();

        let fut = async move {
            let _enter = span.enter();
            let response = inner.call(req).await?;
            let status = response.status();
            span.record("http.status_code", status.as_u16());
            Ok(response)
        };

        Box::pin(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_address_defaults_to_8080() {
        let addr = bind_address().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn into_response_renders_json() {
        let reply = into_response(Ok(json!({"ok": true}))).unwrap();
        let response = reply.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn into_response_maps_errors_to_rejections() {
        let result: anyhow::Result<serde_json::Value> = Err(anyhow::anyhow!("boom"));
        assert!(into_response(result).is_err());
    }

    #[tokio::test]
    async fn rejections_render_as_json_error_bodies() {
        let filter = warp::path!("fail")
            .and_then(|| async {
                Err::<String, Rejection>(into_rejection(anyhow::anyhow!("it broke")))
            })
            .recover(handle_rejection);

        let response = warp::test::request().path("/fail").reply(&filter).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["message"], "it broke");
    }

    #[tokio::test]
    async fn with_cloneable_injects_the_value() {
        let filter = warp::any()
            .and(with_cloneable("shared".to_string()))
            .map(|value: String| value);

        let response = warp::test::request().reply(&filter.clone()).await;
        assert_eq!(response.body(), "shared");
    }

    #[tokio::test]
    async fn routes_macro_combines_filters() {
        let a = warp::path!("a").map(|| "a");
        let b = warp::path!("b").map(|| "b");
        let c = warp::path!("c").map(|| "c");
        let combined = routes![a, b, c];

        let response = warp::test::request().path("/b").reply(&combined).await;
        assert_eq!(response.body(), "b");
    }
}
