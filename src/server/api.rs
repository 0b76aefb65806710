use crate::stream::{ SessionHandler, SessionRequest };
use std::error::Error;
use std::net::SocketAddr;
use axum::{
    routing::get,
    Router,
    body::Body,
    extract::{ RawQuery, State },
    response::{ IntoResponse, Response },
    http::{ header, StatusCode },
};
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

pub struct TlsPaths {
    pub cert_path: String,
    pub key_path: String,
}

pub fn router(handler: SessionHandler) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/generate", get(generate_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(handler)
}

pub async fn start_http_server(
    addr: &str,
    handler: SessionHandler,
    tls: Option<TlsPaths>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    let app = router(handler);

    if let Some(tls) = tls {
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            &tls.cert_path,
            &tls.key_path
        ).await?;

        info!("Starting HTTPS server on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            e
        })?;
        info!("Starting HTTP server on: http://{}", addr);
        axum::serve(listener, app.into_make_service()).await?;
    }

    Ok(())
}

async fn generate_handler(
    State(handler): State<SessionHandler>,
    RawQuery(query): RawQuery,
) -> Response {
    let request = SessionRequest::from_query(query.as_deref());
    let body = Body::from_stream(handler.open(request));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|e| {
            error!("Failed to build event stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

async fn health_handler() -> &'static str {
    "ok"
}
