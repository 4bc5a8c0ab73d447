use crate::app::{App, AppError};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

pub fn router(app: Arc<App>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/analyze_invoices", post(analyze_invoices))
        .route("/chatbot", post(chatbot))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(app: Arc<App>) -> anyhow::Result<()> {
    let listen_addr = app.config().server.listen_addr.clone();
    let router = router(app);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(app: App) -> anyhow::Result<()> {
    // the blocking HTTP client inside App must not be dropped on the runtime
    let app = Arc::new(app);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(app.clone()))
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            AppError::BadRequest(_) | AppError::Extract(_) => {
                log::warn!("{}", self.0);
                axum::http::StatusCode::BAD_REQUEST
            }
            AppError::Store(_) | AppError::Llm(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(json!({"success": false, "error": self.0.to_string()})),
        )
            .into_response()
    }
}

// Lets handlers use `?` on anything that converts into `AppError`.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn bad_request(err: impl ToString) -> AppError {
    AppError::BadRequest(err.to_string())
}

/// Run blocking app work off the async executor.
async fn run_blocking<T, F>(app: Arc<App>, f: F) -> Result<T, HttpError>
where
    T: Send + 'static,
    F: FnOnce(&App) -> Result<T, AppError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || f(&app))
        .await
        .map_err(|err| AppError::Other(err.into()))?;
    Ok(result?)
}

async fn analyze_invoices(
    State(state): State<Arc<SharedState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, HttpError> {
    let mut policy_pdf = None;
    let mut invoices_zip = None;
    let mut employee_name = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "policy_pdf" => policy_pdf = Some(field.bytes().await.map_err(bad_request)?),
            "invoices_zip" => invoices_zip = Some(field.bytes().await.map_err(bad_request)?),
            "employee_name" => employee_name = Some(field.text().await.map_err(bad_request)?),
            other => log::debug!("ignoring multipart field {other:?}"),
        }
    }

    let policy_pdf = policy_pdf.ok_or_else(|| bad_request("Missing field: policy_pdf"))?;
    let invoices_zip = invoices_zip.ok_or_else(|| bad_request("Missing field: invoices_zip"))?;
    let employee_name = employee_name.ok_or_else(|| bad_request("Missing field: employee_name"))?;

    log::debug!(
        "analyze request: employee={employee_name:?} policy={}B invoices={}B",
        policy_pdf.len(),
        invoices_zip.len()
    );

    let report = run_blocking(state.app.clone(), move |app| {
        app.analyze_invoices(&policy_pdf, &invoices_zip, &employee_name, None)
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "analyses": report.analyses,
        "stored": report.stored,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

async fn chatbot(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<Value>, HttpError> {
    log::debug!("payload: {payload:?}");

    let response = run_blocking(state.app.clone(), move |app| app.chat(&payload.message)).await?;

    Ok(Json(json!({"success": true, "response": response})))
}

async fn health(State(state): State<Arc<SharedState>>) -> Result<Json<Value>, HttpError> {
    let indexed = state.app.store().len()?;
    Ok(Json(json!({"status": "ok", "indexed": indexed})))
}
