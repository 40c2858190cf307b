use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use panel_optimizer::{
    CutStep, Issue, PanelInstance, PanelRequest, SawStats, Settings, SheetResult, StockSheetSpec,
    optimize,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Deserialize, Serialize)]
struct OptimizeRequest {
    panels: Vec<PanelRequest>,
    stock: Vec<StockSheetSpec>,
    #[serde(default)]
    settings: Settings,
    #[serde(default = "default_true")]
    include_cuts: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct OptimizeResponse {
    sheets: Vec<SheetResult>,
    unplaced: Vec<PanelInstance>,
    issues: Vec<Issue>,
    sheet_count: usize,
    efficiency: f64,
    waste_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cuts: Option<Vec<CutStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saw: Option<SawStats>,
}

async fn optimize_handler(
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    tracing::info!(
        body = serde_json::to_string(&req).unwrap_or_default(),
        "POST /optimize"
    );

    if req.stock.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "at least one stock sheet is required".to_string(),
        ));
    }

    // Packing is CPU-bound; keep it off the async workers
    let layout = tokio::task::spawn_blocking(move || {
        optimize(&req.panels, &req.stock, &req.settings, None).map(|l| (l, req.include_cuts))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let (layout, include_cuts) = layout.map_err(|e| {
        tracing::warn!(error = %e, "rejected optimize request");
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let (cuts, saw) = if include_cuts {
        let cuts = layout.cut_plan();
        let saw = panel_optimizer::saw_stats(&cuts);
        (Some(cuts), Some(saw))
    } else {
        (None, None)
    };

    let response = OptimizeResponse {
        sheet_count: layout.sheet_count(),
        efficiency: layout.total_efficiency(),
        waste_percent: layout.total_waste_percent(),
        sheets: layout.sheets,
        unplaced: layout.unplaced,
        issues: layout.issues,
        cuts,
        saw,
    };

    Ok(Json(response))
}

#[tokio::main]
async fn main() {
    let _sentry = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("development.log")
        .expect("failed to open development.log");

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_max_level(Level::INFO)
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("0.0.0.0:{port}");

    let app = Router::new()
        .route("/up", get(|| async { "ok" }))
        .route("/optimize", post(optimize_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    eprintln!("Listening on {addr}");
    axum::serve(listener, app).await.unwrap();
}
