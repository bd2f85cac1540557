use crate::boundary::{BoundaryError, BoundaryProvider, BoundarySet};
use crate::aggregate::Summary;
use crate::error::Error;
use crate::export::{region_file_stem, wkt_file_stem, OutputFormat};
use crate::pipeline::{RetrieveRequest, Retrieval, Retriever};
use crate::record::DataType;
use crate::region::Region;
use actix_web::dev::{Server, Service as _};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, App, HttpResponse, HttpResponseBuilder, HttpServer, ResponseError};
use futures_util::future::FutureExt;
use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};
use serde::{Deserialize, Serialize};
use std::net::TcpListener;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_actix_web::TracingLogger;

lazy_static! {
    static ref RESPONSE_CODE_COLLECTOR: IntCounterVec = register_int_counter_vec!(
        Opts::new("http_requests_total", "Total Requests"),
        &["code", "method", "route"],
    )
    .unwrap();
    static ref RESPONSE_TIME_COLLECTOR: HistogramVec = register_histogram_vec!(
        HistogramOpts::new("http_request_duration_seconds", "Response Times"),
        &["code", "method", "route"]
    )
    .unwrap();
}

const FAILED_CELLS_HEADER: &str = "X-Failed-Cells";
const FAILED_TOKENS_HEADER: &str = "X-Failed-Tokens";

pub struct ServiceConfig {
    pub retriever: Retriever,
    pub boundaries: Option<BoundarySet>,
    pub listener: TcpListener,
}

struct AppState {
    retriever: Retriever,
    boundaries: Option<BoundarySet>,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveBody {
    /// Boundary code or name, e.g. `"KEN"` or `"KEN (Kenya)"`.
    pub region: Option<String>,
    /// A POLYGON or MULTIPOLYGON, takes precedence over `region`.
    pub wkt: Option<String>,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Retrieval(#[from] Error),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Retrieval(e) => match e {
                Error::InvalidRegion(_) | Error::Covering(_) => StatusCode::BAD_REQUEST,
                Error::Boundary(BoundaryError::NotFound(_)) => StatusCode::NOT_FOUND,
                Error::Boundary(BoundaryError::Ambiguous { .. }) => StatusCode::BAD_REQUEST,
                Error::Boundary(BoundaryError::Network(_)) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

fn resolve_region(
    body: &RetrieveBody,
    boundaries: Option<&BoundarySet>,
) -> Result<(Region, String), ServiceError> {
    if let Some(wkt) = body.wkt.as_deref().filter(|wkt| !wkt.trim().is_empty()) {
        let region = Region::from_wkt(wkt).map_err(Error::from)?;
        return Ok((region, wkt_file_stem(body.data_type)));
    }
    let query = match body.region.as_deref().filter(|region| !region.trim().is_empty()) {
        Some(query) => query,
        None => {
            return Err(ServiceError::BadRequest(
                "select a region or pass a wkt polygon".into(),
            ))
        }
    };
    let boundaries = boundaries
        .ok_or_else(|| ServiceError::BadRequest("no boundary source is configured".into()))?;
    let named = boundaries.lookup(query).map_err(Error::from)?;
    let stem = region_file_stem(body.data_type, boundaries.source_name(), &named.code);
    Ok((named.region, stem))
}

fn with_failures(mut builder: HttpResponseBuilder, summary: &Summary) -> HttpResponseBuilder {
    builder.insert_header((FAILED_CELLS_HEADER, summary.failed().to_string()));
    if summary.failed() > 0 {
        builder.insert_header((FAILED_TOKENS_HEADER, summary.failed_tokens().join(",")));
    }
    builder
}

#[post("/retrieve")]
async fn retrieve(
    body: web::Json<RetrieveBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServiceError> {
    let body = body.into_inner();
    let (region, name) = resolve_region(&body, state.boundaries.as_ref())?;
    let request = RetrieveRequest {
        region,
        data_type: body.data_type,
        format: body.format,
        name,
    };

    // the guard fires when a disconnecting client drops this future
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let retrieval = state.retriever.retrieve(request, &cancel).await?;
    let response = match retrieval {
        Retrieval::Exported { artifact, summary } => with_failures(HttpResponse::Ok(), &summary)
            .content_type(artifact.content_type)
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", artifact.filename),
            ))
            .body(artifact.bytes),
        Retrieval::NoData(summary) => with_failures(HttpResponse::NoContent(), &summary).finish(),
        Retrieval::Failed(summary) => with_failures(HttpResponse::BadGateway(), &summary).json(
            ErrorResponse {
                error: format!(
                    "no buildings retrieved, {} cells failed",
                    summary.failed()
                ),
            },
        ),
        Retrieval::Cancelled(_) => HttpResponse::ServiceUnavailable().finish(),
    };
    Ok(response)
}

#[derive(Serialize)]
struct RegionsResponse {
    source: Option<String>,
    regions: Vec<String>,
}

#[get("/regions")]
async fn regions(state: web::Data<AppState>) -> web::Json<RegionsResponse> {
    let response = match &state.boundaries {
        Some(boundaries) => RegionsResponse {
            source: Some(boundaries.source_name().to_string()),
            regions: boundaries.labels(),
        },
        None => RegionsResponse {
            source: None,
            regions: vec![],
        },
    };
    web::Json(response)
}

#[get("/health")]
async fn health() -> &'static str {
    "Ok"
}

#[get("/metrics")]
async fn metrics() -> Result<String, actix_web::Error> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(actix_web::error::ErrorInternalServerError)
}

fn track_metrics(code: u16, method: &str, route: &str, time: f64) {
    // unknown paths would blow up label cardinality
    if route != "/retrieve" && route != "/regions" && route != "/health" {
        return;
    }

    let normalized_code = match code {
        200..=299 => "2XX",
        300..=399 => "3XX",
        400..=499 => "4XX",
        500..=599 => "5XX",
        _ => "invalid",
    };

    RESPONSE_CODE_COLLECTOR
        .with_label_values(&[normalized_code, method, route])
        .inc();

    RESPONSE_TIME_COLLECTOR
        .with_label_values(&[normalized_code, method, route])
        .observe(time);
}

pub fn run_service(config: ServiceConfig) -> Result<Server, std::io::Error> {
    let ServiceConfig {
        retriever,
        boundaries,
        listener,
    } = config;
    info!(
        address = %listener.local_addr()?,
        boundaries = boundaries.as_ref().map_or(0, BoundarySet::len),
        "starting service"
    );
    let state = web::Data::new(AppState {
        retriever,
        boundaries,
    });

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .wrap_fn(|req, srv| {
                let path = String::from(req.path());
                let method = String::from(req.method().as_str());
                let offset = OffsetDateTime::now_utc();
                srv.call(req).map(move |res| {
                    let time = OffsetDateTime::now_utc() - offset;
                    if let Ok(ref res) = res {
                        let status = res.response().status();
                        track_metrics(status.into(), &method, &path, time.as_seconds_f64());
                    }
                    res
                })
            })
            .service(health)
            .service(metrics)
            .service(regions)
            .service(retrieve)
    })
    .listen(listener)?
    .run();
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::Boundary;
    use crate::pipeline::PipelineConfig;
    use crate::shard::DirShardStore;
    use actix_web::test;
    use geo::polygon;
    use std::sync::Arc;

    fn state(boundaries: Option<BoundarySet>) -> web::Data<AppState> {
        let store = Arc::new(DirShardStore::new("/nonexistent"));
        web::Data::new(AppState {
            retriever: Retriever::new(store, PipelineConfig::default()),
            boundaries,
        })
    }

    fn squareland() -> BoundarySet {
        let mp = polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]
        .into();
        let boundary = Boundary::new(mp, Some("SQL"), "Squareland", 2).unwrap();
        BoundarySet::new("ne_110m", vec![boundary])
    }

    #[actix_web::test]
    async fn health_check() {
        let app = test::init_service(App::new().service(health)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn lists_regions() {
        let app = test::init_service(
            App::new()
                .app_data(state(Some(squareland())))
                .service(regions),
        )
        .await;
        let req = test::TestRequest::get().uri("/regions").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(
            body,
            web::Bytes::from_static(br#"{"source":"ne_110m","regions":["SQL (Squareland)"]}"#)
        );
    }

    #[actix_web::test]
    async fn rejects_requests_without_region() {
        let app = test::init_service(App::new().app_data(state(None)).service(retrieve)).await;
        let req = test::TestRequest::post()
            .uri("/retrieve")
            .set_json(serde_json::json!({ "data_type": "points" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/retrieve")
            .set_json(serde_json::json!({ "wkt": "POINT(1 2)" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn unknown_regions_are_not_found() {
        let app = test::init_service(
            App::new()
                .app_data(state(Some(squareland())))
                .service(retrieve),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/retrieve")
            .set_json(serde_json::json!({ "region": "Atlantis" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn named_regions_without_data_are_no_content() {
        let app = test::init_service(
            App::new()
                .app_data(state(Some(squareland())))
                .service(retrieve),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/retrieve")
            .set_json(serde_json::json!({ "region": "SQL (Squareland)", "format": "shapefile" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(resp.headers().get(FAILED_CELLS_HEADER).unwrap(), "0");
    }
}
