use super::api::Api;
use super::request::*;
use crate::error::Error;
use crate::query::Filter;
use actix_cors::Cors;
use actix_web::App;
use actix_web::HttpResponse;
use actix_web::HttpServer;
use actix_web::Responder;
use actix_web::middleware::Logger;
use actix_web::web;

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            Error::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::UnknownToken(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "detail": self.to_string() }))
    }
}

/// the server holds the api behind an Option so a missing snapshot degrades
/// every endpoint to 503 instead of refusing to boot
pub struct AppState {
    pub api: Option<Api>,
}

impl AppState {
    fn api(&self) -> Result<&Api, Error> {
        self.api.as_ref().ok_or(Error::EngineUnavailable)
    }
}

pub struct Server;

impl Server {
    pub async fn run(state: AppState, bind: &str) -> Result<(), std::io::Error> {
        let state = web::Data::new(state);
        log::info!("starting HTTP server on {}", bind);
        HttpServer::new(move || {
            App::new()
                .wrap(Logger::new("%r %s %Ts"))
                .wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allow_any_method()
                        .allow_any_header(),
                )
                .app_data(state.clone())
                .route("/stats", web::get().to(stats))
                .route("/search", web::get().to(search))
                .route("/search-index", web::get().to(search_index))
                .route("/item-filters", web::get().to(item_filters))
                .route("/graph", web::get().to(graph))
                .route("/clusters", web::get().to(clusters))
                .route("/cluster-playbook", web::get().to(cluster_playbook))
                .route("/token-playbook", web::get().to(token_playbook))
                .route("/unit-items", web::get().to(unit_items))
                .route("/unit-build", web::get().to(unit_build))
                .route("/item-necessity", web::get().to(item_necessity))
        })
        .workers(num_cpus::get().max(2))
        .bind(bind)?
        .run()
        .await
    }
}

// Route handlers

async fn stats(state: web::Data<AppState>) -> Result<impl Responder, Error> {
    Ok(HttpResponse::Ok().json(state.api()?.stats()))
}

async fn search(
    state: web::Data<AppState>,
    req: web::Query<SearchQuery>,
) -> Result<impl Responder, Error> {
    Ok(HttpResponse::Ok().json(state.api()?.search(&req.q)))
}

async fn search_index(state: web::Data<AppState>) -> Result<impl Responder, Error> {
    Ok(HttpResponse::Ok().json(state.api()?.search_index()))
}

async fn item_filters(state: web::Data<AppState>) -> Result<impl Responder, Error> {
    Ok(HttpResponse::Ok().json(state.api()?.item_filters()))
}

async fn graph(
    state: web::Data<AppState>,
    req: web::Query<GraphQuery>,
) -> Result<impl Responder, Error> {
    let api = state.api()?;
    let filter = Filter::parse(&req.tokens);
    let opts = req.options()?;
    Ok(HttpResponse::Ok().json(api.graph(&filter, &opts)))
}

async fn clusters(
    state: web::Data<AppState>,
    req: web::Query<ClustersQuery>,
) -> Result<impl Responder, Error> {
    let api = state.api()?;
    let filter = Filter::parse(&req.tokens);
    let params = req.params()?;
    Ok(HttpResponse::Ok().json(api.clusters(&filter, &params)))
}

async fn cluster_playbook(
    state: web::Data<AppState>,
    req: web::Query<ClusterPlaybookQuery>,
) -> Result<impl Responder, Error> {
    let api = state.api()?;
    let filter = Filter::parse(&req.tokens);
    let params = req.params()?;
    let opts = req.playbook();
    Ok(HttpResponse::Ok().json(api.cluster_playbook(&filter, &params, req.cluster_id, &opts)))
}

async fn token_playbook(
    state: web::Data<AppState>,
    req: web::Query<TokenPlaybookQuery>,
) -> Result<impl Responder, Error> {
    let api = state.api()?;
    let filter = Filter::parse(&req.tokens);
    let opts = req.playbook();
    Ok(HttpResponse::Ok().json(api.token_playbook(&filter, &opts)))
}

async fn unit_items(
    state: web::Data<AppState>,
    req: web::Query<UnitItemsQuery>,
) -> Result<impl Responder, Error> {
    let api = state.api()?;
    let filter = Filter::parse(&req.tokens);
    let opts = req.options()?;
    Ok(HttpResponse::Ok().json(api.unit_items(&req.unit, &filter, &opts)?))
}

async fn unit_build(
    state: web::Data<AppState>,
    req: web::Query<UnitBuildQuery>,
) -> Result<impl Responder, Error> {
    let api = state.api()?;
    let filter = Filter::parse(&req.tokens);
    let opts = req.options();
    Ok(HttpResponse::Ok().json(api.unit_build(&req.unit, &filter, &opts)?))
}

async fn item_necessity(
    state: web::Data<AppState>,
    req: web::Query<NecessityQuery>,
) -> Result<impl Responder, Error> {
    let api = state.api()?;
    let filter = Filter::parse(&req.tokens);
    let opts = req.options()?;
    Ok(HttpResponse::Ok().json(api.item_necessity(&req.unit, &req.item, &filter, &opts)?))
}
