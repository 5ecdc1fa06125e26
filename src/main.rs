use std::{io, sync::Arc};

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    config::{Config, LogFormat, StoreBackend},
    middleware::RequestLogging,
    repository::{memory::MemoryIncidentRepository, mongo::MongoIncidentRepository, IncidentRepository},
    routes::AppState,
    storage::{local::LocalFileStore, FileStore},
};

mod config;
mod database;
mod error;
mod middleware;
mod models;
mod record_id;
mod repository;
mod routes;
mod storage;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn build_repository(config: &Config) -> io::Result<Arc<dyn IncidentRepository>> {
    match config.store {
        StoreBackend::Memory => {
            info!("using the in-memory incident store");
            Ok(Arc::new(MemoryIncidentRepository::default()))
        }
        StoreBackend::Mongo => {
            let db = database::connect(&config.mongodb_uri, &config.mongodb_database)
                .await
                .map_err(io::Error::other)?;
            let repository = MongoIncidentRepository::new(&db);
            repository
                .ensure_indexes()
                .await
                .map_err(io::Error::other)?;
            Ok(Arc::new(repository))
        }
    }
}

fn cors(config: &Config) -> Cors {
    let mut origins = config.allowed_origins().peekable();
    if origins.peek().is_none() {
        return Cors::permissive();
    }
    origins
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .expose_headers([middleware::REQUEST_ID_HEADER])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);

    let incidents = build_repository(&config).await?;
    let files: Arc<dyn FileStore> = Arc::new(
        LocalFileStore::new(&config.media_root, &config.media_url)
            .await
            .map_err(io::Error::other)?,
    );
    let state = web::Data::new(AppState::new(incidents, files));

    info!(
        host = %config.host,
        port = config.port,
        prefix = %config.api_prefix,
        "starting incident reporting server"
    );

    let server_config = config.clone();
    HttpServer::new(move || {
        let mut app = App::new()
            .wrap(cors(&server_config))
            .wrap(RequestLogging)
            .app_data(state.clone())
            .app_data(routes::json_config())
            .service(web::scope(&server_config.api_prefix).configure(routes::configure));
        if server_config.serves_media() {
            app = app.service(web::scope(&server_config.media_url).service(routes::get_media));
        }
        app
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
