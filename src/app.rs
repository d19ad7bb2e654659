use std::sync::Arc;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{middleware, web, App, HttpServer};
use log::{error, info};
use reqwest::Client;

use crate::classifier::{Classifier, OnnxClassifier};
use crate::config::{Settings, StoreBackend};
use crate::error::StartupError;
use crate::handlers;
use crate::pipeline::PredictionPipeline;
use crate::store::{FirestoreStore, InMemoryStore, ResultStore};

/// Registers the service routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(handlers::predict)));
}

pub fn cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["POST", "OPTIONS"])
        .allow_any_header();

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return cors.allow_any_origin();
    }
    origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

/// Binds the listener and returns the server ready to be awaited. The
/// "running" line is only logged once the socket is actually bound.
pub fn server(
    settings: &Settings,
    pipeline: web::Data<PredictionPipeline>,
) -> std::io::Result<Server> {
    let origins = settings.origins();
    let (host, port) = settings.bind_address();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors(&origins))
            .wrap(middleware::Logger::default())
            .app_data(pipeline.clone())
            .configure(configure)
    })
    .bind((host.as_str(), port))
    .map_err(|e| {
        error!("Cannot bind {}:{}: {}", host, port, e);
        e
    })?;

    for addr in server.addrs() {
        info!("Server running at http://{}", addr);
    }
    Ok(server.run())
}

/// Loads the model, resolves credentials and builds the pipeline. Any error
/// here is fatal.
pub async fn bootstrap(settings: &Settings) -> Result<PredictionPipeline, StartupError> {
    settings.validate()?;

    info!("Loading model from {}", settings.model_source);
    let classifier: Arc<dyn Classifier> =
        Arc::new(OnnxClassifier::load(&settings.model_source).await?);

    let store = build_store(settings).await?;

    Ok(PredictionPipeline::new(classifier, store)
        .with_policy(settings.policy())
        .with_limits(settings.limits())
        .with_store_timeout(settings.store_timeout()))
}

async fn build_store(settings: &Settings) -> Result<Arc<dyn ResultStore>, StartupError> {
    match settings.store {
        StoreBackend::Memory => {
            info!("Using in-memory result store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Firestore => {
            let client = Client::builder()
                .timeout(settings.store_timeout())
                .build()
                .map_err(crate::error::StoreError::from)?;

            let provider = settings.credentials.provider(client.clone());
            let store = FirestoreStore::connect(
                client,
                settings.firestore_url.as_str(),
                settings.collection.as_str(),
                provider,
            )
            .await?;
            Ok(Arc::new(store))
        }
    }
}
