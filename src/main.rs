use actix_web::web;
use env_logger::Env;
use log::error;
use structopt::StructOpt;

use lesion_classifier::app;
use lesion_classifier::config::Settings;
use lesion_classifier::error::error_chain;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = Settings::from_args();

    let pipeline = match app::bootstrap(&settings).await {
        Ok(pipeline) => web::Data::new(pipeline),
        Err(e) => {
            error!("Startup failed: {}", error_chain(&e));
            std::process::exit(1);
        }
    };

    app::server(&settings, pipeline)?.await
}
