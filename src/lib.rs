pub mod api;
pub mod buffer;
pub mod chat_record;
pub mod config;
pub mod db;
pub mod errors;
pub mod provider;
pub mod redis;
pub mod sentinel;
pub mod status;
pub mod stream;

use rocket::{fairing::AdHoc, get};

use crate::{
    config::{get_config_provider, AppConfig},
    db::setup_db,
    redis::setup_redis,
};

/// Build the rocket server, load configuration and routes, prepare for launch.
pub fn build_rocket() -> rocket::Rocket<rocket::Build> {
    rocket::custom(get_config_provider())
        .attach(AdHoc::config::<AppConfig>())
        .attach(setup_db())
        .attach(setup_redis())
        .mount("/", rocket::routes![health])
        .mount("/", api::chat_routes())
}

/// Health route.
#[get("/health")]
async fn health() -> &'static str {
    "OK"
}
