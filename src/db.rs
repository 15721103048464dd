pub mod models;
pub mod schema;
pub mod services;

use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_async_migrations::{embed_migrations, EmbeddedMigrations};
use rocket::fairing::AdHoc;

use crate::config::get_app_config;

/// The database pool stored in Rocket's managed state and handed to
/// `ChatDbService`.
pub type DbPool = Pool<AsyncPgConnection>;

static MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Fairing that sets up the Postgres pool and runs pending migrations.
pub fn setup_db() -> AdHoc {
    AdHoc::on_ignite("Database", |rocket| async {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(
            &get_app_config(&rocket).database_url,
        );
        let pool: DbPool = Pool::builder(config)
            .build()
            .expect("failed to build database pool");

        let mut conn = pool.get().await.expect("failed to connect to database");
        MIGRATIONS
            .run_pending_migrations(&mut conn)
            .await
            .expect("database migrations failed");
        drop(conn);
        tracing::info!("database migrations complete");

        rocket.manage(pool)
    })
}
