use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::debug;

pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    debug!("Connecting to {}", database_url);
    let mut options = ConnectOptions::new(database_url.to_string());
    options.sqlx_logging(false);
    Database::connect(options).await
}

pub fn get_database_url(database_path: Option<&str>) -> String {
    match database_path {
        Some(path) if path == ":memory:" => "sqlite::memory:".to_string(),
        Some(path) => format!("sqlite://{}?mode=rwc", path),
        None => "sqlite://nesting.db?mode=rwc".to_string(),
    }
}
