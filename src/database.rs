use mongodb::{bson::doc, Client, Database};
use tracing::info;

use crate::repository::{RepositoryError, RepositoryResult};

/// Connects to `uri` and checks the server answers before handing out the
/// database handle.
pub async fn connect(uri: &str, name: &str) -> RepositoryResult<Database> {
    let client = Client::with_uri_str(uri)
        .await
        .map_err(|error| RepositoryError::Connection(error.to_string()))?;
    let db = client.database(name);

    db.run_command(doc! { "ping": 1 }, None)
        .await
        .map_err(|error| RepositoryError::Connection(error.to_string()))?;

    info!(database = name, "connected to MongoDB");
    Ok(db)
}
