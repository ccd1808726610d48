use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};

use crate::errors::Result;

pub async fn get_db_client(database_url: &str, database_name: &str) -> Database {
    let client = Client::with_uri_str(database_url)
        .await
        .expect("Failed to connect to MongoDB");

    let db = client.database(database_name);

    match db.list_collection_names().await {
        Ok(collections) => {
            tracing::info!("✅ Connected to database: {}", database_name);
            tracing::info!("📂 Collections found: {:?}", collections);
        }
        Err(e) => {
            tracing::error!(
                "❌ Database '{}' may not exist or is inaccessible: {}",
                database_name,
                e
            );
        }
    }

    db
}

/// Creates the indexes the ledger's invariants depend on. The unique index on
/// investments.paymentRequestId is the durable backstop that makes a second
/// approve() unable to create a duplicate Investment even across processes.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let unique = |keys: Document| {
        IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build()
    };
    let plain = |keys: Document| IndexModel::builder().keys(keys).build();

    db.collection::<Document>("indexes")
        .create_index(unique(doc! { "name": 1 }))
        .await?;

    db.collection::<Document>("investments")
        .create_index(unique(doc! { "paymentRequestId": 1 }))
        .await?;
    db.collection::<Document>("investments")
        .create_index(plain(doc! { "indexId": 1, "isActive": 1 }))
        .await?;
    db.collection::<Document>("investments")
        .create_index(plain(doc! { "userId": 1 }))
        .await?;

    db.collection::<Document>("payment_requests")
        .create_index(plain(doc! { "status": 1, "expiresAt": 1 }))
        .await?;
    db.collection::<Document>("payment_requests")
        .create_index(plain(doc! { "userId": 1 }))
        .await?;

    db.collection::<Document>("withdrawals")
        .create_index(plain(doc! { "userId": 1, "status": 1 }))
        .await?;

    tracing::info!("✅ Ledger indexes ensured");
    Ok(())
}
