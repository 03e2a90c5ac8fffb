//! [`AtomicStore`] over a Cloud Spanner table.
//!
//! Expects a table of the form:
//!
//! ```sql
//! CREATE TABLE locks (
//!     name STRING(MAX) NOT NULL,
//! ) PRIMARY KEY (name)
//! ```
//!
//! Insert-if-absent is a plain `INSERT` mutation, which Spanner rejects
//! with `ALREADY_EXISTS` when the key is taken.

use crate::store::AtomicStore;
use anyhow::{Context, Result};
use google_cloud_gax::grpc::Code;
use google_cloud_spanner::client::{Client, ClientConfig, Error};
use google_cloud_spanner::key::Key;
use google_cloud_spanner::mutation::{delete, insert};
use log::*;
use std::time::Instant;
use tokio::runtime::Runtime;

pub struct SpannerStore {
    rt: Runtime,
    client: Client,
    table: String,
}

impl SpannerStore {
    /// `db` is the full database path, e.g.
    /// `projects/p/instances/i/databases/d`.
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        let db = db.into();
        // Client calls run on a private runtime so callers stay synchronous.
        let rt = Runtime::new().context("tokio runtime")?;
        let client = rt.block_on(async {
            let config = ClientConfig::default()
                .with_auth()
                .await
                .context("spanner auth")?;
            Client::new(db.clone(), config)
                .await
                .with_context(|| format!("spanner client for {db}"))
        })?;

        Ok(Self {
            rt,
            client,
            table: table.into(),
        })
    }

    pub fn close(self) {
        let Self { rt, client, .. } = self;
        rt.block_on(async { client.close().await });
    }
}

impl AtomicStore for SpannerStore {
    fn insert_if_absent(&self, id: &str) -> Result<bool> {
        let start = Instant::now();
        let m = insert(&self.table, &["name"], &[&id]);
        let res = self.rt.block_on(self.client.apply(vec![m]));
        debug!("insert [{id}] took {:?}", start.elapsed());
        inserted(res).with_context(|| format!("insert [{id}] into {}", self.table))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let m = delete(&self.table, Key::new(&id));
        self.rt
            .block_on(self.client.apply(vec![m]))
            .with_context(|| format!("delete [{id}] from {}", self.table))?;
        Ok(())
    }
}

// Only a taken key is contention; every other rejection is a store fault.
fn inserted<T>(res: std::result::Result<T, Error>) -> std::result::Result<bool, Error> {
    match res {
        Ok(_) => Ok(true),
        Err(Error::GRPC(status)) if status.code() == Code::AlreadyExists => {
            debug!("insert rejected: {}", status.message());
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
