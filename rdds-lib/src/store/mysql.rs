//! MySQL / MariaDB backend over the registrar schema.
//!
//! Tables read: `namingo_domain`, `namingo_contact`,
//! `namingo_domain_status`, `namingo_domain_dnssec` and `tbldomainpricing`.
//! Rows are decoded by column name and optional columns may be absent, so
//! schema variants that lack reseller data still work.

use super::{BoxedConnection, ConnectionManager, RegistryConnection};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::types::{ContactRecord, DomainRecord, DsRecord};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ConnectOptions, Connection, Row};
use std::time::Duration;
use tracing::debug;

const DOMAIN_QUERY: &str = "SELECT * FROM namingo_domain WHERE name = ? LIMIT 1";
const STATUS_QUERY: &str = "SELECT status FROM namingo_domain_status WHERE domain_id = ?";
const DNSSEC_QUERY: &str =
    "SELECT key_tag, algorithm, digest_type, digest FROM namingo_domain_dnssec WHERE domain_id = ?";
const TLD_QUERY: &str = "SELECT DISTINCT extension FROM tbldomainpricing";

/// Opens connections to the registry database.
#[derive(Debug, Clone)]
pub struct MySqlManager {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
}

impl MySqlManager {
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4");

        Self {
            options,
            connect_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl ConnectionManager for MySqlManager {
    async fn connect(&self) -> Result<BoxedConnection, StoreError> {
        let conn = tokio::time::timeout(self.connect_timeout, self.options.connect())
            .await
            .map_err(|_| {
                StoreError::unavailable(format!(
                    "database connect timed out after {:?}",
                    self.connect_timeout
                ))
            })??;
        debug!("opened database connection");
        Ok(Box::new(MySqlRegistryConnection { conn }))
    }
}

/// One MySQL session.
pub struct MySqlRegistryConnection {
    conn: MySqlConnection,
}

#[async_trait]
impl RegistryConnection for MySqlRegistryConnection {
    async fn find_domain(&mut self, name: &str) -> Result<Option<DomainRecord>, StoreError> {
        let row = sqlx::query(DOMAIN_QUERY)
            .bind(name)
            .fetch_optional(&mut self.conn)
            .await?;
        row.as_ref().map(domain_from_row).transpose()
    }

    async fn fetch_contacts(&mut self, ids: &[i64]) -> Result<Vec<ContactRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, identifier, name, org, street1, street2, street3, city, sp, pc, cc, voice, fax, email \
             FROM namingo_contact WHERE id IN ({})",
            vec!["?"; ids.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }

        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn fetch_statuses(&mut self, domain_id: i64) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(STATUS_QUERY)
            .bind(domain_id)
            .fetch_all(&mut self.conn)
            .await?;
        let mut statuses = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(status) = opt_text(row, "status")? {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    async fn fetch_dnssec(&mut self, domain_id: i64) -> Result<Vec<DsRecord>, StoreError> {
        let rows = sqlx::query(DNSSEC_QUERY)
            .bind(domain_id)
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter().map(ds_from_row).collect()
    }

    async fn fetch_allowed_tlds(&mut self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(TLD_QUERY).fetch_all(&mut self.conn).await?;
        let mut tlds = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(ext) = opt_text(row, "extension")? {
                tlds.push(ext);
            }
        }
        Ok(tlds)
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.conn.ping().await?;
        Ok(())
    }
}

fn domain_from_row(row: &MySqlRow) -> Result<DomainRecord, StoreError> {
    let id = opt_int(row, "id")?.ok_or_else(|| StoreError::decode("id", "missing"))?;
    let name = opt_text(row, "name")?.unwrap_or_default();

    Ok(DomainRecord {
        id,
        name,
        registry_domain_id: opt_text(row, "registry_domain_id")?,
        created: opt_datetime(row, "crdate"),
        updated: opt_datetime(row, "lastupdate"),
        expires: opt_datetime(row, "exdate"),
        transferred: opt_datetime(row, "trdate"),
        nameserver_slots: [
            opt_text(row, "ns1")?,
            opt_text(row, "ns2")?,
            opt_text(row, "ns3")?,
            opt_text(row, "ns4")?,
            opt_text(row, "ns5")?,
        ],
        registrant: opt_int(row, "registrant")?,
        admin: opt_int(row, "admin")?,
        tech: opt_int(row, "tech")?,
        billing: opt_int(row, "billing")?,
        reseller: opt_text(row, "reseller")?,
        reseller_url: opt_text(row, "reseller_url")?,
    })
}

fn contact_from_row(row: &MySqlRow) -> Result<ContactRecord, StoreError> {
    let text = |column: &str| -> Result<String, StoreError> {
        Ok(opt_text(row, column)?.unwrap_or_default())
    };

    Ok(ContactRecord {
        id: opt_int(row, "id")?.ok_or_else(|| StoreError::decode("id", "missing"))?,
        identifier: opt_text(row, "identifier")?,
        name: text("name")?,
        org: text("org")?,
        street: [text("street1")?, text("street2")?, text("street3")?],
        city: text("city")?,
        state_province: text("sp")?,
        postal_code: text("pc")?,
        country_code: text("cc")?,
        voice: text("voice")?,
        fax: text("fax")?,
        email: text("email")?,
    })
}

fn ds_from_row(row: &MySqlRow) -> Result<DsRecord, StoreError> {
    fn narrow<T: TryFrom<i64>>(row: &MySqlRow, column: &str) -> Result<T, StoreError> {
        let value = opt_int(row, column)?.ok_or_else(|| StoreError::decode(column, "missing"))?;
        T::try_from(value).map_err(|_| StoreError::decode(column, format!("{} out of range", value)))
    }

    Ok(DsRecord {
        key_tag: narrow(row, "key_tag")?,
        algorithm: narrow(row, "algorithm")?,
        digest_type: narrow(row, "digest_type")?,
        digest: opt_text(row, "digest")?.unwrap_or_default(),
    })
}

/// Integer column of any width or signedness; absent columns read as NULL.
fn opt_int(row: &MySqlRow, column: &str) -> Result<Option<i64>, StoreError> {
    match row.try_get::<Option<i64>, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(_) => {
            let unsigned: Option<u64> = row.try_get(column)?;
            unsigned
                .map(|v| {
                    i64::try_from(v)
                        .map_err(|_| StoreError::decode(column, format!("{} out of range", v)))
                })
                .transpose()
        }
    }
}

/// Text column, falling back to integer columns rendered as text.
fn opt_text(row: &MySqlRow, column: &str) -> Result<Option<String>, StoreError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(_) => Ok(opt_int(row, column)?.map(|v| v.to_string())),
    }
}

/// DATETIME / TIMESTAMP column. Zero dates and absent columns read as `None`.
fn opt_datetime(row: &MySqlRow, column: &str) -> Option<NaiveDateTime> {
    match row.try_get::<Option<NaiveDateTime>, _>(column) {
        Ok(value) => value,
        Err(sqlx::Error::ColumnNotFound(_)) => None,
        Err(e) => {
            debug!(column, error = %e, "unreadable timestamp treated as unset");
            None
        }
    }
}
