use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use sha2::{Digest, Sha256};
use shared::types::{PeerAddresses, TrustedCertificate};
use chrono::Utc;

/// Outcome of presenting a certificate for a hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    /// First certificate seen for this hostname; now pinned
    Installed,
    /// Matches the pinned certificate
    Matched,
    /// Differs from the pinned certificate
    Mismatch { pinned: String },
}

/// SHA-256 fingerprint of a certificate payload, hex encoded
pub fn fingerprint(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

pub struct TrustDb {
    conn: Connection,
}

impl TrustDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                hostname     TEXT PRIMARY KEY,
                fingerprint  TEXT NOT NULL,
                certificate  BLOB NOT NULL,
                ipv4         TEXT,
                ipv6         TEXT,
                first_seen   TEXT NOT NULL,
                last_seen    TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Check a presented certificate against the pin for `hostname`,
    /// pinning it if the hostname is new.
    pub fn check_and_install(
        &self,
        hostname: &str,
        addresses: &PeerAddresses,
        payload: &[u8],
    ) -> Result<TrustDecision> {
        let presented = fingerprint(payload);
        let now = Utc::now().to_rfc3339();
        let ipv4 = addresses.ipv4.map(|a| a.to_string());
        let ipv6 = addresses.ipv6.map(|a| a.to_string());

        let pinned: Option<String> = self
            .conn
            .query_row(
                "SELECT fingerprint FROM certificates WHERE hostname = ?1",
                params![hostname],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query pinned certificate")?;

        match pinned {
            None => {
                self.conn.execute(
                    r#"
                    INSERT INTO certificates (
                        hostname, fingerprint, certificate, ipv4, ipv6, first_seen, last_seen
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                    "#,
                    params![hostname, &presented, payload, ipv4, ipv6, &now],
                )
                .context("Failed to install certificate")?;

                Ok(TrustDecision::Installed)
            }
            Some(pinned) if pinned == presented => {
                self.conn.execute(
                    "UPDATE certificates SET ipv4 = ?1, ipv6 = ?2, last_seen = ?3 WHERE hostname = ?4",
                    params![ipv4, ipv6, &now, hostname],
                )
                .context("Failed to refresh certificate")?;

                Ok(TrustDecision::Matched)
            }
            Some(pinned) => Ok(TrustDecision::Mismatch { pinned }),
        }
    }

    /// Get the pinned certificate for a hostname
    pub fn get_certificate(&self, hostname: &str) -> Result<Option<TrustedCertificate>> {
        let result = self
            .conn
            .query_row(
                "SELECT hostname, fingerprint, ipv4, ipv6, first_seen, last_seen
                 FROM certificates WHERE hostname = ?1",
                params![hostname],
                |row| Self::row_to_certificate(row),
            )
            .optional()
            .context("Failed to query certificate")?;

        Ok(result)
    }

    /// Get all pinned certificates, ordered by hostname
    pub fn get_all_certificates(&self) -> Result<Vec<TrustedCertificate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT hostname, fingerprint, ipv4, ipv6, first_seen, last_seen
                 FROM certificates ORDER BY hostname"
            )
            .context("Failed to prepare query")?;

        let certificates = stmt
            .query_map([], |row| Self::row_to_certificate(row))
            .context("Failed to query certificates")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect certificates")?;

        Ok(certificates)
    }

    /// Drop the pin for a hostname. Returns true if one existed.
    pub fn forget(&self, hostname: &str) -> Result<bool> {
        let count = self.conn.execute(
            "DELETE FROM certificates WHERE hostname = ?1",
            params![hostname],
        )
        .context("Failed to forget certificate")?;

        Ok(count > 0)
    }

    fn row_to_certificate(row: &rusqlite::Row) -> Result<TrustedCertificate, rusqlite::Error> {
        let ipv4: Option<String> = row.get(2)?;
        let ipv6: Option<String> = row.get(3)?;
        let first_seen_str: String = row.get(4)?;
        let last_seen_str: String = row.get(5)?;

        let conversion = |idx: usize, e: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e)
        };

        let ipv4 = ipv4
            .map(|s| s.parse::<std::net::Ipv4Addr>())
            .transpose()
            .map_err(|e: std::net::AddrParseError| conversion(2, Box::new(e)))?;
        let ipv6 = ipv6
            .map(|s| s.parse::<std::net::Ipv6Addr>())
            .transpose()
            .map_err(|e: std::net::AddrParseError| conversion(3, Box::new(e)))?;

        let first_seen = chrono::DateTime::parse_from_rfc3339(&first_seen_str)
            .map_err(|e| conversion(4, Box::new(e)))?
            .with_timezone(&Utc);
        let last_seen = chrono::DateTime::parse_from_rfc3339(&last_seen_str)
            .map_err(|e| conversion(5, Box::new(e)))?
            .with_timezone(&Utc);

        Ok(TrustedCertificate {
            hostname: row.get(0)?,
            fingerprint: row.get(1)?,
            ipv4,
            ipv6,
            first_seen,
            last_seen,
        })
    }
}
