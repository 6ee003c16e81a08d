//! Session audit trail
//!
//! The registry reports every session it creates and destroys to a
//! [`SessionAudit`] sink. Sinks must not block and must never fail the caller.

use auger_proto::TunnelType;
use auger_relay_db::entities::tunnel_client;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Snapshot of a session at registration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub token: Option<String>,
    pub tunnel_type: TunnelType,
    pub subdomain: Option<String>,
    pub public_port: Option<u16>,
    pub local_port: u16,
    pub connected_at: DateTime<Utc>,
}

pub trait SessionAudit: Send + Sync {
    fn session_opened(&self, record: &SessionRecord);

    fn session_closed(&self, session_id: &str, disconnected_at: DateTime<Utc>);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl SessionAudit for NoopAudit {
    fn session_opened(&self, _record: &SessionRecord) {}

    fn session_closed(&self, _session_id: &str, _disconnected_at: DateTime<Utc>) {}
}

enum AuditEvent {
    Opened(SessionRecord),
    Closed {
        session_id: String,
        disconnected_at: DateTime<Utc>,
    },
    Flush(oneshot::Sender<()>),
}

/// Persists sessions to the `tunnel_clients` table.
///
/// Events are queued and written by a single background task in arrival
/// order, so a disconnect is never applied before its insert.
#[derive(Clone)]
pub struct DatabaseAudit {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl DatabaseAudit {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(db: DatabaseConnection) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    AuditEvent::Opened(record) => {
                        if let Err(e) = insert_client(&db, &record).await {
                            warn!(session_id = %record.id, "Failed to record session: {}", e);
                        }
                    }
                    AuditEvent::Closed {
                        session_id,
                        disconnected_at,
                    } => {
                        if let Err(e) = mark_disconnected(&db, &session_id, disconnected_at).await {
                            warn!(session_id = %session_id, "Failed to record disconnect: {}", e);
                        }
                    }
                    AuditEvent::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("Audit writer stopped");
        });

        Self { tx }
    }

    /// Wait until every event queued so far has been written
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(AuditEvent::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

impl SessionAudit for DatabaseAudit {
    fn session_opened(&self, record: &SessionRecord) {
        let _ = self.tx.send(AuditEvent::Opened(record.clone()));
    }

    fn session_closed(&self, session_id: &str, disconnected_at: DateTime<Utc>) {
        let _ = self.tx.send(AuditEvent::Closed {
            session_id: session_id.to_string(),
            disconnected_at,
        });
    }
}

async fn insert_client(db: &DatabaseConnection, record: &SessionRecord) -> Result<(), DbErr> {
    tunnel_client::ActiveModel {
        id: Set(record.id.clone()),
        token: Set(record.token.clone()),
        tunnel_type: Set(record.tunnel_type.as_str().to_string()),
        subdomain: Set(record.subdomain.clone()),
        public_port: Set(record.public_port.map(i32::from)),
        local_port: Set(i32::from(record.local_port)),
        connected_at: Set(record.connected_at),
        disconnected_at: Set(None),
    }
    .insert(db)
    .await?;

    Ok(())
}

async fn mark_disconnected(
    db: &DatabaseConnection,
    session_id: &str,
    disconnected_at: DateTime<Utc>,
) -> Result<(), DbErr> {
    tunnel_client::Entity::update_many()
        .col_expr(
            tunnel_client::Column::DisconnectedAt,
            Expr::value(disconnected_at),
        )
        .filter(tunnel_client::Column::Id.eq(session_id))
        .exec(db)
        .await?;

    Ok(())
}
