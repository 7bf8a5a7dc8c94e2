use sea_orm::entity::prelude::*;

/// Outbox row written in the same transaction as the change it announces.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "outbox_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub event_type: String,
    pub payload: Json,
    #[sea_orm(unique)]
    pub idempotency_key: String,
    /// `pending`, `published` or `failed`.
    pub status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Earliest time a worker may claim the row; pushed forward while leased.
    pub next_attempt_at: chrono::DateTime<chrono::Utc>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
