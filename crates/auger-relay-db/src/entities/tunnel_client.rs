//! Tunnel client entity (one row per agent control connection)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnel_clients")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(StringLen::None)")]
    pub id: String,

    #[sea_orm(column_type = "String(StringLen::None)", nullable)]
    pub token: Option<String>,

    #[sea_orm(column_type = "String(StringLen::None)")]
    pub tunnel_type: String,

    #[sea_orm(column_type = "String(StringLen::None)", nullable)]
    pub subdomain: Option<String>,

    /// Reserved for port-based tunnels; always NULL for HTTP
    pub public_port: Option<i32>,

    pub local_port: i32,

    pub connected_at: DateTimeUtc,

    pub disconnected_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
