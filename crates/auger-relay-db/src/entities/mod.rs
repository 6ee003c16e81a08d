//! Database entities

pub mod tunnel_client;

pub use tunnel_client::Entity as TunnelClient;

pub mod prelude {
    pub use super::tunnel_client::Entity as TunnelClient;
}
