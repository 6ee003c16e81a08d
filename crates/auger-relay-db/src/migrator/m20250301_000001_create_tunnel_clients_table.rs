use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TunnelClient::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TunnelClient::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TunnelClient::Token).string().null())
                    .col(ColumnDef::new(TunnelClient::TunnelType).string().not_null())
                    .col(ColumnDef::new(TunnelClient::Subdomain).string().null())
                    .col(ColumnDef::new(TunnelClient::PublicPort).integer().null())
                    .col(ColumnDef::new(TunnelClient::LocalPort).integer().not_null())
                    .col(
                        ColumnDef::new(TunnelClient::ConnectedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TunnelClient::DisconnectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookups by subdomain when investigating abuse reports
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnel_clients_subdomain")
                    .table(TunnelClient::Table)
                    .col(TunnelClient::Subdomain)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnel_clients_connected_at")
                    .table(TunnelClient::Table)
                    .col(TunnelClient::ConnectedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TunnelClient::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TunnelClient {
    #[sea_orm(iden = "tunnel_clients")]
    Table,
    Id,
    Token,
    TunnelType,
    Subdomain,
    PublicPort,
    LocalPort,
    ConnectedAt,
    DisconnectedAt,
}
