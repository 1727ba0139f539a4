use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServerStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServerStates::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServerStates::State).string().not_null())
                    .col(
                        ColumnDef::new(ServerStates::LeaseExpiry)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServerStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ServerStates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ServerStates {
    Table,
    Id,
    State,
    LeaseExpiry,
    UpdatedAt,
}
