use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CommandMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CommandMessages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CommandMessages::Body).text().not_null())
                    .col(
                        ColumnDef::new(CommandMessages::SentAtMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CommandMessages::VisibleAtMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CommandMessages::ReceiptHandle)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CommandMessages::ReceiveCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_command_messages_visible_at_sent_at")
                    .if_not_exists()
                    .table(CommandMessages::Table)
                    .col(CommandMessages::VisibleAtMs)
                    .col(CommandMessages::SentAtMs)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_command_messages_receipt_handle")
                    .if_not_exists()
                    .table(CommandMessages::Table)
                    .col(CommandMessages::ReceiptHandle)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_command_messages_receipt_handle")
                    .table(CommandMessages::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_command_messages_visible_at_sent_at")
                    .table(CommandMessages::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(CommandMessages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CommandMessages {
    Table,
    Id,
    Body,
    SentAtMs,
    VisibleAtMs,
    ReceiptHandle,
    ReceiveCount,
}
