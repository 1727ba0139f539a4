use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "command_messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub body: String,
    /// Unix millis; ordering key for best-effort FIFO.
    pub sent_at_ms: i64,
    /// Unix millis; the message is hidden from receivers until then.
    pub visible_at_ms: i64,
    pub receipt_handle: Option<String>,
    pub receive_count: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
