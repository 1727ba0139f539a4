use sea_orm_migration::prelude::*;

mod m0001_create_server_states;
mod m0002_create_command_messages;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m0001_create_server_states::Migration),
            Box::new(m0002_create_command_messages::Migration),
        ]
    }
}
