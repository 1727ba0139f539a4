pub mod command_messages;
pub mod server_states;
