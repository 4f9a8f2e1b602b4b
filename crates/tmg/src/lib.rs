pub mod agent;
pub mod chunking;
pub mod command;
pub mod errors;
pub mod models;
pub mod outbox;
pub mod prompt_template;
pub mod providers;
pub mod store;
pub mod systems;
pub mod tex;
