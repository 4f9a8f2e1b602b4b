pub mod base;
pub mod configs;
pub mod errors;
pub mod factory;
pub mod google;
pub mod mock;
pub mod openai;
pub mod rate_limit;
pub mod responses;
pub mod retry;
pub mod utils;
