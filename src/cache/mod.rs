pub mod renewal;
pub mod status;
pub mod sweeper;
pub mod token;
pub mod token_cache;
