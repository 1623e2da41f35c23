pub mod apikey;
pub mod heartbeat;
pub mod manager;
pub mod rate_limit;
