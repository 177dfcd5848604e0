pub mod server;
pub mod test_utils;

pub const RUN_TOKEN: &str = "test-run-token";
pub const COLLECTOR_ADDR: &str = "203.0.113.7:9090";
pub const PROTOCOL_SERVER_ADDR: &str = "10.0.0.5:8000";
