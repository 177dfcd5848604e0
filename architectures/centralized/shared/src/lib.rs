mod protocol;

pub use protocol::{ClientToServerMessage, ReportStatsReply};
