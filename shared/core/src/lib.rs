mod report;
mod run;

pub use report::{AuditorReport, ClientCpuReport, ClientReport};
pub use run::{RunHistory, RunRecord, RunTask};

/// Environment variable carrying the run token, on worker hosts and for the
/// command-line tools.
pub const RUN_TOKEN_ENV: &str = "CTBENCH_RUN_TOKEN";
