mod report_client;

pub use report_client::ReportClient;
