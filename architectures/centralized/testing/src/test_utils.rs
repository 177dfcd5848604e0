use std::{future::Future, path::Path, time::Duration};

use ctbench_centralized_server::{AuthConfig, AuthMode, CollectorConfig};
use ctbench_cloud::{CredentialConfig, FleetConfig};
use ctbench_core::{AuditorReport, ClientCpuReport, ClientReport, RunTask};

use crate::{COLLECTOR_ADDR, PROTOCOL_SERVER_ADDR, RUN_TOKEN};

pub async fn assert_with_retries<T, F, Fut>(mut function: F, y: T)
where
    T: PartialEq + std::fmt::Debug,
    Fut: Future<Output = T>,
    F: FnMut() -> Fut,
{
    let retry_attempts: u64 = 15;
    let mut result;
    for attempt in 1..=retry_attempts {
        result = function().await;
        if result == y {
            return;
        } else if attempt == retry_attempts {
            panic!("assertion failed {:?} != {:?}", result, y);
        } else {
            tokio::time::sleep(Duration::from_millis(50 * attempt)).await;
        }
    }
}

/// A collector config that listens on a random port and writes its snapshot
/// and credentials under `dir`.
pub fn collector_config_for_testing(dir: &Path, runs: Vec<RunTask>) -> CollectorConfig {
    CollectorConfig {
        server_addr: PROTOCOL_SERVER_ADDR.to_string(),
        reveal: 1,
        snapshot_path: dir.join("report.json"),
        port: 0,
        collector_addr: Some(COLLECTOR_ADDR.to_string()),
        expected_count_check: true,
        auth: AuthConfig {
            mode: AuthMode::Token,
            token: Some(RUN_TOKEN.to_string()),
        },
        fleet: FleetConfig {
            region: "us-east-1".to_string(),
            instance_type: "t2.micro".to_string(),
            security_group_id: "sg-03c26d167c72f8254".to_string(),
            image_owner: "amazon".to_string(),
            image_name_filter: "amzn2-ami-hvm-*-x86_64-gp2".to_string(),
            worker_repo: "https://github.com/Andyluchina/CTClient".to_string(),
            credential: CredentialConfig {
                name: "ctbench-test".to_string(),
                dir: dir.to_path_buf(),
                create: true,
            },
        },
        runs,
    }
}

pub fn client_report(client_id: u32) -> ClientReport {
    ClientReport {
        client_id,
        initial_reporting_secs: 0.5,
        secret_share_secs: 1.25,
        shuffle_secs: 2.0,
        reveal_secs: 0.75,
        fault_tolerance_secs: 0.0,
        upload_bytes: 4096,
        download_bytes: 8192,
        entry: vec![client_id as u8; 4],
    }
}

pub fn auditor_report(total_clients: u32, max_sit_out: u32) -> AuditorReport {
    AuditorReport {
        total_clients,
        max_sit_out,
        calculated_entries: vec![vec![vec![1, 2], vec![3, 4]]],
        total_run_secs: 42.5,
        per_client_cpu: (1..=total_clients)
            .map(|client_id| ClientCpuReport {
                client_id,
                shuffle_secs: 1.5,
                ..Default::default()
            })
            .collect(),
    }
}
