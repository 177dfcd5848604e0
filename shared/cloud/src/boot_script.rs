use ctbench_core::RUN_TOKEN_ENV;
use data_encoding::BASE64;

/// Instance boot script that builds the worker program and starts it against
/// the protocol server and this collector.
///
/// The worker at `worker_repo` is started as `./main <server> <reveal>
/// <collector>` and must send its reports with the collector's own framed
/// protocol, as `ctbench-centralized-client` does.
#[derive(Debug, Clone)]
pub struct BootScript<'a> {
    pub worker_repo: &'a str,
    pub server_addr: &'a str,
    pub reveal: u32,
    pub collector_addr: &'a str,
    pub run_token: Option<&'a str>,
}

impl BootScript<'_> {
    /// Every configured value is single-quoted before it reaches the shell.
    pub fn render(&self) -> String {
        let mut script = format!(
            "#!/bin/bash\n\
             cd /root\n\
             yum install go -y\n\
             yum install git -y\n\
             git clone {repo}\n\
             cd {dir}\n\
             go build main.go\n",
            repo = shell_quote(self.worker_repo),
            dir = shell_quote(repo_dir_name(self.worker_repo)),
        );
        if let Some(token) = self.run_token {
            script.push_str(&format!("export {RUN_TOKEN_ENV}={}\n", shell_quote(token)));
        }
        script.push_str(&format!(
            "./main {} {} {}\n",
            shell_quote(self.server_addr),
            self.reveal,
            shell_quote(self.collector_addr)
        ));
        script
    }

    /// The rendered script, base64-encoded for use as instance user data.
    pub fn encode(&self) -> String {
        BASE64.encode(self.render().as_bytes())
    }
}

/// Directory `git clone` creates for `repo`.
fn repo_dir_name(repo: &str) -> &str {
    let name = repo
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(repo);
    name.strip_suffix(".git").unwrap_or(name)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
