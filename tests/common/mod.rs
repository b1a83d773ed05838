//! Shared test infrastructure for integration tests.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Environment variables the binary reads; cleared so the host cannot leak in.
const SCRUBBED_ENV: &[&str] = &[
    "GOOGLE_SHEETS_ACCESS_TOKEN",
    "STATUS_AUDIT_IT_API_KEY",
    "STATUS_AUDIT_IT_MODEL",
    "RUST_LOG",
];

/// A scratch directory holding a config file for one binary run.
pub struct ConfigFixture {
    dir: TempDir,
    pub config_path: PathBuf,
}

impl ConfigFixture {
    pub fn new(yaml: &str) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.yaml");
        fs::write(&config_path, yaml)?;
        Ok(Self { dir, config_path })
    }

    pub fn write_env_file(&self, contents: &str) -> anyhow::Result<()> {
        fs::write(self.dir.path().join(".env"), contents)?;
        Ok(())
    }

    pub fn run(&self, extra: &[&str]) -> anyhow::Result<Output> {
        let mut args = vec!["--config".to_string(), self.config_path.display().to_string()];
        args.extend(extra.iter().map(|arg| arg.to_string()));
        run_binary(&args, Some(self.dir.path().to_path_buf()))
    }
}

pub fn run_binary(args: &[String], cwd: Option<PathBuf>) -> anyhow::Result<Output> {
    let mut command = Command::new(env!("CARGO_BIN_EXE_status-audit"));
    command.args(args);
    for name in SCRUBBED_ENV {
        command.env_remove(name);
    }
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    Ok(command.output()?)
}

/// Config whose provider credentials come from `STATUS_AUDIT_IT_*` variables.
pub fn config_yaml(access_token: Option<&str>) -> String {
    let token = access_token
        .map(|token| format!("  access_token: {token}\n"))
        .unwrap_or_default();
    format!(
        r#"sheets:
  source_spreadsheet_id: src-id
  source_sheet_name: Statuses
  target_spreadsheet_id: dst-id
  target_sheet_name: Audit
  api_base_url: http://127.0.0.1:9/v4
{token}columns:
  status: Status
  comment: Comment
rules_text: "Every status needs a date."
llm:
  providers:
    1:
      name: primary
      model_env: STATUS_AUDIT_IT_MODEL
      api_key_env: STATUS_AUDIT_IT_API_KEY
"#
    )
}
