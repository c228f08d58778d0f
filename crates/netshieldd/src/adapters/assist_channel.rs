//! `AssistChannel` reference adapter: runs the requested program directly
//! through `tokio::process::Command` rather than through a real vendor
//! assist client (out of scope per spec §1). This is the genuine shape the
//! `PolicyChain`/`NetPolicy` backends expect — `cmd netpolicy …` and
//! `service call netpolicy …` are real shell-executable commands on the
//! target platform — it simply assumes the daemon process itself already
//! carries whatever privilege the real assist client would negotiate.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use netshield_ports::{AssistChannel, AssistExecResult, ServiceHandle};

pub struct ShellAssistChannel;

#[async_trait]
impl AssistChannel for ShellAssistChannel {
    async fn exec(&self, program: &str, args: &[&str]) -> Result<AssistExecResult> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {program}"))?;
        Ok(AssistExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        })
    }

    async fn system_service_binder(&self, service_name: &str) -> Result<ServiceHandle> {
        Ok(ServiceHandle { service_name: service_name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_reports_exit_code_and_output() {
        let channel = ShellAssistChannel;
        let result = channel.exec("echo", &["hello"]).await.unwrap();
        assert!(result.ok());
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn exec_reports_nonzero_exit_code() {
        let channel = ShellAssistChannel;
        let result = channel.exec("false", &[]).await.unwrap();
        assert!(!result.ok());
    }
}
