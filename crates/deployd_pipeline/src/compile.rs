//! Compiler adapter.
//!
//! A compilation unit may define several deployable entries; the adapter
//! selects "the" target. The tie-break is fixed: an entry matching the name
//! hint exactly wins, otherwise the first entry in compiler-reported order
//! is taken and the mismatch logged as a warning - never an error. The
//! selected name is authoritative and callers correct stored metadata with
//! it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use alloy_primitives::Bytes;
use async_trait::async_trait;
use deployd_protocol::{
    CompiledEntry, CompilerOutput, Diagnostic, DiagnosticSeverity, PipelineError,
};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Compiler toolchain seam: staged source file in, diagnostics plus ordered
/// entries out.
#[async_trait]
pub trait CompilerToolchain: Send + Sync {
    async fn compile(&self, entry: &Path) -> Result<CompilerOutput, PipelineError>;
}

/// Apply the selection tie-break to a raw compiler result.
pub fn select_entry(
    output: CompilerOutput,
    name_hint: Option<&str>,
) -> Result<CompiledEntry, PipelineError> {
    if output.has_errors() {
        return Err(PipelineError::Compile(output.error_messages().join("; ")));
    }
    if output.entries.is_empty() {
        return Err(PipelineError::Compile(
            "compilation produced no deployable entries".to_string(),
        ));
    }

    if let Some(hint) = name_hint.filter(|h| !h.is_empty()) {
        if let Some(entry) = output.entries.iter().find(|e| e.name == hint) {
            debug!(name = %entry.name, "compiled entry matched name hint");
            return Ok(entry.clone());
        }
        let first = output.entries[0].clone();
        warn!(
            hint,
            selected = %first.name,
            "name hint did not match any compiled entry; using first entry"
        );
        return Ok(first);
    }

    Ok(output.entries[0].clone())
}

/// Convenience wrapper: compile then select.
pub async fn compile_selected(
    toolchain: &dyn CompilerToolchain,
    entry: &Path,
    name_hint: Option<&str>,
) -> Result<CompiledEntry, PipelineError> {
    let output = toolchain.compile(entry).await?;
    select_entry(output, name_hint)
}

/// Drives `solc --standard-json` as a subprocess.
#[derive(Debug, Clone)]
pub struct SolcToolchain {
    solc_path: PathBuf,
}

impl SolcToolchain {
    pub fn new(solc_path: PathBuf) -> Self {
        Self { solc_path }
    }

    fn standard_json_input(source: &str) -> serde_json::Value {
        json!({
            "language": "Solidity",
            "sources": {
                "input.sol": { "content": source }
            },
            "settings": {
                "outputSelection": {
                    "*": { "*": ["abi", "evm.bytecode.object"] }
                }
            }
        })
    }

    fn parse_output(raw: &[u8]) -> Result<CompilerOutput, PipelineError> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| PipelineError::Compile(format!("unparseable solc output: {e}")))?;

        let mut diagnostics = Vec::new();
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            for err in errors {
                let severity = err
                    .get("severity")
                    .and_then(|s| s.as_str())
                    .and_then(|s| s.parse::<DiagnosticSeverity>().ok())
                    .unwrap_or(DiagnosticSeverity::Error);
                let message = err
                    .get("formattedMessage")
                    .or_else(|| err.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown compiler diagnostic")
                    .to_string();
                diagnostics.push(Diagnostic { severity, message });
            }
        }

        // serde_json preserves object order, so entries stay in
        // compiler-reported order
        let mut entries = Vec::new();
        if let Some(files) = value.get("contracts").and_then(|c| c.as_object()) {
            for contracts in files.values() {
                let Some(contracts) = contracts.as_object() else {
                    continue;
                };
                for (name, contract) in contracts {
                    let bytecode_hex = contract
                        .pointer("/evm/bytecode/object")
                        .and_then(|b| b.as_str())
                        .unwrap_or("");
                    let bytecode = if bytecode_hex.starts_with("0x") {
                        bytecode_hex.parse::<Bytes>()
                    } else {
                        format!("0x{bytecode_hex}").parse::<Bytes>()
                    }
                    .map_err(|e| {
                        PipelineError::Compile(format!("bad bytecode for entry '{name}': {e}"))
                    })?;
                    let abi = contract.get("abi").cloned().unwrap_or(json!([]));
                    entries.push(CompiledEntry {
                        name: name.clone(),
                        bytecode,
                        abi,
                    });
                }
            }
        }

        Ok(CompilerOutput {
            diagnostics,
            entries,
        })
    }
}

#[async_trait]
impl CompilerToolchain for SolcToolchain {
    async fn compile(&self, entry: &Path) -> Result<CompilerOutput, PipelineError> {
        let source = tokio::fs::read_to_string(entry)
            .await
            .map_err(|e| PipelineError::Compile(format!("cannot read staged source: {e}")))?;

        let input = Self::standard_json_input(&source);

        let mut child = Command::new(&self.solc_path)
            .arg("--standard-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::Compile(format!(
                    "failed to invoke {}: {}",
                    self.solc_path.display(),
                    e
                ))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            PipelineError::Compile("solc stdin unavailable".to_string())
        })?;
        let payload = serde_json::to_vec(&input)
            .map_err(|e| PipelineError::Compile(format!("cannot encode solc input: {e}")))?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| PipelineError::Compile(format!("writing to solc failed: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PipelineError::Compile(format!("waiting for solc failed: {e}")))?;

        if !output.status.success() && output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Compile(format!(
                "solc exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Self::parse_output(&output.stdout)
    }
}
