//! Scripted in-memory collaborators for tests.
//!
//! These stand in for the object store, compiler toolchain, and ledger
//! client so pipeline behavior can be exercised without network, solc, or
//! a chain.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use chrono::Utc;
use deployd_protocol::{
    ArtifactRecord, ArtifactStatus, CompiledEntry, CompilerOutput, PipelineError,
};

use crate::compile::CompilerToolchain;
use crate::deploy::{DeploymentRequest, LedgerClient};
use crate::fetch::SourceStore;
use crate::orchestrator::ProgressSink;

/// A bare artifact record for fetch-strategy tests.
pub fn record_with_source(
    artifact_id: &str,
    source_key: Option<&str>,
    source_url: Option<&str>,
) -> ArtifactRecord {
    let now = Utc::now();
    ArtifactRecord {
        artifact_id: artifact_id.to_string(),
        name: None,
        source_key: source_key.map(str::to_string),
        source_url: source_url.map(str::to_string),
        constructor_args: vec![],
        status: ArtifactStatus::Pending,
        address: None,
        tx_hash: None,
        deployed_at: None,
        error: None,
        created_at: now,
        updated_at: now,
    }
}

/// One compiled entry with placeholder bytecode.
pub fn entry(name: &str, bytecode_hex: &str) -> CompiledEntry {
    CompiledEntry {
        name: name.to_string(),
        bytecode: bytecode_hex.parse::<Bytes>().expect("valid hex"),
        abi: serde_json::json!([]),
    }
}

/// A clean compiler result with entries in the given order.
pub fn output_with(names: &[&str]) -> CompilerOutput {
    CompilerOutput {
        diagnostics: vec![],
        entries: names
            .iter()
            .enumerate()
            .map(|(i, name)| entry(name, &format!("0x60{:02x}", i + 1)))
            .collect(),
    }
}

// ============================================================================
// Source store
// ============================================================================

#[derive(Default)]
pub struct StaticSourceStore {
    by_key: Mutex<HashMap<String, String>>,
    by_url: Mutex<HashMap<String, String>>,
}

impl StaticSourceStore {
    pub fn insert_key(&self, key: &str, source: &str) {
        self.by_key
            .lock()
            .unwrap()
            .insert(key.to_string(), source.to_string());
    }

    pub fn insert_url(&self, url: &str, source: &str) {
        self.by_url
            .lock()
            .unwrap()
            .insert(url.to_string(), source.to_string());
    }
}

#[async_trait]
impl SourceStore for StaticSourceStore {
    async fn fetch_by_key(&self, key: &str) -> Result<Vec<u8>, PipelineError> {
        self.by_key
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| PipelineError::Fetch(format!("no object at key '{key}'")))
    }

    async fn fetch_by_url(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        self.by_url
            .lock()
            .unwrap()
            .get(url)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| PipelineError::Fetch(format!("GET {url} returned 404")))
    }
}

// ============================================================================
// Compiler
// ============================================================================

#[derive(Default)]
pub struct ScriptedCompiler {
    script: Mutex<VecDeque<Result<CompilerOutput, PipelineError>>>,
    last_source: Mutex<Option<String>>,
}

impl ScriptedCompiler {
    pub fn push_output(&self, output: CompilerOutput) {
        self.script.lock().unwrap().push_back(Ok(output));
    }

    pub fn push_failure(&self, err: PipelineError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    /// The source text of the most recent compile call.
    pub fn last_source(&self) -> Option<String> {
        self.last_source.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompilerToolchain for ScriptedCompiler {
    async fn compile(&self, entry_path: &Path) -> Result<CompilerOutput, PipelineError> {
        let source = std::fs::read_to_string(entry_path)
            .map_err(|e| PipelineError::Compile(format!("cannot read staged source: {e}")))?;
        *self.last_source.lock().unwrap() = Some(source);

        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(output_with(&["Contract"])),
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
pub struct ScriptedLedger {
    broadcasts: AtomicUsize,
    failures: Mutex<VecDeque<PipelineError>>,
    last_args: Mutex<Option<Vec<serde_json::Value>>>,
}

impl ScriptedLedger {
    /// Fail the next broadcast with the given error.
    pub fn fail_next(&self, err: PipelineError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn broadcasts(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    pub fn last_constructor_args(&self) -> Option<Vec<serde_json::Value>> {
        self.last_args.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn broadcast_deployment(
        &self,
        request: DeploymentRequest<'_>,
    ) -> Result<B256, PipelineError> {
        let seq = self.broadcasts.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_args.lock().unwrap() = Some(request.constructor_args.to_vec());

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(B256::with_last_byte(seq as u8))
    }

    async fn await_inclusion(&self, tx_hash: B256) -> Result<Address, PipelineError> {
        Ok(Address::with_last_byte(tx_hash[31]))
    }
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<u8>>,
}

impl RecordingSink {
    pub fn seen(&self) -> Vec<u8> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn progress(&self, pct: u8) {
        self.seen.lock().unwrap().push(pct);
    }
}
