//! `kubectl`-backed claim source.
//!
//! Listing runs `kubectl get persistentvolumeclaims -o json`; watching keeps
//! `kubectl get ... --watch --output-watch-events -o json` running and
//! decodes its stdout as a stream of watch events. kubectl has no way to
//! resume from a resource version, so every watch starts by replaying the
//! current objects as `ADDED`.

#![allow(missing_docs)]

use std::io::BufReader;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::WatchConfig;
use crate::core::errors::{PvcwError, Result};
use crate::source::wire::{decode_watch_stream, parse_list};
use crate::source::{ClaimListing, ClaimSource, RecordIter, WatchRecord, WatchStream};

const SOURCE_NAME: &str = "kubectl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubectlSource {
    program: String,
    scope: Vec<String>,
}

impl KubectlSource {
    #[must_use]
    pub fn from_config(watch: &WatchConfig) -> Self {
        let mut scope = Vec::new();
        if watch.namespace.is_empty() {
            scope.push("--all-namespaces".to_string());
        } else {
            scope.extend(["--namespace".to_string(), watch.namespace.clone()]);
        }
        for (flag, value) in [
            ("--selector", &watch.label_selector),
            ("--field-selector", &watch.field_selector),
            ("--kubeconfig", &watch.kubeconfig),
            ("--context", &watch.context),
        ] {
            if !value.is_empty() {
                scope.extend([flag.to_string(), value.clone()]);
            }
        }
        Self {
            program: watch.kubectl_path.clone(),
            scope,
        }
    }

    #[must_use]
    pub fn list_args(&self) -> Vec<String> {
        let mut args = vec!["get".to_string(), "persistentvolumeclaims".to_string()];
        args.extend(self.scope.iter().cloned());
        args.extend(["--output".to_string(), "json".to_string()]);
        args
    }

    #[must_use]
    pub fn watch_args(&self) -> Vec<String> {
        let mut args = self.list_args();
        args.extend(["--watch".to_string(), "--output-watch-events".to_string()]);
        args
    }
}

impl ClaimSource for KubectlSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn list(&mut self) -> Result<ClaimListing> {
        let args = self.list_args();
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| PvcwError::io(&self.program, source))?;
        if !output.status.success() {
            return Err(PvcwError::transport(
                SOURCE_NAME,
                format!(
                    "{} {} failed (exit {}): {}",
                    self.program,
                    args.join(" "),
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        parse_list(&String::from_utf8_lossy(&output.stdout))
    }

    fn watch(&mut self, _resource_version: Option<&str>) -> Result<WatchStream> {
        let mut child = Command::new(&self.program)
            .args(self.watch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| PvcwError::io(&self.program, source))?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PvcwError::transport(SOURCE_NAME, "watch process has no stdout"));
        };

        let child = Arc::new(Mutex::new(child));
        let process = WatchProcess {
            records: Box::new(decode_watch_stream(BufReader::new(stdout))),
            child: Arc::clone(&child),
            done: false,
        };
        Ok(WatchStream::new(process).with_stopper(move || {
            let _ = child.lock().kill();
        }))
    }
}

/// Decoded stdout of a running `kubectl --watch`, reaped on drop.
struct WatchProcess {
    records: RecordIter,
    child: Arc<Mutex<Child>>,
    done: bool,
}

impl WatchProcess {
    fn exit_fault(&self) -> Option<PvcwError> {
        match self.child.lock().wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(PvcwError::transport(
                SOURCE_NAME,
                format!("watch process exited with {status}"),
            )),
            Err(source) => Some(PvcwError::io(SOURCE_NAME, source)),
        }
    }
}

impl Iterator for WatchProcess {
    type Item = Result<WatchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.records.next() {
            Some(Ok(record)) => Some(Ok(record)),
            Some(Err(error)) => {
                self.done = true;
                Some(Err(error))
            }
            None => {
                self.done = true;
                self.exit_fault().map(Err)
            }
        }
    }
}

impl Drop for WatchProcess {
    fn drop(&mut self) {
        let mut child = self.child.lock();
        if matches!(child.try_wait(), Ok(None)) {
            let _ = child.kill();
        }
        let _ = child.wait();
    }
}
