#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use blockdump::catalog::encode_chunk_file;
use blockdump::Timestamp;

/// 2021-04-01 18:52:31 .. 20:52:31 UTC
pub const BLOCK_A: &str = "01F26M4N1N6R4H0VTDGMQEQBQ8";
/// 2021-03-30 01:05:00 .. 03:05:00 UTC
pub const BLOCK_B: &str = "01F1Y3Q6WC2X2SAGK4CZ8H8XF1";

pub fn ts(value: &str) -> Timestamp {
    Timestamp::parse(value).expect("timestamp")
}

/// Writes a block directory with a `meta.json`, one chunk file and an index.
pub fn write_block(root: &Path, id: &str, min: Timestamp, max: Timestamp, samples: u64) -> PathBuf {
    let dir = root.join(id);
    fs::create_dir_all(dir.join("chunks")).expect("mkdir block");
    let meta = serde_json::json!({
        "ulid": id,
        "minTime": min.as_millis(),
        "maxTime": max.as_millis(),
        "stats": {"numSamples": samples, "numSeries": 3, "numChunks": 3},
        "compaction": {"level": 1, "sources": [id]},
        "version": 1
    });
    fs::write(dir.join("meta.json"), serde_json::to_vec_pretty(&meta).expect("json")).expect("meta");
    fs::write(dir.join("chunks/000001"), format!("chunks of {id}").repeat(64)).expect("chunks");
    fs::write(dir.join("index"), format!("index of {id}")).expect("index");
    fs::write(dir.join("tombstones"), [0u8; 8]).expect("tombstones");
    dir
}

/// The two-block data directory used across the scenario tests.
pub fn scenario_data_dir(root: &Path) {
    write_block(root, BLOCK_A, ts("2021-04-01 18:52:31"), ts("2021-04-01 20:52:31"), 120);
    write_block(root, BLOCK_B, ts("2021-03-30 01:05:00"), ts("2021-03-30 03:05:00"), 80);
}

/// Adds a `chunks_head/` file spanning the given millisecond ranges, plus a `wal/` segment.
pub fn write_head(root: &Path, chunks: &[(i64, i64)]) {
    let head = root.join("chunks_head");
    fs::create_dir_all(&head).expect("mkdir head");
    let payload = b"xor-chunk";
    let records: Vec<(u64, i64, i64, &[u8])> = chunks
        .iter()
        .enumerate()
        .map(|(i, (min, max))| (i as u64 + 1, *min, *max, payload.as_slice()))
        .collect();
    fs::write(head.join("000001"), encode_chunk_file(&records)).expect("head chunks");

    let wal = root.join("wal");
    fs::create_dir_all(&wal).expect("mkdir wal");
    fs::write(wal.join("00000000"), b"wal segment").expect("wal");
}

#[cfg(feature = "remote")]
#[allow(unused_imports)]
pub use recording::{Call, RecordingExecutor};

#[cfg(feature = "remote")]
mod recording {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use blockdump::{AccessReview, Error, ExecIo, RemoteExecutor, RemoteTarget, Result};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Review { namespace: String },
        Exec { kind: &'static str, argv: Vec<String>, stdin_bytes: usize },
    }

    struct Script {
        calls: Vec<Call>,
        review: AccessReview,
        probe_output: Option<String>,
        command_output: Vec<u8>,
        failing: HashSet<&'static str>,
    }

    /// Records every transport call and answers from a script.
    #[derive(Clone)]
    pub struct RecordingExecutor {
        script: Arc<Mutex<Script>>,
    }

    impl RecordingExecutor {
        pub fn allowing() -> Self {
            Self::with_review(AccessReview::allowed())
        }

        pub fn denying(reason: &str) -> Self {
            Self::with_review(AccessReview::denied(Some(reason.to_string())))
        }

        fn with_review(review: AccessReview) -> Self {
            Self {
                script: Arc::new(Mutex::new(Script {
                    calls: Vec::new(),
                    review,
                    probe_output: None,
                    command_output: Vec::new(),
                    failing: HashSet::new(),
                })),
            }
        }

        /// An extractor is already installed and reports `output` for `--version`.
        pub fn with_installed_extractor(self, output: &str) -> Self {
            self.script.lock().expect("script").probe_output = Some(output.to_string());
            self
        }

        /// Bytes written to stdout by `extract` and `meta`.
        pub fn with_command_output(self, output: &[u8]) -> Self {
            self.script.lock().expect("script").command_output = output.to_vec();
            self
        }

        /// Commands of this kind exit non-zero.
        pub fn failing(self, kind: &'static str) -> Self {
            self.script.lock().expect("script").failing.insert(kind);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.script.lock().expect("script").calls.clone()
        }

        pub fn exec_kinds(&self) -> Vec<&'static str> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Exec { kind, .. } => Some(kind),
                    Call::Review { .. } => None,
                })
                .collect()
        }

        pub fn uploaded_bytes(&self) -> Vec<usize> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Exec {
                        kind: "upload",
                        stdin_bytes,
                        ..
                    } => Some(stdin_bytes),
                    _ => None,
                })
                .collect()
        }
    }

    fn kind_of(argv: &[String]) -> &'static str {
        match argv.first().map(String::as_str) {
            Some("tar") => "upload",
            Some("rm") => "cleanup",
            Some("sh") => "clear-data",
            _ if argv.iter().any(|arg| arg == "--version") => "probe",
            _ if argv.iter().any(|arg| arg == "--meta") => "meta",
            _ => "extract",
        }
    }

    #[async_trait]
    impl RemoteExecutor for RecordingExecutor {
        async fn review_access(&self, namespace: &str, _timeout: Duration) -> Result<AccessReview> {
            let mut script = self.script.lock().expect("script");
            script.calls.push(Call::Review {
                namespace: namespace.to_string(),
            });
            Ok(script.review.clone())
        }

        async fn exec(&self, _target: &RemoteTarget, argv: &[String], io: ExecIo<'_>) -> Result<()> {
            let kind = kind_of(argv);
            let mut stdin_bytes = 0;
            if let Some(stdin) = io.stdin {
                let mut buf = Vec::new();
                stdin.read_to_end(&mut buf).await?;
                stdin_bytes = buf.len();
            }

            let (fails, output) = {
                let mut script = self.script.lock().expect("script");
                script.calls.push(Call::Exec {
                    kind,
                    argv: argv.to_vec(),
                    stdin_bytes,
                });
                let output = match kind {
                    "probe" => script.probe_output.clone().map(String::into_bytes),
                    "extract" | "meta" => Some(script.command_output.clone()),
                    _ => Some(Vec::new()),
                };
                (script.failing.contains(kind), output)
            };

            let Some(output) = output.filter(|_| !fails) else {
                return Err(Error::RemoteCommand {
                    command: argv.join(" "),
                    code: Some(if kind == "probe" { 127 } else { 1 }),
                });
            };
            if let Some(stdout) = io.stdout {
                stdout.write_all(&output).await?;
                stdout.flush().await?;
            }
            Ok(())
        }
    }
}
