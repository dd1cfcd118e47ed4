#![cfg(feature = "remote")]

mod common;

use std::sync::Arc;

use anyhow::Result;
use blockdump::orchestrator::EXTRACTOR_VERSION;
use blockdump::{
    ArtifactDistributor, ArtifactSource, ChannelState, DistributorConfig, Error, FixedClock, OperationContext,
    Orchestrator, RemoteChannel, RemoteTarget, TimeRange, Timestamp,
};
use sha2::{Digest, Sha256};
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{ts, Call, RecordingExecutor};

const EXTRACTOR: &[u8] = b"\x7fELF pretend extractor";
const ARCHIVE: &[u8] = b"\x1f\x8b pretend archive";

struct Harness {
    executor: RecordingExecutor,
    orchestrator: Orchestrator<RecordingExecutor>,
    _cache: TempDir,
}

fn harness(executor: RecordingExecutor, artifact: ArtifactSource) -> Result<Harness> {
    harness_at(executor, artifact, ts("2021-04-02 00:00:00"))
}

fn harness_at(executor: RecordingExecutor, artifact: ArtifactSource, now: Timestamp) -> Result<Harness> {
    let cache = tempdir()?;
    let target = RemoteTarget::new("monitoring", "prometheus-0");
    let window = TimeRange::new(ts("2021-04-01 19:00:00"), ts("2021-04-01 20:00:00"))?;
    let context = OperationContext::new(target.clone(), "/data")
        .with_window(window)
        .with_artifact(artifact)
        .with_clock(Arc::new(FixedClock(now)));
    let channel = RemoteChannel::new(executor.clone(), target);
    let distributor = ArtifactDistributor::new(DistributorConfig::new(cache.path()))?;
    Ok(Harness {
        executor,
        orchestrator: Orchestrator::new(context, channel, distributor),
        _cache: cache,
    })
}

/// Serves the extractor and its checksum, each expected `hits` times.
async fn artifact_server(body: &[u8], digest_of: &[u8], hits: u64) -> (MockServer, ArtifactSource) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blockdump"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(hits)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blockdump.sha256"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("{:x}", Sha256::digest(digest_of))))
        .expect(hits)
        .mount(&server)
        .await;
    let source = ArtifactSource {
        remote_uri: format!("{}/blockdump", server.uri()),
        checksum_uri: format!("{}/blockdump.sha256", server.uri()),
        force: false,
    };
    (server, source)
}

fn installed() -> String {
    format!("blockdump {EXTRACTOR_VERSION}\n")
}

#[tokio::test]
async fn denied_probe_runs_nothing() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 0).await;
    let mut h = harness(RecordingExecutor::denying("RBAC: forbidden"), source)?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    let result = h.orchestrator.extract(&mut out, &mut err).await;

    match result {
        Err(Error::PermissionDenied { reason }) => assert_eq!(reason.as_deref(), Some("RBAC: forbidden")),
        other => panic!("expected permission denied, got {other:?}"),
    }
    assert_eq!(
        h.executor.calls(),
        [Call::Review {
            namespace: "monitoring".to_string()
        }]
    );
    assert_eq!(h.orchestrator.channel().state(), ChannelState::Denied);
    assert!(out.is_empty());
    Ok(())
}

#[tokio::test]
async fn compatible_extractor_is_reused() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 0).await;
    let executor = RecordingExecutor::allowing()
        .with_installed_extractor(&installed())
        .with_command_output(ARCHIVE);
    let mut h = harness(executor, source)?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    h.orchestrator.extract(&mut out, &mut err).await?;

    assert_eq!(out, ARCHIVE);
    assert_eq!(h.executor.exec_kinds(), ["probe", "extract", "cleanup"]);
    let extract = h
        .executor
        .calls()
        .into_iter()
        .find_map(|call| match call {
            Call::Exec { kind: "extract", argv, .. } => Some(argv),
            _ => None,
        })
        .expect("extract call");
    assert_eq!(extract[0], "/data/blockdump");
    assert!(extract.contains(&ts("2021-04-01 19:00:00").as_nanos().to_string()));
    assert!(extract.contains(&ts("2021-04-01 20:00:00").as_nanos().to_string()));
    Ok(())
}

#[tokio::test]
async fn missing_extractor_is_downloaded_and_uploaded() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 1).await;
    let executor = RecordingExecutor::allowing().with_command_output(ARCHIVE);
    let mut h = harness(executor, source)?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    h.orchestrator.extract(&mut out, &mut err).await?;

    assert_eq!(out, ARCHIVE);
    assert_eq!(h.executor.exec_kinds(), ["probe", "upload", "extract", "cleanup"]);
    assert_eq!(h.executor.uploaded_bytes(), [EXTRACTOR.len()]);
    Ok(())
}

#[tokio::test]
async fn outdated_extractor_is_replaced() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 1).await;
    let executor = RecordingExecutor::allowing()
        .with_installed_extractor("blockdump 0.0.0-old\n")
        .with_command_output(ARCHIVE);
    let mut h = harness(executor, source)?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    h.orchestrator.extract(&mut out, &mut err).await?;
    assert_eq!(h.executor.exec_kinds(), ["probe", "upload", "extract", "cleanup"]);
    Ok(())
}

#[tokio::test]
async fn failed_extraction_still_cleans_up() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 0).await;
    let executor = RecordingExecutor::allowing()
        .with_installed_extractor(&installed())
        .failing("extract");
    let mut h = harness(executor, source)?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    let result = h.orchestrator.extract(&mut out, &mut err).await;

    assert!(matches!(result, Err(Error::RemoteCommand { code: Some(1), .. })));
    assert_eq!(h.executor.exec_kinds(), ["probe", "extract", "cleanup"]);
    Ok(())
}

#[tokio::test]
async fn cleanup_failure_does_not_fail_the_operation() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 0).await;
    let executor = RecordingExecutor::allowing()
        .with_installed_extractor(&installed())
        .with_command_output(b"Total number of blocks  | 2\n")
        .failing("cleanup");
    let mut h = harness(executor, source)?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    h.orchestrator.meta(&mut out, &mut err).await?;

    assert_eq!(out, b"Total number of blocks  | 2\n");
    assert_eq!(h.executor.exec_kinds(), ["probe", "meta", "cleanup"]);
    Ok(())
}

#[tokio::test]
async fn checksum_mismatch_uploads_nothing() -> Result<()> {
    let (_server, source) = artifact_server(b"tampered", EXTRACTOR, 1).await;
    let mut h = harness(RecordingExecutor::allowing(), source)?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    let result = h.orchestrator.extract(&mut out, &mut err).await;

    assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    assert_eq!(h.executor.exec_kinds(), ["probe", "cleanup"]);
    assert!(h.executor.uploaded_bytes().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_artifact_uri_is_a_configuration_error() -> Result<()> {
    let mut h = harness(RecordingExecutor::allowing(), ArtifactSource::default())?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    let result = h.orchestrator.extract(&mut out, &mut err).await;

    assert!(matches!(result, Err(Error::Configuration(_))));
    assert_eq!(h.executor.exec_kinds(), ["probe", "cleanup"]);
    Ok(())
}

#[tokio::test]
async fn future_window_is_rejected_before_any_call() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 0).await;
    // Window ends at 20:00, half an hour after now.
    let mut h = harness_at(RecordingExecutor::allowing(), source, ts("2021-04-01 19:30:00"))?;

    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    let result = h.orchestrator.extract(&mut out, &mut err).await;

    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(h.executor.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn restore_clears_then_uploads_the_dump() -> Result<()> {
    let (_server, source) = artifact_server(EXTRACTOR, EXTRACTOR, 0).await;
    let mut h = harness(RecordingExecutor::allowing(), source)?;
    let dir = tempdir()?;
    let dump = dir.path().join("dump.tar.gz");
    std::fs::write(&dump, ARCHIVE)?;

    let mut err = Vec::<u8>::new();
    h.orchestrator.restore(&dump, &mut err).await?;

    assert_eq!(h.executor.exec_kinds(), ["clear-data", "upload"]);
    assert_eq!(h.executor.uploaded_bytes(), [ARCHIVE.len()]);
    let clear = &h.executor.calls()[1];
    match clear {
        Call::Exec { argv, .. } => assert_eq!(argv[..2], ["sh", "-c"]),
        other => panic!("unexpected call {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn restore_of_missing_dump_never_authorizes() -> Result<()> {
    let mut h = harness(RecordingExecutor::allowing(), ArtifactSource::default())?;
    let dir = tempdir()?;

    let mut err = Vec::<u8>::new();
    let result = h.orchestrator.restore(&dir.path().join("absent.tar.gz"), &mut err).await;

    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(h.executor.calls().is_empty());
    Ok(())
}
