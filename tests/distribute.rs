#![cfg(feature = "remote")]

use std::time::Duration;

use anyhow::Result;
use blockdump::distribute::parse_checksum_document;
use blockdump::{ArtifactDistributor, DistributorConfig, Error};
use sha2::{Digest, Sha256};
use tempfile::tempdir;
use tokio::io::AsyncReadExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARTIFACT: &[u8] = b"blockdump extractor artifact bytes";

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

async fn serve(server: &MockServer, body: &[u8], checksum: String, downloads: u64) {
    Mock::given(method("GET"))
        .and(path("/releases/blockdump.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(downloads)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/releases/blockdump.tar.gz.sha256"))
        .respond_with(ResponseTemplate::new(200).set_body_string(checksum))
        .expect(downloads)
        .mount(server)
        .await;
}

fn uris(server: &MockServer) -> (String, String) {
    (
        format!("{}/releases/blockdump.tar.gz", server.uri()),
        format!("{}/releases/blockdump.tar.gz.sha256", server.uri()),
    )
}

#[tokio::test]
async fn downloads_verifies_and_caches() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, ARTIFACT, sha256_hex(ARTIFACT), 1).await;
    let cache = tempdir()?;
    let distributor = ArtifactDistributor::new(DistributorConfig::new(cache.path()))?;
    let (remote, checksum) = uris(&server);

    let mut first = distributor.fetch(false, &remote, &checksum).await?;
    assert!(first.downloaded);
    assert_eq!(first.artifact.local_path, cache.path().join("blockdump.tar.gz"));
    let mut content = Vec::new();
    first.file.read_to_end(&mut content).await?;
    assert_eq!(content, ARTIFACT);
    assert!(!cache.path().join("blockdump.tar.gz.part").exists());

    // Second call is served from the cache: the mocks expect one request each.
    let second = distributor.fetch(false, &remote, &checksum).await?;
    assert!(!second.downloaded);
    assert_eq!(second.artifact.local_path, first.artifact.local_path);
    Ok(())
}

#[tokio::test]
async fn force_downloads_again() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, ARTIFACT, format!("{}  blockdump.tar.gz\n", sha256_hex(ARTIFACT)), 2).await;
    let cache = tempdir()?;
    let distributor = ArtifactDistributor::new(DistributorConfig::new(cache.path()))?;
    let (remote, checksum) = uris(&server);

    assert!(distributor.fetch(false, &remote, &checksum).await?.downloaded);
    assert!(distributor.fetch(true, &remote, &checksum).await?.downloaded);
    Ok(())
}

#[tokio::test]
async fn corrupted_download_fails_checksum() -> Result<()> {
    let mut corrupted = ARTIFACT.to_vec();
    corrupted[0] ^= 0x01;

    let server = MockServer::start().await;
    serve(&server, &corrupted, sha256_hex(ARTIFACT), 1).await;
    let cache = tempdir()?;
    let distributor = ArtifactDistributor::new(DistributorConfig::new(cache.path()))?;
    let (remote, checksum) = uris(&server);

    let err = distributor.fetch(false, &remote, &checksum).await.unwrap_err();
    match &err {
        Error::ChecksumMismatch { expected, actual } => {
            assert_eq!(expected, &sha256_hex(ARTIFACT));
            assert_eq!(actual, &sha256_hex(&corrupted));
        }
        other => panic!("expected checksum mismatch, got {other}"),
    }
    assert!(!cache.path().join("blockdump.tar.gz").exists());
    Ok(())
}

#[tokio::test]
async fn non_success_status_fails_fast() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/blockdump.tar.gz"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let cache = tempdir()?;
    let distributor = ArtifactDistributor::new(DistributorConfig::new(cache.path()))?;
    let (remote, checksum) = uris(&server);

    let err = distributor.fetch(false, &remote, &checksum).await.unwrap_err();
    assert!(matches!(err, Error::Download { status: 404, .. }));
    assert!(!cache.path().join("blockdump.tar.gz").exists());
    Ok(())
}

#[tokio::test]
async fn slow_server_times_out() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/blockdump.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    let cache = tempdir()?;
    let config = DistributorConfig {
        cache_dir: cache.path().to_path_buf(),
        timeout: Duration::from_millis(200),
    };
    let distributor = ArtifactDistributor::new(config)?;
    let (remote, checksum) = uris(&server);

    let err = distributor.fetch(false, &remote, &checksum).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
    Ok(())
}

#[test]
fn checksum_document_takes_first_token() {
    let digest = sha256_hex(ARTIFACT);
    assert_eq!(
        parse_checksum_document(&format!("{digest} *blockdump.tar.gz")).expect("digest"),
        digest
    );
}
