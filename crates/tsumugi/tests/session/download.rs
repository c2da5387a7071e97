use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;
use tsumugi::{DownloadConfig, DownloadSession, TsumugiError};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{
    encrypt,
    hls::{setup_mock_server, HlsMock},
    ts_payload, KEY,
};

const THREE_SEGMENTS: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
seg0.ts
#EXTINF:10.0,
seg1.ts
#EXTINF:10.0,
seg2.ts
#EXT-X-ENDLIST
";

async fn mock_segments(server: &MockServer, count: u64) {
    for index in 0..count {
        server
            .mock_expect(&format!("/seg{index}.ts"), ts_payload(index), 1)
            .await;
    }
}

fn config(workers: u32) -> DownloadConfig {
    DownloadConfig {
        workers,
        retries: 1,
        timeout_secs: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_session_downloads_playlist() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(THREE_SEGMENTS).await;
    mock_segments(&server, 3).await;
    let dir = tempfile::tempdir()?;

    let completed = Arc::new(AtomicUsize::new(0));
    let session = DownloadSession::new(config(2), CancellationToken::new())?.with_progress({
        let completed = completed.clone();
        move |_: usize, _: usize| {
            completed.fetch_add(1, Ordering::SeqCst);
        }
    });
    let report = session.run(playlist_uri.parse()?, dir.path()).await?;

    assert!(report.success);
    assert_eq!(report.total_segments, 3);
    assert_eq!(report.downloaded_segments, 3);
    assert!(report.failed_segments.is_empty());
    assert!(!report.cancelled);
    assert_eq!(report.merged, None);
    assert_eq!(completed.load(Ordering::SeqCst), 3);

    for index in 0..3 {
        let data = tokio::fs::read(dir.path().join(format!("segment_{index:06}.ts"))).await?;
        assert_eq!(data, ts_payload(index));
    }

    let playlist_path = report.playlist.expect("playlist must be written");
    assert_eq!(playlist_path, dir.path().join("playlist.m3u8"));
    let playlist = tokio::fs::read_to_string(playlist_path).await?;
    assert_eq!(
        playlist,
        "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:10.000000,
segment_000000.ts
#EXTINF:10.000000,
segment_000001.ts
#EXTINF:10.000000,
segment_000002.ts
#EXT-X-ENDLIST
"
    );

    Ok(())
}

#[tokio::test]
async fn test_session_resumes_without_requests() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(THREE_SEGMENTS).await;
    // each segment is requested by the first run only
    mock_segments(&server, 3).await;
    let dir = tempfile::tempdir()?;

    let session = DownloadSession::new(config(3), CancellationToken::new())?;
    let first = session.run(playlist_uri.parse()?, dir.path()).await?;
    let second = session.run(playlist_uri.parse()?, dir.path()).await?;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(second.downloaded_segments, 3);

    Ok(())
}

#[tokio::test]
async fn test_session_merges_output() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(THREE_SEGMENTS).await;
    mock_segments(&server, 3).await;
    let dir = tempfile::tempdir()?;
    let output_file = dir.path().join("output.ts");

    let config = DownloadConfig {
        output_file: Some(output_file.clone()),
        ..config(2)
    };
    let report = DownloadSession::new(config, CancellationToken::new())?
        .run(playlist_uri.parse()?, dir.path().join("segments"))
        .await?;

    assert_eq!(report.merged, Some(output_file.clone()));
    let expected: Vec<u8> = (0..3).flat_map(ts_payload).collect();
    assert_eq!(tokio::fs::read(output_file).await?, expected);

    Ok(())
}

#[tokio::test]
async fn test_session_isolates_key_failure() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(
        r#"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
seg0.ts
#EXT-X-KEY:METHOD=AES-128,URI="broken.key"
#EXTINF:10.0,
seg1.ts
#EXTINF:10.0,
seg2.ts
#EXT-X-KEY:METHOD=AES-128,URI="good.key"
#EXTINF:10.0,
seg3.ts
#EXT-X-ENDLIST
"#,
    )
    .await;

    let encrypted_1 = encrypt(&ts_payload(1), &KEY, &1u128.to_be_bytes());
    let encrypted_2 = encrypt(&ts_payload(2), &KEY, &2u128.to_be_bytes());
    server
        .mock("/seg0.ts", ts_payload(0))
        .await
        .mock("/seg1.ts", encrypted_1.clone())
        .await
        .mock("/seg2.ts", encrypted_2.clone())
        .await
        .mock("/seg3.ts", encrypt(&ts_payload(3), &KEY, &3u128.to_be_bytes()))
        .await
        .mock_expect("/good.key", KEY.to_vec(), 1)
        .await;
    // 10 bytes is not an AES-128 key
    server
        .mock_expect("/broken.key", b"0123456789".to_vec(), 1)
        .await;

    let dir = tempfile::tempdir()?;
    let report = DownloadSession::new(config(4), CancellationToken::new())?
        .run(playlist_uri.parse()?, dir.path())
        .await?;

    assert!(!report.success);
    assert_eq!(report.failed_segments, vec![1, 2]);
    assert_eq!(report.undecrypted_segments, vec![1, 2]);
    assert_eq!(report.downloaded_segments, 2);
    assert!(report.playlist.is_some());

    let read = |index: u64| tokio::fs::read(dir.path().join(format!("segment_{index:06}.ts")));
    assert_eq!(read(0).await?, ts_payload(0));
    assert_eq!(read(1).await?, encrypted_1);
    assert_eq!(read(2).await?, encrypted_2);
    assert_eq!(read(3).await?, ts_payload(3));

    Ok(())
}

#[tokio::test]
async fn test_session_empty_playlist_downloads_nothing() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(
        "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-ENDLIST
",
    )
    .await;
    server.mock_expect("/seg0.ts", ts_payload(0), 0).await;
    let dir = tempfile::tempdir()?;

    let result = DownloadSession::new(config(2), CancellationToken::new())?
        .run(playlist_uri.parse()?, dir.path())
        .await;

    assert!(matches!(result, Err(TsumugiError::EmptyPlaylist(_))));
    assert!(!dir.path().join("playlist.m3u8").exists());

    Ok(())
}

#[tokio::test]
async fn test_session_sends_referer_of_source_page() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    for (mock_path, body) in [
        ("/playlist.m3u8", THREE_SEGMENTS.as_bytes().to_vec()),
        ("/seg0.ts", ts_payload(0)),
        ("/seg1.ts", ts_payload(1)),
        ("/seg2.ts", ts_payload(2)),
    ] {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .and(header("referer", "https://www.example.com"))
            .and(header("origin", "https://www.example.com"))
            .and(header("x-custom", "tsumugi"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;
    }

    let mut config = config(2);
    config.source_page = Some("https://www.example.com/watch/1".to_string());
    config
        .headers
        .insert("X-Custom".to_string(), "tsumugi".to_string());

    let dir = tempfile::tempdir()?;
    let report = DownloadSession::new(config, CancellationToken::new())?
        .run(format!("{}/playlist.m3u8", server.uri()).parse()?, dir.path())
        .await?;
    assert!(report.success);

    Ok(())
}

#[tokio::test]
async fn test_session_cancelled_before_start() -> anyhow::Result<()> {
    let (playlist_uri, _server) = setup_mock_server(THREE_SEGMENTS).await;
    let token = CancellationToken::new();
    token.cancel();

    let dir = tempfile::tempdir()?;
    let result = DownloadSession::new(config(2), token)?
        .run(playlist_uri.parse()?, dir.path())
        .await;
    assert!(matches!(result, Err(TsumugiError::Cancelled)));

    Ok(())
}

#[tokio::test]
async fn test_session_rejects_invalid_manual_key() {
    let config = DownloadConfig {
        key: Some("0011".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        DownloadSession::new(config, CancellationToken::new()),
        Err(TsumugiError::InvalidHexKey(_))
    ));
}
