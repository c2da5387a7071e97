use tsumugi::{hls::ManifestParser, TsumugiError};

use super::{setup_mock_server, HlsMock};
use crate::test_client;

#[tokio::test]
async fn test_parse_remote_playlist() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(
        r#"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:7
#EXT-X-KEY:METHOD=AES-128,URI="keys/k1.bin",IV=0x0000000000000000000000000000000A
#EXTINF:10.0,
seg0.ts
#EXTINF:9.5,
/absolute/seg1.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:4.0,
https://cdn.example.com/seg2.ts
#EXT-X-ENDLIST
"#,
    )
    .await;

    let parser = ManifestParser::new(test_client());
    let segments = parser.parse(playlist_uri.parse()?).await?;

    assert_eq!(segments.len(), 3);
    assert_eq!(
        segments.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(segments[0].media_sequence, 7);
    assert_eq!(segments[2].media_sequence, 9);

    assert_eq!(segments[0].url, format!("{}/seg0.ts", server.uri()).parse()?);
    assert_eq!(
        segments[1].url,
        format!("{}/absolute/seg1.ts", server.uri()).parse()?
    );
    assert_eq!(segments[2].url.as_str(), "https://cdn.example.com/seg2.ts");
    assert_eq!(segments[1].duration, 9.5);

    let key = segments[0].key.as_ref().unwrap();
    assert!(key.is_aes128());
    assert_eq!(key.uri, format!("{}/keys/k1.bin", server.uri()).parse()?);
    assert_eq!(
        key.iv.as_deref(),
        Some("0x0000000000000000000000000000000A")
    );
    assert_eq!(segments[1].key, segments[0].key);
    assert!(segments[2].key.is_none());

    Ok(())
}

#[tokio::test]
async fn test_parse_empty_playlist() -> anyhow::Result<()> {
    let (playlist_uri, _server) = setup_mock_server(
        "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-ENDLIST
",
    )
    .await;

    let result = ManifestParser::new(test_client())
        .parse(playlist_uri.parse()?)
        .await;
    assert!(matches!(result, Err(TsumugiError::EmptyPlaylist(_))));

    Ok(())
}

#[tokio::test]
async fn test_parse_master_playlist() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(
        r#"#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720
720p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1920x1080
1080p/index.m3u8
"#,
    )
    .await;

    let result = ManifestParser::new(test_client())
        .parse(playlist_uri.parse()?)
        .await;
    let Err(TsumugiError::MasterPlaylist { variants }) = result else {
        panic!("master playlist must be rejected");
    };
    assert_eq!(
        variants,
        vec![
            format!("{}/720p/index.m3u8", server.uri()).parse()?,
            format!("{}/1080p/index.m3u8", server.uri()).parse()?,
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_parse_manifest_not_found() -> anyhow::Result<()> {
    let (_, server) = setup_mock_server("#EXTM3U").await;
    server.mock_status("/missing.m3u8", 404).await;

    let result = ManifestParser::new(test_client())
        .parse(format!("{}/missing.m3u8", server.uri()).parse()?)
        .await;
    assert!(matches!(result, Err(TsumugiError::ManifestFetch { .. })));

    Ok(())
}

#[tokio::test]
async fn test_parse_html_page() -> anyhow::Result<()> {
    let (_, server) = setup_mock_server("#EXTM3U").await;
    server
        .mock("/index.html", "<!DOCTYPE html><html><body>Not here</body></html>")
        .await;

    let result = ManifestParser::new(test_client())
        .parse(format!("{}/index.html", server.uri()).parse()?)
        .await;
    assert!(matches!(result, Err(TsumugiError::ManifestFetch { .. })));

    Ok(())
}
