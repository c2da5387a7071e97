use std::path::{Path, PathBuf};

use crate::{error::TsumugiResult, segment::Segment};

pub const LOCAL_PLAYLIST_NAME: &str = "playlist.m3u8";

/// Render a VOD playlist pointing at the downloaded segment files.
pub fn render_local_playlist(segments: &[Segment]) -> String {
    let target_duration = segments
        .iter()
        .map(|segment| segment.duration)
        .fold(0f32, f32::max)
        .ceil()
        .max(1.) as u64;

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    playlist.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
    for segment in segments {
        playlist.push_str(&format!(
            "#EXTINF:{:.6},\n{}\n",
            segment.duration,
            segment.file_name()
        ));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Write `playlist.m3u8` into `dir`, replacing any previous one.
pub async fn write_local_playlist<P>(segments: &[Segment], dir: P) -> TsumugiResult<PathBuf>
where
    P: AsRef<Path>,
{
    let path = dir.as_ref().join(LOCAL_PLAYLIST_NAME);
    tokio::fs::write(&path, render_local_playlist(segments)).await?;
    log::info!("Local playlist created at {}", path.display());
    Ok(path)
}
