use std::path::Path;

use tokio::{fs::File, io::AsyncWriteExt};

use crate::{error::TsumugiResult, segment::Segment};

/// Concat downloaded segments into a single transport stream, in index order.
///
/// Returns the number of bytes written. Every segment file must exist in `dir`.
pub async fn concat_segments<P, O>(segments: &[Segment], dir: P, output: O) -> TsumugiResult<u64>
where
    P: AsRef<Path>,
    O: AsRef<Path>,
{
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|segment| segment.index);

    log::info!("Merging {} chunks...", ordered.len());
    let mut output_file = File::create(output.as_ref()).await?;
    let mut written = 0;
    for segment in ordered {
        let mut file = File::open(segment.path_in(&dir)).await?;
        written += tokio::io::copy(&mut file, &mut output_file).await?;
    }
    output_file.flush().await?;

    log::info!(
        "All finished. Please checkout your files at {}",
        output.as_ref().display()
    );
    Ok(written)
}
