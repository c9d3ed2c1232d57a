use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::supervisor::SupervisorSnapshot;

/// Writes `snapshot` to `path` as a single atomic rename, so readers (the
/// `status` CLI verb) never observe a torn write. A reader may still see a
/// stale-but-complete file from a prior tick — the file is advisory, not a
/// protocol.
pub async fn write(path: &str, snapshot: &SupervisorSnapshot) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(snapshot)?;
    let target = Path::new(path);
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        target.file_name().and_then(|n| n.to_str()).unwrap_or("status")
    ));

    let mut tmp = fs::File::create(&tmp_path).await?;
    tmp.write_all(&body).await?;
    tmp.flush().await?;
    drop(tmp);

    fs::rename(&tmp_path, target).await
}
