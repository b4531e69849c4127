use std::io::Write;
use std::path::PathBuf;

use lidar_types::Frame;

/// The core's one self-defined on-disk artefact: an ASCII point cloud,
/// `<x> <y> <z> <intensity>` with six decimals per the spec's wire/format
/// section. Requests are single-shot or an N-frame batch.
#[derive(Debug, Clone)]
pub enum AsciiExportRequest {
    Single { path: PathBuf, header: Option<String> },
    Batch { path_prefix: PathBuf, remaining: u32, header: Option<String> },
}

/// Write one frame's points as `<x> <y> <z> <intensity>`, six decimal places,
/// with an optional header line naming additional columns.
pub fn write_ascii_frame(frame: &Frame, path: &std::path::Path, header: Option<&str>) -> std::io::Result<()> {
    let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
    if let Some(h) = header {
        writeln!(f, "# {h}")?;
    }
    for p in &frame.points {
        writeln!(f, "{:.6} {:.6} {:.6} {}", p.x, p.y, p.z, p.intensity)?;
    }
    f.flush()
}

/// Drains (at most) one frame's worth of work against a pending export
/// request, returning the updated request (`None` once exhausted).
pub fn service_export_request(
    frame: &Frame,
    request: AsciiExportRequest,
) -> Option<AsciiExportRequest> {
    match request {
        AsciiExportRequest::Single { path, header } => {
            if let Err(e) = write_ascii_frame(frame, &path, header.as_deref()) {
                tracing::warn!(target: "lidar::ops", error = %e, path = %path.display(), "ascii export failed");
            }
            None
        }
        AsciiExportRequest::Batch { path_prefix, remaining, header } => {
            let path = path_prefix.with_file_name(format!(
                "{}-{}.{}",
                path_prefix.file_stem().and_then(|s| s.to_str()).unwrap_or("frame"),
                frame.frame_id,
                path_prefix.extension().and_then(|s| s.to_str()).unwrap_or("xyz"),
            ));
            if let Err(e) = write_ascii_frame(frame, &path, header.as_deref()) {
                tracing::warn!(target: "lidar::ops", error = %e, path = %path.display(), "ascii export failed");
            }
            if remaining <= 1 {
                None
            } else {
                Some(AsciiExportRequest::Batch {
                    path_prefix,
                    remaining: remaining - 1,
                    header,
                })
            }
        }
    }
}
