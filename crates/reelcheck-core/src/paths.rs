//! Output file naming.
//!
//! The pipeline writes one file per deliverable, named after the output
//! stub with the ratio spliced in before the extension.

use std::path::{Path, PathBuf};

/// Extension assumed when an output stub has none.
pub const DEFAULT_MEDIA_EXTENSION: &str = "mp4";

/// Marker inserted into the second run's output stub.
pub const SECOND_RUN_MARKER: &str = "_r2";

/// Resolve the file the pipeline produces for `stub` and a ratio suffix.
///
/// `recap.mp4` + `9x16` is `recap_9x16.mp4`; `recap` + `16x9` is
/// `recap_16x9.mp4`. Parent directories are preserved.
pub fn resolve_output(stub: &Path, suffix: &str) -> PathBuf {
    let stem = stub
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = stub
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_MEDIA_EXTENSION.to_string());
    stub.with_file_name(format!("{stem}_{suffix}.{ext}"))
}

/// Output stub for the second run: `recap.mp4` becomes `recap_r2.mp4`.
pub fn second_run_stub(stub: &Path) -> PathBuf {
    let stem = stub
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match stub.extension() {
        Some(ext) => format!("{stem}{SECOND_RUN_MARKER}.{}", ext.to_string_lossy()),
        None => format!("{stem}{SECOND_RUN_MARKER}"),
    };
    stub.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_extension() {
        assert_eq!(
            resolve_output(Path::new("recap.mp4"), "9x16"),
            PathBuf::from("recap_9x16.mp4")
        );
    }

    #[test]
    fn test_resolve_defaults_extension() {
        assert_eq!(
            resolve_output(Path::new("recap"), "16x9"),
            PathBuf::from("recap_16x9.mp4")
        );
    }

    #[test]
    fn test_resolve_keeps_directory_and_extension() {
        assert_eq!(
            resolve_output(Path::new("out/reels/recap.mov"), "1x1"),
            PathBuf::from("out/reels/recap_1x1.mov")
        );
    }

    #[test]
    fn test_resolve_only_last_extension_replaced() {
        assert_eq!(
            resolve_output(Path::new("event.final.mp4"), "9x16"),
            PathBuf::from("event.final_9x16.mp4")
        );
    }

    #[test]
    fn test_second_run_stub() {
        assert_eq!(
            second_run_stub(Path::new("recap.mp4")),
            PathBuf::from("recap_r2.mp4")
        );
        assert_eq!(second_run_stub(Path::new("recap")), PathBuf::from("recap_r2"));
        assert_eq!(
            second_run_stub(Path::new("out/recap_fast.mp4")),
            PathBuf::from("out/recap_fast_r2.mp4")
        );
    }

    #[test]
    fn test_second_run_resolves_distinctly() {
        let first = resolve_output(Path::new("recap.mp4"), "9x16");
        let second = resolve_output(&second_run_stub(Path::new("recap.mp4")), "9x16");
        assert_eq!(second, PathBuf::from("recap_r2_9x16.mp4"));
        assert_ne!(first, second);
    }
}
