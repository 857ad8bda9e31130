// ffmpeg subtitle burn-in
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::BurnConfig;
use crate::error::{Result, TransubError};

const OUTLINE_COLOR: &str = "&H000000";
const SHADOW_COLOR: &str = "&H80000000";
const MARGIN_V: u32 = 27;
const STDERR_LIMIT: usize = 500;

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| {
            TransubError::Media(format!(
                "FFmpeg not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(TransubError::Media("FFmpeg check failed".to_string()));
    }

    debug!("FFmpeg is available");
    Ok(())
}

/// Convert `#RRGGBB` into the `&HBBGGRR` form ASS styles expect.
/// Values already in ASS form pass through.
pub fn hex_to_ass_color(hex: &str) -> String {
    let Some(rgb) = hex.strip_prefix('#') else {
        return hex.to_string();
    };
    if rgb.len() != 6 || !rgb.chars().all(|c| c.is_ascii_hexdigit()) {
        return "&HFFFFFF".to_string();
    }
    format!("&H{}{}{}", &rgb[4..6], &rgb[2..4], &rgb[0..2])
}

/// Quote a path for use inside the `subtitles=` filter: forward slashes, and
/// an escaped drive-letter colon.
pub fn escape_filter_path(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\\', "/");
    let bytes = escaped.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        format!("{}\\:{}", &escaped[..1], &escaped[2..])
    } else {
        escaped
    }
}

/// The `-vf` graph: source subtitles, then translation subtitles on top.
pub fn subtitle_filter(src_srt: &Path, trans_srt: &Path, style: &BurnConfig) -> String {
    let font = &style.font_name;
    let outline = style.outline_width;
    format!(
        "subtitles='{src}':force_style='FontSize={src_size},FontName={font},\
         PrimaryColour={src_color},OutlineColour={OUTLINE_COLOR},OutlineWidth={outline},\
         ShadowColour={SHADOW_COLOR},BorderStyle=1',\
         subtitles='{trans}':force_style='FontSize={trans_size},FontName={font},\
         PrimaryColour={trans_color},OutlineColour={OUTLINE_COLOR},OutlineWidth={outline},\
         ShadowColour={SHADOW_COLOR},BorderStyle=1,Alignment=2,MarginV={MARGIN_V}'",
        src = escape_filter_path(src_srt),
        trans = escape_filter_path(trans_srt),
        src_size = style.src_font_size,
        trans_size = style.trans_font_size,
        src_color = hex_to_ass_color(&style.src_font_color),
        trans_color = hex_to_ass_color(&style.trans_font_color),
    )
}

/// A burn-in job: one video plus the source and translation tracks.
#[derive(Debug, Clone)]
pub struct BurnRequest {
    pub video: PathBuf,
    pub src_srt: PathBuf,
    pub trans_srt: PathBuf,
    pub output: PathBuf,
}

/// Render both subtitle tracks into the video. Blocking; run it off the
/// async runtime.
pub fn burn_subtitles(request: &BurnRequest, style: &BurnConfig) -> Result<()> {
    for path in [&request.video, &request.src_srt, &request.trans_srt] {
        if !path.exists() {
            return Err(TransubError::FileNotFound(path.display().to_string()));
        }
    }
    check_ffmpeg()?;

    if let Some(parent) = request.output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("Burning subtitles into {:?}", request.output);
    let started = Instant::now();

    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(&request.video)
        .arg("-vf")
        .arg(subtitle_filter(&request.src_srt, &request.trans_srt, style))
        .arg("-y")
        .arg(&request.output)
        .output()
        .map_err(|e| TransubError::Media(format!("Failed to run FFmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().take(STDERR_LIMIT).collect();
        return Err(TransubError::Media(format!("FFmpeg execution failed: {tail}")));
    }

    info!(
        "Burn-in finished in {:.2}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_ass_color() {
        assert_eq!(hex_to_ass_color("#FF8800"), "&H0088FF");
        assert_eq!(hex_to_ass_color("&H00FFFF"), "&H00FFFF");
        assert_eq!(hex_to_ass_color("#zzz"), "&HFFFFFF");
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(
            escape_filter_path(Path::new(r"D:\videos\src.srt")),
            r"D\:/videos/src.srt"
        );
        assert_eq!(escape_filter_path(Path::new("out/src.srt")), "out/src.srt");
    }

    #[test]
    fn test_subtitle_filter_styles_both_tracks() {
        let style = BurnConfig::default();
        let filter = subtitle_filter(Path::new("out/src.srt"), Path::new("out/trans.srt"), &style);
        assert!(filter.starts_with("subtitles='out/src.srt':force_style='FontSize=15"));
        assert!(filter.contains("subtitles='out/trans.srt':force_style='FontSize=17"));
        assert!(filter.contains("PrimaryColour=&H00FFFF"));
        assert!(filter.ends_with("MarginV=27'"));
    }

    #[test]
    fn test_missing_subtitles_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let request = BurnRequest {
            video: dir.path().join("in.mp4"),
            src_srt: dir.path().join("src.srt"),
            trans_srt: dir.path().join("trans.srt"),
            output: dir.path().join("output_sub.mp4"),
        };
        assert!(matches!(
            burn_subtitles(&request, &BurnConfig::default()),
            Err(TransubError::FileNotFound(_))
        ));
    }
}
