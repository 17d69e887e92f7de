use std::path::{Path, PathBuf};

/// Public URL of the playlist as served by the artifact routes.
pub const PUBLIC_PLAYLIST_PATH: &str = "/stream.m3u8";
pub const PLAYLIST_FILE: &str = "stream.m3u8";
pub const SEGMENT_FILE_PATTERN: &str = "stream%d.ts";
pub const SEGMENT_SECONDS: u32 = 2;
pub const PLAYLIST_SEGMENTS: u32 = 10;

/// A fully-resolved transcoder command line for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
}

impl TranscodeInvocation {
    /// RTSP in, HLS out: TCP transport, video copied, audio to AAC, 2s
    /// segments with a rolling window of 10, superseded segments deleted.
    pub fn hls(program: &Path, source: &str, output_dir: &Path) -> Self {
        let segment_pattern = output_dir.join(SEGMENT_FILE_PATTERN);
        let playlist = output_dir.join(PLAYLIST_FILE);
        let args = vec![
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            SEGMENT_SECONDS.to_string(),
            "-hls_list_size".to_string(),
            PLAYLIST_SEGMENTS.to_string(),
            "-hls_flags".to_string(),
            "delete_segments+append_list".to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().into_owned(),
            "-loglevel".to_string(),
            "warning".to_string(),
            playlist.to_string_lossy().into_owned(),
        ];
        Self {
            program: program.to_path_buf(),
            args,
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(PLAYLIST_FILE)
    }

    pub fn command_line(&self) -> String {
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}
