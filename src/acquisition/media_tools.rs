//! External download and loudness-normalization tools.
//!
//! Every tool invocation runs to completion on the calling worker thread; the
//! tools' own network and I/O timeouts bound it.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, warn};
use serde::Deserialize;

use crate::cache::cache_naming::is_media_extension;
use crate::config::{NormalizationConfig, ToolsConfig};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
const STDERR_TAIL_CHARS: usize = 400;

/// Captured result of one finished tool process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Last part of stderr, enough to explain a failure in one log line.
    pub fn stderr_tail(&self) -> String {
        let trimmed = self.stderr.trim();
        let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
        trimmed.chars().skip(skip).collect::<String>().replace('\n', " | ")
    }
}

/// Runs `program` with `args` and captures its output. Spawn failures are errors;
/// non-zero exits are reported through [`ToolOutput::success`].
pub fn run_tool(program: &str, args: &[String]) -> Result<ToolOutput, String> {
    debug!("Tools: running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|error| format!("failed to start {program}: {error}"))?;
    Ok(ToolOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Values reported by the first loudnorm pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMeasurement {
    pub input_i: f64,
    pub input_tp: f64,
    pub input_lra: f64,
    pub input_thresh: f64,
    pub target_offset: f64,
}

#[derive(Debug, Deserialize)]
struct LoudnormReport {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
    target_offset: String,
}

fn parse_measured_value(field: &str, value: &str) -> Result<f64, String> {
    let parsed = value
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("loudnorm field {field}={value:?} is not a number: {error}"))?;
    if !parsed.is_finite() {
        return Err(format!(
            "loudnorm field {field}={value:?} is not finite (silent input?)"
        ));
    }
    Ok(parsed)
}

/// Extracts the JSON block the first loudnorm pass prints at the end of stderr.
pub fn parse_loudnorm_report(stderr: &str) -> Result<LoudnessMeasurement, String> {
    let start = stderr
        .rfind('{')
        .ok_or_else(|| "loudnorm report not found in tool output".to_string())?;
    let end = stderr[start..]
        .find('}')
        .map(|offset| start + offset + 1)
        .ok_or_else(|| "loudnorm report is truncated".to_string())?;
    let report: LoudnormReport = serde_json::from_str(&stderr[start..end])
        .map_err(|error| format!("invalid loudnorm report: {error}"))?;
    Ok(LoudnessMeasurement {
        input_i: parse_measured_value("input_i", &report.input_i)?,
        input_tp: parse_measured_value("input_tp", &report.input_tp)?,
        input_lra: parse_measured_value("input_lra", &report.input_lra)?,
        input_thresh: parse_measured_value("input_thresh", &report.input_thresh)?,
        target_offset: parse_measured_value("target_offset", &report.target_offset)?,
    })
}

pub fn watch_url(id: &str) -> String {
    format!("{WATCH_URL_PREFIX}{}", urlencoding::encode(id))
}

fn format_selector(max_height: u32) -> String {
    format!(
        "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<={h}]+bestaudio/best[height<={h}]",
        h = max_height
    )
}

pub fn download_args(id: &str, output_prefix: &Path, max_height: u32) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--no-progress".to_string(),
        "-f".to_string(),
        format_selector(max_height),
        "--merge-output-format".to_string(),
        "mp4".to_string(),
        "-o".to_string(),
        format!("{}.%(ext)s", output_prefix.display()),
        watch_url(id),
    ]
}

fn loudnorm_targets(targets: &NormalizationConfig) -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}",
        targets.integrated_lufs, targets.true_peak_db, targets.loudness_range
    )
}

pub fn measure_args(input: &Path, targets: &NormalizationConfig) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-af".to_string(),
        format!("{}:print_format=json", loudnorm_targets(targets)),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

pub fn apply_args(
    input: &Path,
    output: &Path,
    targets: &NormalizationConfig,
    measured: &LoudnessMeasurement,
) -> Vec<String> {
    let filter = format!(
        "{}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true:print_format=summary",
        loudnorm_targets(targets),
        measured.input_i,
        measured.input_tp,
        measured.input_lra,
        measured.input_thresh,
        measured.target_offset
    );
    vec![
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-af".to_string(),
        filter,
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ]
}

/// Finds the finished file the download tool wrote for `output_prefix`.
pub fn find_download_output(output_prefix: &Path) -> Option<PathBuf> {
    let directory = output_prefix.parent()?;
    let prefix = format!("{}.", output_prefix.file_name()?.to_str()?);
    let mut candidates: Vec<(u64, PathBuf)> = std::fs::read_dir(directory)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            let extension = path.extension()?.to_str()?;
            if !name.starts_with(&prefix) || !is_media_extension(extension) {
                return None;
            }
            let size = entry.metadata().ok()?.len();
            (size > 0).then_some((size, path))
        })
        .collect();
    candidates.sort();
    candidates.pop().map(|(_, path)| path)
}

/// Download and normalization processes used by the pipeline.
pub trait MediaTools: Send + Sync {
    /// Both executables respond.
    fn probe(&self) -> bool;
    /// Downloads `id` next to `output_prefix` and returns the finished file.
    fn download(&self, id: &str, output_prefix: &Path, max_height: u32) -> Result<PathBuf, String>;
    /// Two-pass loudness normalization of `input` into `output`.
    fn normalize(
        &self,
        input: &Path,
        output: &Path,
        targets: &NormalizationConfig,
    ) -> Result<LoudnessMeasurement, String>;
}

/// `yt-dlp` + `ffmpeg` executables.
pub struct ProcessMediaTools {
    ytdlp_path: String,
    ffmpeg_path: String,
}

impl ProcessMediaTools {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }

    pub fn ytdlp_path(&self) -> &str {
        &self.ytdlp_path
    }

    fn responds(program: &str, version_flag: &str) -> bool {
        match run_tool(program, &[version_flag.to_string()]) {
            Ok(output) if output.success => true,
            Ok(output) => {
                debug!(
                    "Tools: {} {} exited with {:?}",
                    program, version_flag, output.exit_code
                );
                false
            }
            Err(error) => {
                debug!("Tools: {}", error);
                false
            }
        }
    }
}

impl MediaTools for ProcessMediaTools {
    fn probe(&self) -> bool {
        Self::responds(&self.ytdlp_path, "--version") && Self::responds(&self.ffmpeg_path, "-version")
    }

    fn download(&self, id: &str, output_prefix: &Path, max_height: u32) -> Result<PathBuf, String> {
        let output = run_tool(&self.ytdlp_path, &download_args(id, output_prefix, max_height))?;
        if !output.success {
            return Err(format!(
                "download tool exited with {:?}: {}",
                output.exit_code,
                output.stderr_tail()
            ));
        }
        find_download_output(output_prefix).ok_or_else(|| {
            format!(
                "download tool reported success but no file matches {}.*",
                output_prefix.display()
            )
        })
    }

    fn normalize(
        &self,
        input: &Path,
        output: &Path,
        targets: &NormalizationConfig,
    ) -> Result<LoudnessMeasurement, String> {
        let measure = run_tool(&self.ffmpeg_path, &measure_args(input, targets))?;
        if !measure.success {
            return Err(format!(
                "loudness measurement exited with {:?}: {}",
                measure.exit_code,
                measure.stderr_tail()
            ));
        }
        let measured = parse_loudnorm_report(&measure.stderr)?;
        debug!(
            "Tools: measured {} at I={} TP={} LRA={}",
            input.display(),
            measured.input_i,
            measured.input_tp,
            measured.input_lra
        );

        let apply = run_tool(&self.ffmpeg_path, &apply_args(input, output, targets, &measured))?;
        if !apply.success {
            return Err(format!(
                "loudness normalization exited with {:?}: {}",
                apply.exit_code,
                apply.stderr_tail()
            ));
        }
        let written = std::fs::metadata(output).map(|metadata| metadata.len()).unwrap_or(0);
        if written == 0 {
            warn!("Tools: normalization produced no output at {}", output.display());
            return Err(format!("normalized output {} is missing or empty", output.display()));
        }
        Ok(measured)
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_args, download_args, find_download_output, parse_loudnorm_report, watch_url};
    use crate::config::NormalizationConfig;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    const FIRST_PASS_STDERR: &str = r#"Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'in.mp4':
  Duration: 00:03:12.04, start: 0.000000, bitrate: 1210 kb/s
[Parsed_loudnorm_0 @ 0x600000c8c000]
{
	"input_i" : "-9.84",
	"input_tp" : "0.41",
	"input_lra" : "5.70",
	"input_thresh" : "-20.01",
	"output_i" : "-14.22",
	"output_tp" : "-1.00",
	"output_lra" : "5.20",
	"output_thresh" : "-24.35",
	"normalization_type" : "dynamic",
	"target_offset" : "0.22"
}
"#;

    fn unique_temp_dir(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after UNIX_EPOCH")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "scenecast_tools_{}_{}_{}",
            test_name,
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    #[test]
    fn test_parse_loudnorm_report_reads_measured_values() {
        let measured = parse_loudnorm_report(FIRST_PASS_STDERR).expect("report should parse");
        assert_eq!(measured.input_i, -9.84);
        assert_eq!(measured.input_tp, 0.41);
        assert_eq!(measured.input_lra, 5.70);
        assert_eq!(measured.input_thresh, -20.01);
        assert_eq!(measured.target_offset, 0.22);
    }

    #[test]
    fn test_parse_loudnorm_report_rejects_missing_or_silent_input() {
        assert!(parse_loudnorm_report("no json here").is_err());
        let silent = FIRST_PASS_STDERR.replace("\"-9.84\"", "\"-inf\"");
        assert!(parse_loudnorm_report(&silent).is_err());
    }

    #[test]
    fn test_apply_args_carry_targets_measurements_and_codecs() {
        let measured = parse_loudnorm_report(FIRST_PASS_STDERR).expect("report should parse");
        let args = apply_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            &NormalizationConfig::default(),
            &measured,
        );
        let filter = &args[args.iter().position(|arg| arg == "-af").expect("filter flag") + 1];
        assert!(filter.starts_with("loudnorm=I=-14:TP=-1:LRA=11:measured_I=-9.84"));
        assert!(filter.contains("linear=true"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy -c:a aac -b:a 192k"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_download_args_cap_height_and_name_output() {
        let args = download_args("abc_123", Path::new("/cache/.incoming/abc_123.download"), 720);
        assert!(args.iter().any(|arg| arg.contains("height<=720")));
        assert!(args.contains(&"/cache/.incoming/abc_123.download.%(ext)s".to_string()));
        assert_eq!(args.last(), Some(&watch_url("abc_123")));
        assert_eq!(watch_url("a b"), "https://www.youtube.com/watch?v=a%20b");
    }

    #[test]
    fn test_find_download_output_skips_partials_and_other_ids() {
        let dir = unique_temp_dir("find");
        std::fs::write(dir.join("x.download.mp4.part"), b"partial").expect("write");
        std::fs::write(dir.join("y.download.mp4"), b"other").expect("write");
        assert!(find_download_output(&dir.join("x.download")).is_none());

        std::fs::write(dir.join("x.download.mp4"), b"finished").expect("write");
        assert_eq!(
            find_download_output(&dir.join("x.download")),
            Some(dir.join("x.download.mp4"))
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
