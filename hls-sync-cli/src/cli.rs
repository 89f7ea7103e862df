use std::path::PathBuf;

use clap::{ArgAction, Parser};
use hls_sync_engine::config::DEFAULT_USER_AGENT;
use hls_sync_engine::{
    Granularity, HttpOptions, RecordOptions, SourceOptions, SyncConfig, SyncOptions,
    TimestampMode,
};

fn parse_timestamp_mode(value: &str) -> Result<TimestampMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "local" => Ok(TimestampMode::Local),
        "program" => Ok(TimestampMode::Program),
        "segment" => Ok(TimestampMode::Segment),
        other => Err(format!("expected local, program or segment, got `{other}`")),
    }
}

fn parse_granularity(value: &str) -> Result<Granularity, String> {
    match value.to_ascii_lowercase().as_str() {
        "hour" => Ok(Granularity::Hour),
        "minute" => Ok(Granularity::Minute),
        other => Err(format!("expected hour or minute, got `{other}`")),
    }
}

/// Command line of `hls-sync`. Multi-letter short options of the classic
/// tool are kept as long aliases, e.g. `--UA` or `--SO`.
#[derive(Parser, Debug)]
#[command(
    name = "hls-sync",
    version,
    about = "HTTP Live Streaming (HLS) synchronizer",
    long_about = "Mirror a live HLS stream to a local folder, record it into time-bucketed\n\
                  index playlists, and serve time-shifted playlists over HTTP.\n\
                  \n\
                  Scenarios:\n  \
                  (1) Sync live HLS streams from a remote server.\n  \
                  (2) Record live streams to local disks.",
    disable_version_flag = true
)]
pub struct CliArgs {
    /// Source playlist URLs, tried in order on failure
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Configuration file used instead of the command line options
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(short = 'C', long = "check")]
    pub check: bool,

    #[arg(short = 'v', long = "version", action = ArgAction::Version, help = "Print version")]
    pub version: Option<bool>,

    // Global
    #[arg(short = 'L', long, value_name = "FILE", help = "Log file, console only when unset")]
    pub log_file: Option<PathBuf>,

    #[arg(short = 'V', long, default_value = "info", help = "Log level")]
    pub log_level: String,

    #[arg(short = 'T', long, default_value_t = 5, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[arg(short = 'R', long, default_value_t = 1, help = "Download attempts per segment")]
    pub retries: u32,

    #[arg(long, default_value_t = 1000, help = "Delay between attempts in milliseconds")]
    pub retry_delay_ms: u64,

    #[arg(long, visible_alias = "UA", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    #[arg(long, visible_alias = "MS", default_value_t = 20, help = "Max segments tracked in flight")]
    pub max_segments: usize,

    #[arg(
        long,
        visible_alias = "TT",
        default_value = "program",
        value_parser = parse_timestamp_mode,
        help = "Timestamp source: local, program or segment"
    )]
    pub timestamp_type: TimestampMode,

    #[arg(long, visible_alias = "TF", default_value = "", help = "Timestamp format for segment mode")]
    pub timestamp_format: String,

    #[arg(
        long,
        visible_alias = "TS",
        default_value_t = 0,
        allow_negative_numbers = true,
        help = "Timezone shift in minutes"
    )]
    pub timezone_shift: i64,

    #[arg(long, visible_alias = "TD", default_value_t = 0, help = "Target duration, 0 uses the source's")]
    pub target_duration: u64,

    #[arg(long, visible_alias = "PF", default_value = "%Y-%m-%dT%H:%M:%S%.f")]
    pub program_time_format: String,

    #[arg(long, visible_alias = "PZ", default_value = "UTC", help = "Timezone of PROGRAM-DATE-TIME")]
    pub program_timezone: String,

    // Sync
    #[arg(short = 'S', long = "sync", help = "Enable live mirroring")]
    pub sync: bool,

    #[arg(long, visible_alias = "SO", default_value = ".")]
    pub sync_output: PathBuf,

    #[arg(long, visible_alias = "OI", default_value = "live.m3u8")]
    pub index_name: String,

    #[arg(long, visible_alias = "RS", help = "Synthesize segment names")]
    pub resegment: bool,

    #[arg(long, visible_alias = "RM", help = "Remove segments evicted from the mirror")]
    pub remove_old: bool,

    #[arg(long, visible_alias = "CF", help = "Empty the sync folder at startup")]
    pub clean_folder: bool,

    // Record
    #[arg(long = "record", visible_alias = "RC", help = "Enable recording")]
    pub record: bool,

    #[arg(long, visible_alias = "RO", default_value = ".")]
    pub record_output: PathBuf,

    #[arg(long, visible_alias = "SR", default_value = "%Y/%m/%d/%H/live-#:04.ts")]
    pub segment_rewrite: String,

    #[arg(long, visible_alias = "RI", help = "Write per-bucket index playlists")]
    pub reindex: bool,

    #[arg(long, visible_alias = "RF", default_value = "%Y/%m/%d/%H/index.m3u8")]
    pub reindex_format: String,

    #[arg(long, visible_alias = "RB", default_value = "hour", value_parser = parse_granularity)]
    pub reindex_by: Granularity,

    #[arg(long, visible_alias = "ST", help = "Maintain a rolling time-shift playlist")]
    pub timeshifting: bool,

    #[arg(long, visible_alias = "SF", default_value = "timeshift.m3u8")]
    pub timeshift_filename: String,

    #[arg(long, visible_alias = "SH", default_value_t = 3, help = "Time-shift window in hours")]
    pub timeshift_duration: u64,

    // HTTP
    #[arg(short = 'H', long = "http", help = "Enable the time-shift HTTP service")]
    pub http: bool,

    #[arg(long, visible_alias = "LS", default_value = "unix://./hls-sync.sock")]
    pub listen: String,

    #[arg(long, visible_alias = "SD", default_value_t = 7, help = "Max look-back in days")]
    pub days: u64,

    #[arg(long = "max-hours", visible_alias = "MX", default_value_t = 6, help = "Max playlist span in hours")]
    pub max_hours: u64,

    #[arg(long, visible_alias = "SP", default_value = "")]
    pub segment_prefix: String,

    #[arg(long, visible_alias = "CN", default_value_t = 128)]
    pub cache_num: usize,

    #[arg(long, visible_alias = "CV", default_value_t = 60, help = "Cache validity in seconds")]
    pub cache_valid: u64,
}

impl CliArgs {
    /// Configuration described by the flags alone.
    pub fn to_config(&self) -> SyncConfig {
        SyncConfig {
            log_file: self.log_file.clone(),
            log_level: self.log_level.clone(),
            timeout: self.timeout,
            retries: self.retries,
            retry_delay_ms: self.retry_delay_ms,
            user_agent: self.user_agent.clone(),
            max_segments: self.max_segments,
            timestamp_type: self.timestamp_type,
            timestamp_format: self.timestamp_format.clone(),
            timezone_shift: self.timezone_shift,
            target_duration: self.target_duration,
            program_time_format: self.program_time_format.clone(),
            program_timezone: self.program_timezone.clone(),
            sync: SyncOptions {
                enabled: self.sync,
                output: self.sync_output.clone(),
                index_name: self.index_name.clone(),
                resegment: self.resegment,
                remove_old: self.remove_old,
                clean_folder: self.clean_folder,
            },
            record: RecordOptions {
                enabled: self.record,
                output: self.record_output.clone(),
                segment_rewrite: self.segment_rewrite.clone(),
                reindex: self.reindex,
                reindex_format: self.reindex_format.clone(),
                reindex_by: self.reindex_by,
                timeshifting: self.timeshifting,
                timeshift_filename: self.timeshift_filename.clone(),
                timeshift_duration: self.timeshift_duration,
            },
            source: SourceOptions {
                urls: self.urls.clone(),
            },
            http: HttpOptions {
                enabled: self.http,
                listen: self.listen.clone(),
                days: self.days,
                max: self.max_hours,
                segment_prefix: self.segment_prefix.clone(),
                cache_num: self.cache_num,
                cache_valid: self.cache_valid,
            },
        }
    }
}
