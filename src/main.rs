use clap::Parser;
use s3sync_lib::logging::{self, LogLevel};
use s3sync_lib::{FileConfig, SyncConfig, SyncEngine, SyncError, SyncReport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// 在 S3 与本地目录之间同步，只传输新增或变化的对象
#[derive(Parser, Debug)]
#[command(name = "s3sync", version)]
#[command(override_usage = "s3sync [OPTIONS] SOURCE TARGET")]
struct Cli {
    /// 源位置：s3://bucket/prefix 或本地目录
    source: String,

    /// 目标位置：s3://bucket/prefix 或本地目录
    target: String,

    /// 并发传输数（默认 20）
    #[arg(short = 'c', long = "concurrent")]
    concurrent: Option<usize>,

    /// 日志级别: error, warn, info, debug, trace
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,

    /// AWS access key，为空时读取 AWS_ACCESS_KEY_ID
    #[arg(long = "accesskey")]
    access_key: Option<String>,

    /// AWS secret key，为空时读取 AWS_SECRET_ACCESS_KEY
    #[arg(long = "secretkey")]
    secret_key: Option<String>,

    /// 镜像模式：删除目标中源不存在的对象
    #[arg(long)]
    mirror: bool,

    /// 单个传输超时（秒）
    #[arg(long = "timeout")]
    timeout_secs: Option<u64>,

    /// S3 区域
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// S3 兼容服务的 endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// 忽略 S3 ETag，只按大小比较（SSE-KMS / SSE-C 加密的桶）
    #[arg(long)]
    ignore_etag: bool,

    /// JSON 配置文件，命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// 完成后在标准输出打印 JSON 报告
    #[arg(long)]
    report_json: bool,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    fn sync_config(&self, file: &FileConfig) -> SyncConfig {
        let mut config = file.to_sync_config();
        if let Some(n) = self.concurrent {
            config.concurrency = n;
        }
        if self.mirror {
            config.mirror = true;
        }
        if let Some(secs) = self.timeout_secs {
            config.item_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(region) = &self.region {
            config.storage.region = region.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.storage.endpoint = Some(endpoint.clone());
        }
        if self.ignore_etag {
            config.storage.ignore_etag = true;
        }
        config.storage.access_key = self.access_key.clone();
        config.storage.secret_key = self.secret_key.clone();
        config
    }
}

fn print_report(report: &SyncReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("序列化报告失败: {}", e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let file_config = match cli.config.as_deref().map(FileConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = match cli
        .log_level
        .as_deref()
        .unwrap_or(&file_config.log_level)
        .parse::<LogLevel>()
    {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    // guard 在 main 返回时刷新日志
    let _log_guard = logging::init(level);
    if level != LogLevel::Info {
        info!("设置日志级别: {}", level);
    }

    let config = cli.sync_config(&file_config);
    info!("并发传输数: {}", config.concurrency);
    if config.mirror {
        info!("镜像模式：将删除目标中多余的对象");
    }

    let engine = SyncEngine::new(config);

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，等待进行中的传输完成...");
            cancel.cancel();
        }
    });

    match engine.sync(&cli.source, &cli.target).await {
        Ok(report) => {
            if cli.report_json {
                print_report(&report);
            }
            info!("同步成功完成");
            ExitCode::SUCCESS
        }
        Err(SyncError::PartialFailure(report)) => {
            for (key, reason) in &report.failed {
                error!("传输失败: {}: {}", key, reason);
            }
            if cli.report_json {
                print_report(&report);
            }
            error!(
                "{} 个对象同步失败 (共 {} 个)",
                report.failed.len(),
                report.total_actions
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("同步失败: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file_config() {
        let cli = Cli::parse_from([
            "s3sync",
            "--concurrent",
            "5",
            "--accesskey",
            "ak",
            "--timeout",
            "0",
            "--ignore-etag",
            "s3://bucket-a/x",
            "/tmp/out",
        ]);
        let file = FileConfig {
            concurrent: 8,
            mirror: true,
            timeout_secs: 30,
            ..Default::default()
        };

        let config = cli.sync_config(&file);
        assert_eq!(config.concurrency, 5);
        assert!(config.mirror);
        assert!(config.item_timeout.is_none());
        assert_eq!(config.storage.access_key.as_deref(), Some("ak"));
        assert!(config.storage.ignore_etag);
        assert_eq!(cli.source, "s3://bucket-a/x");
        assert_eq!(cli.target, "/tmp/out");
    }

    #[test]
    fn test_defaults_from_file() {
        let cli = Cli::parse_from(["s3sync", "a", "b"]);
        let config = cli.sync_config(&FileConfig::default());
        assert_eq!(config.concurrency, 20);
        assert!(!config.mirror);
    }

    #[test]
    fn test_requires_source_and_target() {
        assert!(Cli::try_parse_from(["s3sync", "only-one"]).is_err());
    }
}
