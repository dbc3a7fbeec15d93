use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "devpipe")]
#[command(author, version, about = "Expose a local HTTP service through a devpipe relay", long_about = None)]
pub struct Cli {
    /// 本地服务端口（默认 3000）
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<String>,

    /// 中继 WebSocket 地址
    #[arg(short, long, value_name = "URL")]
    pub server: Option<String>,

    /// 配置文件路径（TOML）
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// 启动前清除已保存的隧道身份
    #[arg(long)]
    pub clear_config: bool,

    /// 身份只保存在内存中，不写入磁盘
    #[arg(long)]
    pub ephemeral: bool,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["devpipe"]);
        assert!(cli.port.is_none());
        assert!(cli.server.is_none());
        assert!(!cli.clear_config);
        assert!(!cli.ephemeral);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "devpipe",
            "--port",
            "8080",
            "--server",
            "ws://127.0.0.1:9000/ws",
            "--clear-config",
            "--ephemeral",
            "-l",
            "debug",
        ]);
        assert_eq!(cli.port.as_deref(), Some("8080"));
        assert_eq!(cli.server.as_deref(), Some("ws://127.0.0.1:9000/ws"));
        assert!(cli.clear_config);
        assert!(cli.ephemeral);
        assert_eq!(cli.log_level, "debug");
    }
}
