use anyhow::Result;
use crossterm::{
    cursor::MoveTo,
    execute,
    style::Stylize,
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};

/// 隧道的公网地址：`https://<tunnel>.<中继主机名>`
pub fn public_url(server_url: &str, tunnel_id: &str) -> String {
    let host = url::Url::parse(server_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "devpipe.cloud".to_string());
    format!("https://{}.{}", tunnel_id, host)
}

/// 启动横幅
pub struct Banner<'a> {
    pub server_url: &'a str,
    pub tunnel_id: &'a str,
    pub port: &'a str,
    pub uuid: Option<&'a str>,
}

impl Banner<'_> {
    /// 清屏并打印隧道信息和请求日志表头
    pub fn print(&self) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;

        writeln!(stdout, "{}", "@devpipe".cyan())?;
        writeln!(stdout)?;
        writeln!(stdout, "{:<15} {}", "Tunnel Status", "online".green())?;
        writeln!(stdout, "{:<15} {}", "Version", env!("CARGO_PKG_VERSION"))?;
        writeln!(
            stdout,
            "{:<15} {} -> localhost:{}",
            "Forwarding",
            public_url(self.server_url, self.tunnel_id).yellow(),
            self.port
        )?;

        match self.uuid {
            Some(uuid) => {
                writeln!(stdout, "{:<15} {}", "Security", "Secure Reconnection Enabled".blue())?;
                writeln!(stdout, "{:<15} {}", "UUID", uuid.blue())?;
            }
            None => {
                writeln!(stdout, "{:<15} {}", "Security", "Secure Reconnection Unavailable".dark_yellow())?;
            }
        }

        writeln!(stdout)?;
        writeln!(stdout, "HTTP Requests")?;
        writeln!(stdout, "{:<7} {:<20} {}", "METHOD", "PATH", "STATUS")?;
        stdout.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url("wss://devpipe.cloud/ws", "quiet-fox"),
            "https://quiet-fox.devpipe.cloud"
        );
        assert_eq!(
            public_url("ws://relay.example.com:9000/ws", "abc"),
            "https://abc.relay.example.com"
        );
        assert_eq!(public_url("::bad::", "abc"), "https://abc.devpipe.cloud");
    }
}
