use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use humantime::{DurationError, parse_duration};
use logger::{LevelFilter, LogConfig, LogFormat, LogSink, LoggerError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use watchpost_engine::registry::DEFAULT_SSH_PORT;
use watchpost_engine::{
    ConfigError, FanoutNotifier, IcmpConfig, LogNotifier, Notifier, NotifyError, PingTarget,
    ProgramCheck, RemoteSessionConfig, SmtpNotifier, SmtpSettings, SocketKind,
    SystemSocketFactory, TargetRegistry, WebhookNotifier,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read config file {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not write config file {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("could not serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,

    #[error("invalid duration for {field}: {source}")]
    InvalidDuration {
        field: &'static str,
        #[source]
        source: DurationError,
    },

    #[error("unknown ICMP socket kind {0:?}, expected \"datagram\" or \"raw\"")]
    InvalidSocketKind(String),

    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidWebhook { url: String, reason: String },

    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),

    #[error(transparent)]
    Logger(#[from] LoggerError),

    #[error(transparent)]
    Target(#[from] ConfigError),

    #[error(transparent)]
    Notifier(#[from] NotifyError),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time between sweeps, e.g. "5m"
    pub interval: String,
    pub ping: Ping,
    pub ssh: Vec<Ssh>,
    pub notify: Notify,
    pub log: Log,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Ping {
    pub timeout: String,
    /// "datagram" (unprivileged) or "raw"
    pub socket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub hosts: Vec<Host>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ssh {
    pub server: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<String>,
    #[serde(default)]
    pub programs: Vec<Program>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub process: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Notify {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub webhook_timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<Smtp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Smtp {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub recipients: Vec<String>,
    #[serde(default = "default_smtp_timeout")]
    pub timeout: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> String {
    "30s".into()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    pub level: String,
    pub format: String,
    /// "stderr", "stdout" or a file path
    pub sink: String,
}

/// Config file location: `explicit` forced to a `.toml` extension, otherwise
/// `$XDG_CONFIG_HOME/watchpost/config.toml` (falling back to `~/.config`)
fn config_path(explicit: Option<&path::Path>) -> Result<PathBuf, Error> {
    if let Some(path) = explicit {
        return Ok(match path.extension() {
            Some(ext) if ext == "toml" => path.to_path_buf(),
            _ => path.with_extension("toml"),
        });
    }

    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::home_dir().map(|home| home.join(".config")))
        .ok_or(Error::ConfigPathUnavailable)?;
    Ok(base.join("watchpost").join("config.toml"))
}

fn duration(field: &'static str, value: &str) -> Result<Duration, Error> {
    parse_duration(value).map_err(|source| Error::InvalidDuration { field, source })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: "5m".into(),
            ping: Ping::default(),
            ssh: Vec::new(),
            notify: Notify::default(),
            log: Log::default(),
        }
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self { timeout: "10s".into(), socket: "datagram".into(), device: None, hosts: Vec::new() }
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self { webhook_url: None, webhook_timeout: "10s".into(), smtp: None }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into(), sink: "stderr".into() }
    }
}

fn heading(f: &mut fmt::Formatter<'_>, depth: usize, title: &str) -> fmt::Result {
    writeln!(f, "{:width$}{title}", "", width = depth * 2)
}

fn entry(
    f: &mut fmt::Formatter<'_>,
    depth: usize,
    label: &str,
    value: impl fmt::Display,
) -> fmt::Result {
    writeln!(f, "{:width$}{label}: {value}", "", width = depth * 2 + 2)
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "watchpost configuration:")?;
        entry(f, 1, "Interval", &self.interval)?;

        heading(f, 1, "Ping")?;
        entry(f, 1, "Timeout", &self.ping.timeout)?;
        entry(f, 1, "Socket", &self.ping.socket)?;
        if let Some(device) = &self.ping.device {
            entry(f, 1, "Device", device)?;
        }
        for host in &self.ping.hosts {
            entry(f, 2, &host.name, &host.host)?;
        }

        for ssh in &self.ssh {
            heading(f, 1, &format!("SSH {}@{}", ssh.user, ssh.server))?;
            match (&ssh.password, &ssh.key) {
                (Some(_), _) => entry(f, 1, "Auth", "password (***)")?,
                (None, Some(key)) => entry(f, 1, "Auth", key.display())?,
                (None, None) => entry(f, 1, "Auth", "none")?,
            }
            entry(f, 1, "Port", ssh.port.unwrap_or(DEFAULT_SSH_PORT))?;
            heading(f, 2, "Programs")?;
            for program in &ssh.programs {
                entry(f, 2, &program.name, &program.process)?;
            }
        }

        heading(f, 1, "Notify")?;
        entry(f, 1, "Webhook", self.notify.webhook_url.as_deref().unwrap_or("disabled"))?;
        match &self.notify.smtp {
            Some(smtp) => {
                let relay = format!("{}@{}:{}", smtp.username, smtp.server, smtp.port);
                entry(f, 1, "SMTP", relay)?;
                entry(f, 1, "Recipients", smtp.recipients.join(", "))?;
            }
            None => entry(f, 1, "SMTP", "disabled")?,
        }

        heading(f, 1, "Log")?;
        entry(f, 1, "Level", &self.log.level)?;
        entry(f, 1, "Format", &self.log.format)?;
        entry(f, 1, "Sink", &self.log.sink)
    }
}

impl Config {
    /// Load the config file, writing a default one (no targets) first if
    /// nothing exists at the resolved location
    pub fn load(explicit: Option<&path::Path>) -> Result<Self, Error> {
        let path = config_path(explicit)?;

        match fs::read_to_string(&path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(&path)?;
                Ok(config)
            }
            Err(source) => Err(Error::ReadFailed { path, source }),
        }
    }

    pub fn save(&self, path: &path::Path) -> Result<(), Error> {
        let contents = toml::to_string_pretty(self)?;
        let write_failed = |source| Error::WriteFailed { path: path.to_path_buf(), source };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_failed)?;
        }
        fs::write(path, contents).map_err(write_failed)
    }

    /// Sweep interval; malformed or zero is an error
    pub fn interval(&self) -> Result<Duration, Error> {
        let interval = duration("interval", &self.interval)?;
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval.into());
        }
        Ok(interval)
    }

    pub fn icmp_config(&self) -> Result<IcmpConfig, Error> {
        Ok(IcmpConfig::default().with_timeout(duration("ping.timeout", &self.ping.timeout)?))
    }

    pub fn socket_factory(&self) -> Result<SystemSocketFactory, Error> {
        let kind = match self.ping.socket.to_ascii_lowercase().as_str() {
            "datagram" | "dgram" | "" => SocketKind::Datagram,
            "raw" => SocketKind::Raw,
            other => return Err(Error::InvalidSocketKind(other.to_string())),
        };
        let factory = SystemSocketFactory::new(kind);
        Ok(match &self.ping.device {
            Some(device) => factory.with_device(device.clone()),
            None => factory,
        })
    }

    /// Validated remote session descriptors, in file order
    pub fn session_configs(&self) -> Result<Vec<RemoteSessionConfig>, Error> {
        self.ssh
            .iter()
            .map(|ssh| {
                let command_timeout = ssh
                    .command_timeout
                    .as_deref()
                    .map(|value| duration("ssh.command_timeout", value))
                    .transpose()?;
                Ok(RemoteSessionConfig {
                    server: ssh.server.clone(),
                    user: ssh.user.clone(),
                    password: ssh.password.clone(),
                    key: ssh.key.clone(),
                    port: ssh.port,
                    command_timeout,
                    programs: ssh
                        .programs
                        .iter()
                        .map(|program| ProgramCheck::new(&program.name, &program.process))
                        .collect(),
                })
            })
            .collect()
    }

    /// Resolve every host and validate every session
    pub async fn build_registry(&self) -> Result<TargetRegistry, Error> {
        let mut registry = TargetRegistry::new();
        for host in &self.ping.hosts {
            registry.add_ping_target(PingTarget::resolve(&host.name, &host.host).await?);
        }
        for session in self.session_configs()? {
            registry.add_session(session.validate()?);
        }
        Ok(registry)
    }

    /// Log notifier, plus the webhook and mail relay when configured
    pub fn notifier(&self) -> Result<Arc<dyn Notifier>, Error> {
        let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];

        if let Some(raw) = &self.notify.webhook_url {
            let invalid = |reason: String| Error::InvalidWebhook { url: raw.clone(), reason };
            let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(format!("unsupported scheme {}", url.scheme())));
            }
            let timeout = duration("notify.webhook_timeout", &self.notify.webhook_timeout)?;
            notifiers.push(Arc::new(WebhookNotifier::new(url, timeout)?));
        }

        if let Some(smtp) = &self.notify.smtp {
            notifiers.push(Arc::new(SmtpNotifier::new(SmtpSettings {
                server: smtp.server.clone(),
                port: smtp.port,
                username: smtp.username.clone(),
                password: smtp.password.clone(),
                from: smtp.from.clone(),
                recipients: smtp.recipients.clone(),
                timeout: duration("notify.smtp.timeout", &smtp.timeout)?,
            })?));
        }

        Ok(Arc::new(FanoutNotifier::new(notifiers)))
    }

    pub fn log_config(&self) -> Result<LogConfig, Error> {
        let level = LevelFilter::from_str(&self.log.level)
            .map_err(|_| Error::InvalidLogLevel(self.log.level.clone()))?;
        let format: LogFormat = self.log.format.parse()?;
        let sink = match self.log.sink.parse::<LogSink>() {
            Ok(sink) => sink,
            Err(never) => match never {},
        };
        Ok(LogConfig { level, format, sink })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchpost_engine::Credentials;

    const SAMPLE: &str = r#"
interval = "1h 30m"

[ping]
timeout = "2s"
socket = "raw"
hosts = [
    { name = "db1", host = "10.0.0.5" },
    { name = "gw", host = "2001:db8::1" },
]

[[ssh]]
server = "web1.example.com"
user = "ops"
password = "hunter2"
command_timeout = "30s"
programs = [{ name = "web", process = "gunicorn" }]

[notify]
webhook_url = "https://hooks.example.com/watchpost"

[notify.smtp]
server = "smtp.example.com"
username = "watchpost@example.com"
password = "mailpass"
recipients = ["ops@example.com"]

[log]
level = "debug"
format = "json"
sink = "stdout"
"#;

    #[test]
    fn test_explicit_path_gets_toml_extension() {
        let path = |p: &str| config_path(Some(path::Path::new(p))).unwrap();
        assert_eq!(path("/etc/watchpost"), PathBuf::from("/etc/watchpost.toml"));
        assert_eq!(path("/etc/watchpost.yaml"), PathBuf::from("/etc/watchpost.toml"));
        assert_eq!(path("a/b.toml"), PathBuf::from("a/b.toml"));
    }

    #[tokio::test]
    async fn test_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();

        assert_eq!(config.interval().unwrap(), Duration::from_secs(5400));
        assert_eq!(config.icmp_config().unwrap().timeout, Duration::from_secs(2));
        assert!(config.socket_factory().is_ok());

        let registry = config.build_registry().await.unwrap();
        let names: Vec<_> = registry.ping_targets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["db1", "gw"]);

        let session = &registry.sessions()[0];
        assert_eq!(session.port, 22);
        assert_eq!(session.credentials, Credentials::Password("hunter2".to_string()));
        assert_eq!(session.command_timeout, Some(Duration::from_secs(30)));
        assert_eq!(session.programs, [ProgramCheck::new("web", "gunicorn")]);

        let log = config.log_config().unwrap();
        assert_eq!(log.level, LevelFilter::DEBUG);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.sink, LogSink::Stdout);

        assert!(config.notifier().is_ok());
    }

    #[test]
    fn test_bad_interval_is_fatal() {
        let config = Config { interval: "often".into(), ..Config::default() };
        assert!(matches!(
            config.interval(),
            Err(Error::InvalidDuration { field: "interval", .. })
        ));

        let config = Config { interval: "0s".into(), ..Config::default() };
        assert!(matches!(config.interval(), Err(Error::Target(ConfigError::ZeroInterval))));
    }

    #[tokio::test]
    async fn test_session_without_credentials_is_fatal() {
        let config: Config = toml::from_str(
            r#"
[[ssh]]
server = "web1"
user = "ops"
programs = [{ name = "web", process = "nginx" }]
"#,
        )
        .unwrap();

        let err = config.build_registry().await.unwrap_err();
        assert!(matches!(err, Error::Target(ConfigError::MissingCredentials { .. })));
    }

    #[test]
    fn test_webhook_must_be_http() {
        let mut config = Config::default();
        config.notify.webhook_url = Some("ftp://example.com/hook".into());
        assert!(matches!(config.notifier(), Err(Error::InvalidWebhook { .. })));
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/watchpost");

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.interval, "5m");
        assert!(dir.path().join("nested/watchpost.toml").exists());

        let reloaded = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(reloaded.ping.timeout, "10s");
        assert!(reloaded.ssh.is_empty());
    }

    #[test]
    fn test_display_masks_password() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let shown = config.to_string();
        assert!(shown.contains("SSH ops@web1.example.com"));
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("mailpass"));
        assert!(shown.contains("watchpost@example.com@smtp.example.com:587"));
    }

    #[test]
    fn test_smtp_needs_recipients() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        if let Some(smtp) = config.notify.smtp.as_mut() {
            smtp.recipients.clear();
        }
        assert!(matches!(config.notifier(), Err(Error::Notifier(NotifyError::NoRecipients))));
    }
}
