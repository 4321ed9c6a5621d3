use std::time::Duration;

use clap::Args;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct MailArgs {
    /// SMTP relay hostname
    #[arg(long, env = "SMTP_HOST", default_value = "localhost")]
    pub smtp_host: String,
    /// SMTP relay port (465 uses implicit TLS)
    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,
    /// Use STARTTLS when talking to the relay
    #[arg(long, env = "SMTP_TLS", default_value_t = true, action = clap::ArgAction::Set)]
    pub smtp_tls: bool,
    /// Sender address, e.g. "Group Scholar Courses <courses@groupscholar.com>"
    #[arg(long, env = "MAIL_FROM", default_value = "courses@groupscholar.com")]
    pub mail_from: String,
    /// SMTP login; sent only together with a password
    #[arg(long, env = "SMTP_USERNAME", hide_env_values = true)]
    pub smtp_username: Option<String>,
    /// SMTP password
    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,
    /// Upper bound for a single email delivery
    #[arg(long, env = "SEND_TIMEOUT_SECS", default_value_t = 30)]
    pub send_timeout_secs: u64,
}

impl MailArgs {
    pub fn smtp(&self) -> SmtpConfig {
        SmtpConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            tls: self.smtp_tls,
            from: self.mail_from.clone(),
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        mail: MailArgs,
    }

    #[test]
    fn explicit_flags_build_smtp_config() {
        let harness = Harness::parse_from([
            "harness",
            "--smtp-host",
            "smtp.groupscholar.com",
            "--smtp-port",
            "465",
            "--smtp-tls",
            "false",
            "--mail-from",
            "courses@groupscholar.com",
            "--smtp-username",
            "courses",
            "--smtp-password",
            "hunter2",
            "--send-timeout-secs",
            "0",
        ]);
        let smtp = harness.mail.smtp();
        assert_eq!(smtp.host, "smtp.groupscholar.com");
        assert_eq!(smtp.port, 465);
        assert!(!smtp.tls);
        assert_eq!(smtp.username.as_deref(), Some("courses"));
        assert_eq!(smtp.password.as_deref(), Some("hunter2"));
        assert_eq!(harness.mail.send_timeout(), Duration::from_secs(1));
    }
}
