use clap::{Arg, ArgMatches, Command};

pub const ARG_EMAIL_API_URL: &str = "email-api-url";
pub const ARG_EMAIL_API_KEY: &str = "email-api-key";
pub const ARG_EMAIL_FROM: &str = "email-from";

#[derive(Debug, Clone)]
pub struct Options {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from: String,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            api_url: matches
                .get_one::<String>(ARG_EMAIL_API_URL)
                .cloned()
                .unwrap_or_else(|| "https://api.resend.com/emails".to_string()),
            api_key: matches.get_one::<String>(ARG_EMAIL_API_KEY).cloned(),
            from: matches
                .get_one::<String>(ARG_EMAIL_FROM)
                .cloned()
                .unwrap_or_else(|| "Warden <noreply@warden.dev>".to_string()),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_API_URL)
                .long(ARG_EMAIL_API_URL)
                .help("HTTP email API endpoint used for password reset links")
                .env("WARDEN_EMAIL_API_URL")
                .default_value("https://api.resend.com/emails"),
        )
        .arg(
            Arg::new(ARG_EMAIL_API_KEY)
                .long(ARG_EMAIL_API_KEY)
                .help("Email API key; when unset, outgoing emails are only logged")
                .env("WARDEN_EMAIL_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender address for outgoing emails")
                .env("WARDEN_EMAIL_FROM")
                .default_value("Warden <noreply@warden.dev>"),
        )
}
