pub mod auth;
pub mod cache;
pub mod email;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("warden")
        .about("Authentication and session lifecycle service")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("WARDEN_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("WARDEN_DSN")
                .required(true),
        )
        .arg(
            Arg::new("init-schema")
                .long("init-schema")
                .help("Create missing tables from the bundled schema at startup")
                .env("WARDEN_INIT_SCHEMA")
                .action(clap::ArgAction::SetTrue),
        );

    let command = auth::with_args(command);
    let command = cache::with_args(command);
    let command = email::with_args(command);
    logging::with_args(command)
}
