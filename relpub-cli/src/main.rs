use anyhow::{Error, Result};
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use log::{error, info};
use relpub::{Credentials, Publisher, PublisherBuilder, DEFAULT_PROJECT};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
enum RelpubError {
    #[error("{0:}")]
    InvalidArgsError(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = cmd();
    let matches = cmd.get_matches();
    let res = init_logger_from_matches(&matches);
    if let Err(e) = res {
        eprintln!("Error creating logger: {e}");
        std::process::exit(126);
    }

    let status = match make_publisher(&matches) {
        Ok(p) => {
            let attachments = matches
                .get_many::<PathBuf>("attachment")
                .map(|a| a.cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            match p.create_with_attachments(&attachments).await {
                Ok(published) => {
                    if let Some(url) = &published.html_url {
                        info!("release `{}` is at {url}", published.tag);
                    }
                    for asset in &published.assets {
                        match &asset.download_url {
                            Some(url) => info!("asset `{}` is at {url}", asset.name),
                            None => info!("uploaded asset `{}`", asset.name),
                        }
                    }
                    0
                }
                Err(e) => {
                    print_err(&e);
                    1
                }
            }
        }
        Err(e) => {
            print_err(&e);
            127
        }
    };
    std::process::exit(status);
}

const MAX_TERM_WIDTH: usize = 100;

fn cmd() -> Command {
    Command::new("relpub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Create a GitHub release for a tag and upload an attachment to it")
        .arg(
            Arg::new("tag")
                .required(true)
                .help("The tag to create the release for. This is also the release's name."),
        )
        .arg(
            Arg::new("username")
                .required(true)
                .help("The GitHub user to authenticate as."),
        )
        .arg(Arg::new("token").required(true).help(concat!(
            "The API token for the user. Keep this somewhere safe, like ~/.gh_token, and pass it",
            " in from your shell, e.g. `\"$(cat ~/.gh_token)\"`.",
        )))
        .arg(
            Arg::new("attachment")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help(concat!(
                    "The file to upload to the release. It is uploaded under its file name, and",
                    " the release is created as a draft.",
                )),
        )
        .arg(
            Arg::new("project")
                .long("project")
                .short('p')
                .default_value(DEFAULT_PROJECT)
                .help(concat!(
                    "The project to publish to, like houseabsolute/precious or",
                    " https://github.com/houseabsolute/precious.",
                )),
        )
        .arg(Arg::new("api-base-url").long("api-base-url").help(concat!(
            "The base URL for the GitHub API. This is useful for testing or if you want to",
            " publish to an Enterprise version of GitHub. This should be something like",
            " `https://github.my-corp.example.com/api/v3`.",
        )))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output."),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debugging output."),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppresses most output."),
        )
        .group(ArgGroup::new("log-level").args(["verbose", "debug", "quiet"]))
        .max_term_width(MAX_TERM_WIDTH)
}

pub(crate) fn init_logger_from_matches(matches: &ArgMatches) -> Result<(), log::SetLoggerError> {
    relpub::init_logger(log_level(matches))
}

fn log_level(matches: &ArgMatches) -> log::LevelFilter {
    if matches.get_flag("debug") {
        log::LevelFilter::Debug
    } else if matches.get_flag("verbose") {
        log::LevelFilter::Info
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    }
}

fn make_publisher(matches: &ArgMatches) -> Result<Publisher> {
    validate_args(matches)?;

    let username = arg(matches, "username");
    let token = arg(matches, "token");

    let credentials = Credentials::new(username, token);
    info!("authenticating to GitHub as `{}`", credentials.username());

    let mut builder = PublisherBuilder::new()
        .tag(arg(matches, "tag"))
        .credentials(credentials);
    if let Some(p) = matches.get_one::<String>("project") {
        builder = builder.project(p);
    }
    if let Some(url) = matches.get_one::<String>("api-base-url") {
        builder = builder.api_base_url(url);
    }

    builder.build()
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn validate_args(matches: &ArgMatches) -> Result<()> {
    for a in &["tag", "username", "token"] {
        if arg(matches, a).trim().is_empty() {
            return Err(
                RelpubError::InvalidArgsError(format!("The <{a}> argument cannot be empty"))
                    .into(),
            );
        }
    }

    Ok(())
}

fn print_err(e: &Error) {
    error!("{e:#}");
    if let Some(re) = e.downcast_ref::<RelpubError>() {
        match re {
            RelpubError::InvalidArgsError(_) => {
                println!();
                if let Err(e) = cmd().print_help() {
                    eprintln!("Error printing help: {e}");
                }
            }
        }
    }
}
