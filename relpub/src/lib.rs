//! A library for publishing a release to GitHub and uploading binary attachments to it.
//!
//! This crate creates a release for a tag in a GitHub repository (or any host that implements the
//! same REST API, such as GitHub Enterprise), then uploads each attachment to the upload endpoint
//! returned by the release creation call. It is designed to be used from build scripts and other
//! automation.
//!
//! This project also ships a CLI tool named `relpub`.
//!
//! The main entry point for programmatic use is the [`PublisherBuilder`] struct. Here is an
//! example of its usage:
//!
//! ```ignore
//! use relpub::{Credentials, PublisherBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let publisher = PublisherBuilder::new()
//!         .project("some-org/some-repo")
//!         .tag("v1.2.3")
//!         .credentials(Credentials::new("someone", "ghp_..."))
//!         .build()?;
//!
//!     publisher
//!         .create_with_attachments(&["target/dist/some-tool.tar.gz"])
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## What Gets Sent
//!
//! The release is created with a `POST` to `/repos/{owner}/{repo}/releases`. Its name is the same
//! as its tag. When at least one attachment is given, the release is created as a draft so that
//! it does not become visible before its assets are in place.
//!
//! The creation response includes an `upload_url` template like
//! `https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}`. Everything from the
//! first `{` on is dropped, and each attachment is uploaded to the remaining URL with its file name
//! (the last component of its path) as the `name` query parameter.
//!
//! All attachments are checked before any request is made. If any of them is not an existing
//! file, nothing is sent. Otherwise the first failed request stops the run. A release that was
//! already created is left as is.
//!
//! ## Features
//!
//! This crate offers several features to control the TLS dependency used by `reqwest`:
//!
#![doc = document_features::document_features!()]

mod builder;
mod credentials;
mod github;
mod publisher;

pub use crate::{
    builder::{PublisherBuilder, DEFAULT_PROJECT},
    credentials::Credentials,
    publisher::{PublishError, PublishedAsset, PublishedRelease, Publisher},
};

// The version of the `relpub` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "logging")]
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};

/// This function initializes logging for the application. It's public for the sake of the `relpub`
/// binary, but it lives in the library crate so that test code can also enable logging.
///
/// # Errors
///
/// This can return a `log::SetLoggerError` error.
#[cfg(feature = "logging")]
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let line_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightBlack)
        .debug(Color::BrightBlack)
        .trace(Color::BrightBlack);
    let level_colors = line_colors.info(Color::Green).debug(Color::Black);

    Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{color_line}[{target}][{level}{color_line}] {message}\x1B[0m",
                color_line = format_args!(
                    "\x1B[{}m",
                    line_colors.get_color(&record.level()).to_fg_str()
                ),
                target = record.target(),
                level = level_colors.color(record.level()),
                message = message,
            ));
        })
        .level(level)
        // This is very noisy.
        .level_for("hyper", log::LevelFilter::Error)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
}
