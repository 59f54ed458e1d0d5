/// The `builder` module contains the `PublisherBuilder` struct which is used to create a
/// `Publisher` instance.
use crate::{credentials::Credentials, github, publisher::Publisher};
use anyhow::{anyhow, Context, Result};
use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    Client,
};
use url::Url;

/// The project releases are published to when none is given.
pub const DEFAULT_PROJECT: &str = "Outlook/thrift";

/// `PublisherBuilder` is used to create a [`Publisher`] instance.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct PublisherBuilder<'a> {
    project: Option<&'a str>,
    tag: Option<&'a str>,
    credentials: Option<Credentials>,
    api_base_url: Option<&'a str>,
}

impl<'a> PublisherBuilder<'a> {
    /// Returns a new empty `PublisherBuilder`.
    #[must_use]
    pub fn new() -> Self {
        PublisherBuilder::default()
    }

    /// Set the project to publish to. This can either be just the owner/repo, like
    /// `houseabsolute/precious`, or a URL to any page in the project on GitHub, like
    /// `https://github.com/houseabsolute/precious/releases`.
    ///
    /// If this isn't set, [`DEFAULT_PROJECT`] is used.
    #[must_use]
    pub fn project(mut self, project: &'a str) -> Self {
        self.project = Some(project);
        self
    }

    /// Set the tag to create the release for. The release's name will be the same as the tag.
    ///
    /// You must set this.
    #[must_use]
    pub fn tag(mut self, tag: &'a str) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Set the credentials to use for API requests.
    ///
    /// You must set this.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the base URL for the GitHub API. This is useful for testing or if you want to publish
    /// to an Enterprise version of GitHub. This should be something like
    /// `https://github.my-corp.example.com/api/v3`. The default is `https://api.github.com`.
    #[must_use]
    pub fn api_base_url(mut self, api_base_url: &'a str) -> Self {
        self.api_base_url = Some(api_base_url);
        self
    }

    /// Builds a new [`Publisher`] instance and returns it.
    ///
    /// # Errors
    ///
    /// This returns an error if the tag or credentials were not set, if the tag is empty, if the
    /// project cannot be parsed into an owner and repo, or if the API base URL is not a valid URL.
    pub fn build(self) -> Result<Publisher> {
        let tag = match self.tag {
            None => return Err(anyhow!("You must set a tag")),
            Some(t) if t.trim().is_empty() => return Err(anyhow!("The tag cannot be empty")),
            Some(t) => t,
        };
        let credentials = self
            .credentials
            .ok_or_else(|| anyhow!("You must set credentials"))?;

        let (owner, repo) = parse_project_name(self.project.unwrap_or(DEFAULT_PROJECT))?;
        let api_base_url = match self.api_base_url {
            Some(u) => Url::parse(u).with_context(|| format!("invalid API base URL `{u}`"))?,
            None => github::DEFAULT_API_BASE_URL.clone(),
        };
        debug!("Publishing `{tag}` to {owner}/{repo} using the API at {api_base_url}");

        Ok(Publisher::new(
            owner,
            repo,
            tag.to_string(),
            api_base_url,
            credentials,
            reqwest_client()?,
        ))
    }
}

fn parse_project_name(project: &str) -> Result<(String, String)> {
    let parsed = if project.starts_with("http") {
        Url::parse(project)?
    } else {
        github::PROJECT_BASE_URL.join(project)?
    };

    let parts = parsed.path().split('/').collect::<Vec<_>>();
    if parts.len() < 3 || parts[1].is_empty() || parts[2].is_empty() {
        return Err(anyhow!("could not parse owner and repo name from {project}"));
    }
    // A bare `owner/repo` must not have anything after the repo.
    if !project.starts_with("http") && parts.len() > 3 {
        return Err(anyhow!(
            "the project must be in the form owner/repo, not {project}"
        ));
    }

    // The first part is an empty string for the leading '/' in the path.
    let (owner, repo) = (parts[1], parts[2]);
    debug!("Parsed project {project} = {owner} / {repo}");

    Ok((owner.to_string(), repo.to_string()))
}

fn reqwest_client() -> Result<Client> {
    let builder = Client::builder().gzip(true);

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("relpub version {}", super::VERSION))?,
    );
    Ok(builder.default_headers(headers).build()?)
}
