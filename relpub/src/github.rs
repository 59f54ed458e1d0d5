use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::{path::Path, sync::LazyLock};
use url::Url;

pub(crate) static PROJECT_BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://github.com").unwrap());

pub(crate) static DEFAULT_API_BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://api.github.com").unwrap());

pub(crate) const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

/// The body sent to create a release.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub(crate) struct NewRelease<'a> {
    pub(crate) tag_name: &'a str,
    pub(crate) name: &'a str,
    pub(crate) draft: bool,
}

// Only the fields we use. A test server or an older GitHub Enterprise may leave out some of these,
// so they're all optional here and checked where they're needed. Only `upload_url` can fail a
// run, so a missing or malformed value in any other field is read as `None`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CreatedRelease {
    #[serde(default, deserialize_with = "lenient")]
    pub(crate) id: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub(crate) html_url: Option<Url>,
    pub(crate) upload_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UploadedAsset {
    #[serde(default, deserialize_with = "lenient")]
    pub(crate) name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub(crate) browser_download_url: Option<Url>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

pub(crate) fn release_create_url(owner: &str, repo: &str, mut url: Url) -> Result<Url> {
    if url.cannot_be_a_base() {
        return Err(anyhow!("the API base URL `{url}` cannot have a path"));
    }
    url.path_segments_mut()
        .map_err(|()| anyhow!("could not get path segments for the API base URL"))?
        .pop_if_empty()
        .extend(&["repos", owner, repo, "releases"]);
    Ok(url)
}

/// Turns the `upload_url` template from a created release, like
/// `https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}`, into the bare endpoint by
/// dropping everything from the first `{`.
pub(crate) fn upload_endpoint(template: &str) -> Result<Url> {
    let bare = template
        .find('{')
        .map_or(template, |brace| &template[..brace]);
    Url::parse(bare).with_context(|| format!("the upload URL `{template}` is not a valid URL"))
}

pub(crate) fn asset_upload_url(endpoint: &Url, asset_name: &str) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("name", asset_name);
    url
}

/// The remote name of an asset is the final component of its local path.
pub(crate) fn asset_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("could not get a file name from {}", path.display()))
}
