use crate::{
    credentials::Credentials,
    github::{self, CreatedRelease, NewRelease, UploadedAsset},
};
use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::{
    header::{HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE},
    Body, Client, Response, StatusCode,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use url::Url;

/// The errors that [`Publisher::create_with_attachments`] can fail with, aside from I/O and
/// transport errors. You can get these from the returned [`anyhow::Error`] with `downcast_ref`.
#[derive(Debug, Error)]
pub enum PublishError {
    /// An attachment does not exist or is not a regular file. This is checked for every attachment
    /// before any request is sent.
    #[error("{} is not a valid file", path.display())]
    InvalidAttachment { path: PathBuf },
    /// The server responded to a request with a status other than 2xx.
    #[error("request to {url} failed with status {status}: {body}")]
    Http {
        url: Url,
        status: StatusCode,
        body: String,
    },
    /// The release was created, but the response did not say where to upload its assets.
    #[error("the response to creating release `{tag}` did not include an `upload_url`")]
    MissingUploadUrl { tag: String },
}

/// `Publisher` creates a release and uploads its attachments. Use the
/// [`PublisherBuilder`](crate::PublisherBuilder) struct to create a new `Publisher` instance.
#[derive(Debug)]
pub struct Publisher {
    owner: String,
    repo: String,
    tag: String,
    api_base_url: Url,
    credentials: Credentials,
    reqwest_client: Client,
}

/// What was published by a successful call to [`Publisher::create_with_attachments`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedRelease {
    pub tag: String,
    /// The release's id, if the server returned one.
    pub id: Option<u64>,
    /// The release's web page, if the server returned one.
    pub html_url: Option<Url>,
    /// The uploaded assets, in the order their attachments were given.
    pub assets: Vec<PublishedAsset>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedAsset {
    pub name: String,
    pub download_url: Option<Url>,
}

impl Publisher {
    pub(crate) fn new(
        owner: String,
        repo: String,
        tag: String,
        api_base_url: Url,
        credentials: Credentials,
        reqwest_client: Client,
    ) -> Publisher {
        Publisher {
            owner,
            repo,
            tag,
            api_base_url,
            credentials,
            reqwest_client,
        }
    }

    /// Create the release and upload each attachment to it, in order.
    ///
    /// The release's name is its tag. If `attachments` is not empty, the release is created as a
    /// draft, and each file is uploaded under its file name (the last component of its path).
    ///
    /// # Errors
    ///
    /// * [`PublishError::InvalidAttachment`] if any attachment is not an existing regular file. In
    ///   this case no request is sent at all.
    /// * [`PublishError::Http`] if creating the release or uploading an attachment gets a non-2xx
    ///   response. Nothing after the failed request is attempted, and a release that was already
    ///   created is not deleted.
    /// * [`PublishError::MissingUploadUrl`] if there are attachments but the release creation
    ///   response has no `upload_url`.
    /// * Network errors, or errors reading an attachment.
    pub async fn create_with_attachments<P: AsRef<Path>>(
        &self,
        attachments: &[P],
    ) -> Result<PublishedRelease> {
        let attachments = validate_attachments(attachments)?;

        let release = self.create_release(!attachments.is_empty()).await?;
        let mut published = PublishedRelease {
            tag: self.tag.clone(),
            id: release.id,
            html_url: release.html_url,
            assets: vec![],
        };
        if attachments.is_empty() {
            return Ok(published);
        }

        let upload_url = release
            .upload_url
            .ok_or_else(|| PublishError::MissingUploadUrl {
                tag: self.tag.clone(),
            })?;
        let endpoint = github::upload_endpoint(&upload_url)?;
        debug!("upload endpoint is {endpoint}");

        for path in attachments {
            published
                .assets
                .push(self.upload_asset(&endpoint, path).await?);
        }

        Ok(published)
    }

    async fn create_release(&self, draft: bool) -> Result<CreatedRelease> {
        let url = github::release_create_url(&self.owner, &self.repo, self.api_base_url.clone())?;
        debug!("creating release `{}` (draft: {draft}) at {url}", self.tag);

        let payload = NewRelease {
            tag_name: &self.tag,
            name: &self.tag,
            draft,
        };
        let req_builder = self
            .reqwest_client
            .post(url.clone())
            .header(ACCEPT, HeaderValue::from_static(github::JSON_MEDIA_TYPE))
            .json(&payload);
        let req = self
            .credentials
            .add_auth_header(req_builder)
            .build()
            .with_context(|| format!("failed to build HTTP request for {url}"))?;

        let resp = self
            .reqwest_client
            .execute(req)
            .await
            .with_context(|| format!("failed to execute HTTP request to create release at {url}"))?;
        let resp = error_for_status(&url, resp).await?;
        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read the response body from {url}"))?;

        let release = match serde_json::from_str::<CreatedRelease>(&body) {
            Ok(r) => r,
            // Without attachments there's nothing in the response we need.
            Err(e) if !draft => {
                debug!("could not parse release creation response: {e}");
                CreatedRelease::default()
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to parse the release creation response from {url}")
                })
            }
        };
        info!("created release `{}`", self.tag);

        Ok(release)
    }

    async fn upload_asset(&self, endpoint: &Url, path: &Path) -> Result<PublishedAsset> {
        let name = github::asset_name(path)?;
        let url = github::asset_upload_url(endpoint, &name);
        debug!("uploading {} to {url}", path.display());

        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("failed to get metadata for {}", path.display()))?
            .len();

        let req_builder = self
            .reqwest_client
            .post(url.clone())
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
            .header(CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        let req = self
            .credentials
            .add_auth_header(req_builder)
            .build()
            .with_context(|| format!("failed to build HTTP request for {url}"))?;

        let resp = self.reqwest_client.execute(req).await.with_context(|| {
            format!(
                "failed to execute HTTP request to upload {} to {url}",
                path.display()
            )
        })?;
        let resp = error_for_status(&url, resp).await?;

        let uploaded = match resp.text().await {
            Ok(body) => serde_json::from_str::<UploadedAsset>(&body).unwrap_or_else(|e| {
                debug!("could not parse upload response for {name}: {e}");
                UploadedAsset::default()
            }),
            Err(e) => {
                debug!("could not read upload response for {name}: {e}");
                UploadedAsset::default()
            }
        };
        info!("uploaded {} as `{name}`", path.display());

        Ok(PublishedAsset {
            // The server may sanitize the name we asked for.
            name: uploaded.name.unwrap_or(name),
            download_url: uploaded.browser_download_url,
        })
    }
}

fn validate_attachments<P: AsRef<Path>>(attachments: &[P]) -> Result<Vec<&Path>> {
    attachments
        .iter()
        .map(|a| {
            let path = a.as_ref();
            if path.is_file() {
                Ok(path)
            } else {
                Err(PublishError::InvalidAttachment {
                    path: path.to_path_buf(),
                }
                .into())
            }
        })
        .collect()
}

async fn error_for_status(url: &Url, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(PublishError::Http {
        url: url.clone(),
        status,
        body,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::init_logging, PublisherBuilder};
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use serde_json::json;
    use std::{
        fs,
        sync::{Arc, Mutex},
    };
    use tempfile::TempDir;
    use test_log::test;

    const USER: &str = "autobuild";
    const TOKEN: &str = "ghp_fakeToken";
    // base64("autobuild:ghp_fakeToken")
    const BASIC_AUTH: &str = "Basic YXV0b2J1aWxkOmdocF9mYWtlVG9rZW4=";

    const RELEASES_PATH: &str = "/repos/some/project/releases";
    const UPLOAD_PATH: &str = "/uploads/repos/some/project/releases/42/assets";

    fn publisher(server: &ServerGuard, tag: &str) -> Result<Publisher> {
        PublisherBuilder::new()
            .project("some/project")
            .tag(tag)
            .credentials(Credentials::new(USER, TOKEN))
            .api_base_url(&server.url())
            .build()
    }

    fn release_body(server: &ServerGuard) -> String {
        json!({
            "id": 42,
            "html_url": "https://github.com/some/project/releases/tag/v1.0.0",
            "upload_url": format!("{}{UPLOAD_PATH}{{?name,label}}", server.url()),
        })
        .to_string()
    }

    async fn create_release_mock(server: &mut ServerGuard, draft: bool) -> Mock {
        let body = release_body(server);
        server
            .mock("POST", RELEASES_PATH)
            .match_header("authorization", BASIC_AUTH)
            .match_body(Matcher::Json(json!({
                "tag_name": "v1.0.0",
                "name": "v1.0.0",
                "draft": draft,
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    // Each upload this mock answers pushes its asset name onto `requested`.
    async fn upload_mock(
        server: &mut ServerGuard,
        name: &str,
        contents: &str,
        requested: &Arc<Mutex<Vec<String>>>,
    ) -> Mock {
        let body = json!({
            "name": name,
            "browser_download_url": format!(
                "https://github.com/some/project/releases/download/v1.0.0/{name}"
            ),
        })
        .to_string();
        let requested = Arc::clone(requested);
        let asset_name = name.to_string();
        server
            .mock("POST", UPLOAD_PATH)
            .match_query(Matcher::UrlEncoded("name".into(), name.into()))
            .match_header("authorization", BASIC_AUTH)
            .match_header("content-type", "application/octet-stream")
            .match_header("content-length", contents.len().to_string().as_str())
            .match_body(contents)
            .with_status(201)
            .with_body_from_request(move |_| {
                requested.lock().unwrap().push(asset_name.clone());
                body.clone().into_bytes()
            })
            .create_async()
            .await
    }

    fn write_attachments(files: &[(&str, &str)]) -> Result<(TempDir, Vec<PathBuf>)> {
        let td = TempDir::new()?;
        let mut paths = vec![];
        for (name, contents) in files {
            let path = td.path().join(name);
            fs::write(&path, contents)?;
            paths.push(path);
        }
        Ok((td, paths))
    }

    #[test(tokio::test)]
    async fn no_attachments_creates_a_published_release() -> Result<()> {
        init_logging();

        let mut server = Server::new_async().await;
        let create = create_release_mock(&mut server, false).await;
        let upload = server
            .mock("POST", Matcher::Regex("^/uploads/".to_string()))
            .expect(0)
            .create_async()
            .await;

        let published = publisher(&server, "v1.0.0")?
            .create_with_attachments::<&Path>(&[])
            .await?;

        assert_eq!(published.tag, "v1.0.0");
        assert_eq!(published.id, Some(42));
        assert_eq!(
            published.html_url.as_ref().map(Url::as_str),
            Some("https://github.com/some/project/releases/tag/v1.0.0"),
        );
        assert!(published.assets.is_empty());

        create.assert_async().await;
        upload.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn no_attachments_ignores_unparseable_response() -> Result<()> {
        init_logging();

        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", RELEASES_PATH)
            .with_status(201)
            .with_body("created")
            .create_async()
            .await;

        let published = publisher(&server, "v1.0.0")?
            .create_with_attachments::<&Path>(&[])
            .await?;
        assert_eq!(published.id, None);

        create.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn uploads_attachments_in_order() -> Result<()> {
        init_logging();

        let (_td, paths) = write_attachments(&[
            ("out.tar.gz", "compressed bytes"),
            ("thrift.exe", "windows bytes"),
        ])?;

        let mut server = Server::new_async().await;
        let create = create_release_mock(&mut server, true).await;
        let requested = Arc::new(Mutex::new(vec![]));
        // Registered in reverse so that matching cannot depend on registration order.
        let second = upload_mock(&mut server, "thrift.exe", "windows bytes", &requested).await;
        let first = upload_mock(&mut server, "out.tar.gz", "compressed bytes", &requested).await;

        let published = publisher(&server, "v1.0.0")?
            .create_with_attachments(&paths)
            .await?;

        assert_eq!(published.id, Some(42));
        let names = published
            .assets
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["out.tar.gz", "thrift.exe"]);
        assert_eq!(
            *requested.lock().unwrap(),
            vec!["out.tar.gz".to_string(), "thrift.exe".to_string()],
            "attachments were uploaded in the order given",
        );
        assert_eq!(
            published.assets[1].download_url.as_ref().map(Url::as_str),
            Some("https://github.com/some/project/releases/download/v1.0.0/thrift.exe"),
        );

        create.assert_async().await;
        first.assert_async().await;
        second.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn bad_optional_fields_in_creation_response_do_not_stop_uploads() -> Result<()> {
        init_logging();

        let (_td, paths) = write_attachments(&[("out.tar.gz", "bytes")])?;

        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", RELEASES_PATH)
            .with_status(201)
            .with_body(
                json!({
                    "id": 1,
                    "html_url": "",
                    "upload_url": format!("{}{UPLOAD_PATH}{{?name,label}}", server.url()),
                })
                .to_string(),
            )
            .create_async()
            .await;
        let upload = server
            .mock("POST", UPLOAD_PATH)
            .match_query(Matcher::UrlEncoded("name".into(), "out.tar.gz".into()))
            .match_body("bytes")
            .with_status(201)
            .create_async()
            .await;

        let published = publisher(&server, "v1.0.0")?
            .create_with_attachments(&paths)
            .await?;
        assert_eq!(published.id, Some(1));
        assert_eq!(published.html_url, None);
        assert_eq!(published.assets.len(), 1);

        create.assert_async().await;
        upload.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn uses_requested_name_when_upload_response_is_empty() -> Result<()> {
        init_logging();

        let (_td, paths) = write_attachments(&[("out.tar.gz", "bytes")])?;

        let mut server = Server::new_async().await;
        let create = create_release_mock(&mut server, true).await;
        let upload = server
            .mock("POST", UPLOAD_PATH)
            .match_query(Matcher::UrlEncoded("name".into(), "out.tar.gz".into()))
            .with_status(201)
            .create_async()
            .await;

        let published = publisher(&server, "v1.0.0")?
            .create_with_attachments(&paths)
            .await?;
        assert_eq!(
            published.assets,
            vec![PublishedAsset {
                name: "out.tar.gz".to_string(),
                download_url: None,
            }],
        );

        create.assert_async().await;
        upload.assert_async().await;

        Ok(())
    }

    #[rstest::rstest]
    #[case::does_not_exist(false)]
    #[case::is_a_directory(true)]
    #[tokio::test]
    async fn invalid_attachment_sends_nothing(#[case] use_dir: bool) -> Result<()> {
        init_logging();

        let (td, mut paths) = write_attachments(&[("out.tar.gz", "bytes")])?;
        let bad = if use_dir {
            td.path().to_path_buf()
        } else {
            td.path().join("missing.zip")
        };
        paths.push(bad.clone());

        let mut server = Server::new_async().await;
        let any = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = publisher(&server, "v1.0.0")?
            .create_with_attachments(&paths)
            .await
            .unwrap_err();
        let Some(PublishError::InvalidAttachment { path }) = err.downcast_ref::<PublishError>()
        else {
            panic!("expected an InvalidAttachment error, got {err:?}");
        };
        assert_eq!(path, &bad);

        any.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn failed_create_prevents_uploads() -> Result<()> {
        init_logging();

        let (_td, paths) = write_attachments(&[("out.tar.gz", "bytes")])?;

        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", RELEASES_PATH)
            .with_status(422)
            .with_body(r#"{"message":"Validation Failed"}"#)
            .create_async()
            .await;
        let upload = server
            .mock("POST", UPLOAD_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = publisher(&server, "v1.0.0")?
            .create_with_attachments(&paths)
            .await
            .unwrap_err();
        let Some(PublishError::Http { status, body, .. }) = err.downcast_ref::<PublishError>()
        else {
            panic!("expected an Http error, got {err:?}");
        };
        assert_eq!(*status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.contains("Validation Failed"), "body is kept: {body}");

        create.assert_async().await;
        upload.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn failed_upload_stops_remaining_uploads() -> Result<()> {
        init_logging();

        let (_td, paths) = write_attachments(&[("first.tar.gz", "one"), ("second.zip", "two")])?;

        let mut server = Server::new_async().await;
        let create = create_release_mock(&mut server, true).await;
        let first = server
            .mock("POST", UPLOAD_PATH)
            .match_query(Matcher::UrlEncoded("name".into(), "first.tar.gz".into()))
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;
        let second = server
            .mock("POST", UPLOAD_PATH)
            .match_query(Matcher::UrlEncoded("name".into(), "second.zip".into()))
            .expect(0)
            .create_async()
            .await;

        let err = publisher(&server, "v1.0.0")?
            .create_with_attachments(&paths)
            .await
            .unwrap_err();
        let Some(PublishError::Http { url, status, body }) = err.downcast_ref::<PublishError>()
        else {
            panic!("expected an Http error, got {err:?}");
        };
        assert_eq!(*status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "upstream exploded");
        assert_eq!(url.query(), Some("name=first.tar.gz"));

        create.assert_async().await;
        first.assert_async().await;
        second.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn missing_upload_url() -> Result<()> {
        init_logging();

        let (_td, paths) = write_attachments(&[("out.tar.gz", "bytes")])?;

        let mut server = Server::new_async().await;
        let create = server
            .mock("POST", RELEASES_PATH)
            .with_status(201)
            .with_body(json!({ "id": 7 }).to_string())
            .create_async()
            .await;

        let err = publisher(&server, "v2.0.0")?
            .create_with_attachments(&paths)
            .await
            .unwrap_err();
        let Some(PublishError::MissingUploadUrl { tag }) = err.downcast_ref::<PublishError>()
        else {
            panic!("expected a MissingUploadUrl error, got {err:?}");
        };
        assert_eq!(tag, "v2.0.0");

        create.assert_async().await;

        Ok(())
    }
}
