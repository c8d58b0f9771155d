//! Dropbox HTTP API v2 client

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ListPage, RemoteStore};
use crate::config::{MirrorConfig, DEFAULT_API_URL, DEFAULT_CONTENT_URL};
use crate::error::{MirrorError, Result};
use crate::types::RemoteEntry;

/// Dropbox client bound to one access token
pub struct DropboxClient {
    client: reqwest::Client,
    access_token: String,
    api_url: String,
    content_url: String,
}

#[derive(Serialize)]
struct ListFolderArg<'a> {
    path: &'a str,
    recursive: bool,
    include_deleted: bool,
}

#[derive(Serialize)]
struct CursorArg<'a> {
    cursor: &'a str,
}

#[derive(Serialize)]
struct PathArg<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'a str,
    autorename: bool,
    mute: bool,
}

#[derive(Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Metadata {
    File {
        name: String,
        content_hash: Option<String>,
    },
    Folder {
        name: String,
    },
    Deleted {
        #[allow(dead_code)]
        name: String,
    },
}

#[derive(Deserialize)]
struct ApiError {
    error_summary: String,
}

impl From<ListFolderResult> for ListPage {
    fn from(result: ListFolderResult) -> Self {
        let entries = result
            .entries
            .into_iter()
            .filter_map(|m| match m {
                Metadata::File { name, content_hash } => Some(RemoteEntry {
                    name,
                    content_hash,
                    is_file: true,
                }),
                Metadata::Folder { name } => Some(RemoteEntry::folder(name)),
                Metadata::Deleted { .. } => None,
            })
            .collect();

        ListPage {
            entries,
            cursor: result.cursor,
            has_more: result.has_more,
        }
    }
}

impl DropboxClient {
    /// Create a client talking to the public Dropbox endpoints
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_endpoints(access_token, DEFAULT_API_URL, DEFAULT_CONTENT_URL, None)
    }

    /// Create a client from the token, endpoints and timeout in `config`
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        Self::with_endpoints(
            config.access_token.clone(),
            config.api_url.clone(),
            config.content_url.clone(),
            config.request_timeout(),
        )
    }

    /// Create a client with explicit endpoints and an optional request timeout
    pub fn with_endpoints(
        access_token: impl Into<String>,
        api_url: impl Into<String>,
        content_url: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            access_token: access_token.into(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            content_url: content_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn rpc<A: Serialize + ?Sized>(&self, route: &str, arg: &A) -> Result<reqwest::Response> {
        let url = format!("{}/2/{}", self.api_url, route);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(arg)
            .send()
            .await?;
        check_status(response).await
    }
}

/// Map non-success responses onto `MirrorError`
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        return Err(MirrorError::RateLimited(retry_after));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|e| e.error_summary)
        .unwrap_or(body);

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(MirrorError::Auth(message));
    }

    Err(MirrorError::RemoteStore(format!("Status {}: {}", status, message)))
}

#[async_trait]
impl RemoteStore for DropboxClient {
    async fn list_folder(&self, path: &str) -> Result<ListPage> {
        let arg = ListFolderArg {
            path,
            recursive: false,
            include_deleted: false,
        };
        let result: ListFolderResult = self.rpc("files/list_folder", &arg).await?.json().await?;
        Ok(result.into())
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage> {
        let result: ListFolderResult = self
            .rpc("files/list_folder/continue", &CursorArg { cursor })
            .await?
            .json()
            .await?;
        Ok(result.into())
    }

    async fn upload(&self, path: &str, contents: Vec<u8>) -> Result<()> {
        let arg = serde_json::to_string(&UploadArg {
            path,
            mode: "overwrite",
            autorename: false,
            mute: true,
        })?;
        let url = format!("{}/2/files/upload", self.content_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("Dropbox-API-Arg", http_header_safe(&arg))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(contents)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.rpc("files/delete_v2", &PathArg { path }).await?;
        Ok(())
    }
}

/// Escape DEL and non-ASCII characters so the JSON argument is a valid header value
fn http_header_safe(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() && c != '\u{7f}' {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing_skips_deleted() {
        let body = r#"{
            "entries": [
                {".tag": "file", "name": "a.txt", "content_hash": "abc", "size": 3},
                {".tag": "folder", "name": "photos"},
                {".tag": "deleted", "name": "old.txt"}
            ],
            "cursor": "ZtkX9_EHj3x7PMkVuFIhwKYXEpwpLwyxp9vMKomUhllil9q7eWiAu",
            "has_more": true
        }"#;
        let result: ListFolderResult = serde_json::from_str(body).unwrap();
        let page: ListPage = result.into();

        assert_eq!(
            page.entries,
            vec![RemoteEntry::file("a.txt", "abc"), RemoteEntry::folder("photos")]
        );
        assert!(page.has_more);
    }

    #[test]
    fn test_upload_arg_shape() {
        let arg = serde_json::to_string(&UploadArg {
            path: "/a.txt",
            mode: "overwrite",
            autorename: false,
            mute: true,
        })
        .unwrap();
        assert_eq!(
            arg,
            r#"{"path":"/a.txt","mode":"overwrite","autorename":false,"mute":true}"#
        );
    }

    #[test]
    fn test_header_escaping() {
        assert_eq!(http_header_safe(r#"{"path":"/a"}"#), r#"{"path":"/a"}"#);
        assert_eq!(http_header_safe("/caf\u{e9}"), "/caf\\u00e9");
        assert_eq!(http_header_safe("/\u{1f600}"), "/\\ud83d\\ude00");
    }

    #[test]
    fn test_header_escaping_handles_del() {
        let arg = serde_json::to_string(&UploadArg {
            path: "/a\u{7f}b",
            mode: "overwrite",
            autorename: false,
            mute: true,
        })
        .unwrap();
        let escaped = http_header_safe(&arg);

        assert!(escaped.contains("/a\\u007fb"));
        assert!(reqwest::header::HeaderValue::from_str(&escaped).is_ok());
    }

    #[test]
    fn test_endpoints_trimmed() {
        let client =
            DropboxClient::with_endpoints("t", "http://localhost:1/", "http://localhost:2/", None)
                .unwrap();
        assert_eq!(client.api_url, "http://localhost:1");
        assert_eq!(client.content_url, "http://localhost:2");
    }

    mod wire {
        use super::*;
        use pretty_assertions::assert_eq;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;
        use tokio::task::JoinHandle;

        /// One request as seen by the fake server
        struct Received {
            request_line: String,
            headers: Vec<(String, String)>,
            body: Vec<u8>,
        }

        impl Received {
            fn header(&self, name: &str) -> Option<&str> {
                self.headers
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.as_str())
            }

            fn json(&self) -> serde_json::Value {
                serde_json::from_slice(&self.body).unwrap()
            }
        }

        /// Answer exactly one request with `status`, `extra_headers` and `body`
        async fn serve_once(
            status: &'static str,
            extra_headers: &'static str,
            body: &'static str,
        ) -> (String, JoinHandle<Received>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());

            let handle = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 8192];

                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "connection closed before headers");
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };

                let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
                let mut lines = head.split("\r\n");
                let request_line = lines.next().unwrap().to_string();
                let headers: Vec<(String, String)> = lines
                    .filter_map(|line| line.split_once(':'))
                    .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                    .collect();
                let content_length = headers
                    .iter()
                    .find(|(k, _)| k == "content-length")
                    .map(|(_, v)| v.parse::<usize>().unwrap())
                    .unwrap_or(0);

                let mut request_body = buf[header_end..].to_vec();
                while request_body.len() < content_length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "connection closed before body");
                    request_body.extend_from_slice(&chunk[..n]);
                }

                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n{}\r\n{}",
                    status,
                    body.len(),
                    extra_headers,
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;

                Received {
                    request_line,
                    headers,
                    body: request_body,
                }
            });

            (url, handle)
        }

        fn client_for(url: &str) -> DropboxClient {
            DropboxClient::with_endpoints("tok", url, url, None).unwrap()
        }

        const PAGE: &str = concat!(
            r#"{"entries":[{".tag":"file","name":"a.txt","content_hash":"h1"}],"#,
            r#""cursor":"c2","has_more":false}"#
        );

        #[tokio::test]
        async fn test_list_folder_request() {
            let (url, server) = serve_once("200 OK", "", PAGE).await;

            let page = client_for(&url).list_folder("").await.unwrap();
            let received = server.await.unwrap();

            assert_eq!(received.request_line, "POST /2/files/list_folder HTTP/1.1");
            assert_eq!(received.header("authorization"), Some("Bearer tok"));
            assert_eq!(
                received.json(),
                serde_json::json!({"path": "", "recursive": false, "include_deleted": false})
            );
            assert_eq!(page.entries, vec![RemoteEntry::file("a.txt", "h1")]);
            assert_eq!(page.cursor, "c2");
            assert!(!page.has_more);
        }

        #[tokio::test]
        async fn test_list_folder_continue_request() {
            let (url, server) = serve_once("200 OK", "", PAGE).await;

            client_for(&url).list_folder_continue("c1").await.unwrap();
            let received = server.await.unwrap();

            assert_eq!(
                received.request_line,
                "POST /2/files/list_folder/continue HTTP/1.1"
            );
            assert_eq!(received.json(), serde_json::json!({"cursor": "c1"}));
        }

        #[tokio::test]
        async fn test_upload_request() {
            let (url, server) = serve_once("200 OK", "", r#"{"name":"cafe.txt"}"#).await;

            client_for(&url)
                .upload("/caf\u{e9}.txt", b"payload".to_vec())
                .await
                .unwrap();
            let received = server.await.unwrap();

            assert_eq!(received.request_line, "POST /2/files/upload HTTP/1.1");
            assert_eq!(received.header("authorization"), Some("Bearer tok"));
            assert_eq!(
                received.header("dropbox-api-arg"),
                Some(concat!(
                    r#"{"path":"/caf\u00e9.txt","#,
                    r#""mode":"overwrite","autorename":false,"mute":true}"#
                ))
            );
            assert_eq!(
                received.header("content-type"),
                Some("application/octet-stream")
            );
            assert_eq!(received.body, b"payload".to_vec());
        }

        #[tokio::test]
        async fn test_delete_request() {
            let (url, server) = serve_once("200 OK", "", r#"{"metadata":{}}"#).await;

            client_for(&url).delete("/old.txt").await.unwrap();
            let received = server.await.unwrap();

            assert_eq!(received.request_line, "POST /2/files/delete_v2 HTTP/1.1");
            assert_eq!(received.json(), serde_json::json!({"path": "/old.txt"}));
        }

        #[tokio::test]
        async fn test_unauthorized_maps_to_auth() {
            let (url, server) = serve_once(
                "401 Unauthorized",
                "",
                r#"{"error_summary":"expired_access_token/","error":{}}"#,
            )
            .await;

            let err = client_for(&url).list_folder("").await.unwrap_err();
            server.await.unwrap();

            match err {
                MirrorError::Auth(message) => assert_eq!(message, "expired_access_token/"),
                other => panic!("expected Auth, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_too_many_requests_maps_to_rate_limited() {
            let (url, server) =
                serve_once("429 Too Many Requests", "retry-after: 7\r\n", "{}").await;

            let err = client_for(&url).delete("/x").await.unwrap_err();
            server.await.unwrap();

            assert!(matches!(err, MirrorError::RateLimited(7)));
        }

        #[tokio::test]
        async fn test_api_error_maps_to_remote_store() {
            let (url, server) = serve_once(
                "409 Conflict",
                "",
                r#"{"error_summary":"path_lookup/not_found/..","error":{}}"#,
            )
            .await;

            let err = client_for(&url)
                .upload("/x", b"1".to_vec())
                .await
                .unwrap_err();
            server.await.unwrap();

            match err {
                MirrorError::RemoteStore(message) => {
                    assert!(message.contains("409"));
                    assert!(message.contains("path_lookup/not_found/.."));
                }
                other => panic!("expected RemoteStore, got {:?}", other),
            }
        }
    }
}
