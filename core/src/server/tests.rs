//! HTTP Round-Trip Tests

#[cfg(test)]
mod integration_tests {
    use crate::server::ConnectorServer;
    use elfport_shared::ConnectorConfig;
    use hyper::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
    use hyper::{Body, Client, Method, Request, Response, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::fs;
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct TestServer {
        _root: TempDir,
        _staging: TempDir,
        root: PathBuf,
        addr: SocketAddr,
        shutdown: Option<oneshot::Sender<()>>,
        handle: Option<JoinHandle<anyhow::Result<()>>>,
    }

    impl TestServer {
        async fn start(tweak: impl FnOnce(&mut ConnectorConfig)) -> Self {
            let root_dir = TempDir::new().unwrap();
            let staging = TempDir::new().unwrap();
            let mut config = ConnectorConfig {
                bind_port: 0,
                upload_tmp_dir: Some(staging.path().to_path_buf()),
                ..ConnectorConfig::with_root(root_dir.path())
            };
            tweak(&mut config);

            let server = ConnectorServer::new(config).unwrap();
            let root = server.connector().volume().root().to_path_buf();
            let listener = server.bind().unwrap();
            let addr = listener.local_addr().unwrap();

            let (tx, rx) = oneshot::channel::<()>();
            let handle = tokio::spawn(server.serve(listener, async move {
                let _ = rx.await;
            }));

            Self {
                _root: root_dir,
                _staging: staging,
                root,
                addr,
                shutdown: Some(tx),
                handle: Some(handle),
            }
        }

        fn url(&self, query: &str) -> String {
            format!("http://{}/connector?{}", self.addr, query)
        }

        async fn get(&self, query: &str) -> Response<Body> {
            Client::new().get(self.url(query).parse().unwrap()).await.unwrap()
        }

        async fn post(&self, content_type: &str, body: Vec<u8>) -> Response<Body> {
            let request = Request::builder()
                .method(Method::POST)
                .uri(self.url(""))
                .header(CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap();
            Client::new().request(request).await.unwrap()
        }

        async fn stop(mut self) {
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = self.handle.take() {
                handle.await.unwrap().unwrap();
            }
        }
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart(boundary: &str, fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut raw = Vec::new();
        for (name, value) in fields {
            raw.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    boundary, name, value
                )
                .as_bytes(),
            );
        }
        for (file_name, content) in files {
            raw.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"upload[]\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    boundary, file_name
                )
                .as_bytes(),
            );
            raw.extend_from_slice(content);
            raw.extend_from_slice(b"\r\n");
        }
        raw.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        raw
    }

    #[tokio::test]
    async fn test_open_over_http() {
        let server = TestServer::start(|_| {}).await;
        fs::write(server.root.join("a.txt"), "a").unwrap();

        let response = server.get("cmd=open&init=1&target=").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json"));

        let body = json_body(response).await;
        assert_eq!(body["api"], "2.1");
        assert_eq!(body["cwd"]["hash"], "l1_Lw");
        assert_eq!(body["files"][0]["name"], "a.txt");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_urlencoded_post_merges_with_query() {
        let server = TestServer::start(|_| {}).await;

        let request = Request::builder()
            .method(Method::POST)
            .uri(server.url("cmd=mkdir"))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("target=l1_Lw&name=new%20folder"))
            .unwrap();
        let response = Client::new().request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["added"][0]["name"], "new folder");
        assert!(server.root.join("new folder").is_dir());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_protocol_errors_use_status_200() {
        let server = TestServer::start(|_| {}).await;

        let response = server.get("cmd=nope").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["error"], json!(["errUnknownCmd", "nope"]));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let server = TestServer::start(|_| {}).await;
        let boundary = "XyZboundary";
        let body = multipart(
            boundary,
            &[("cmd", "upload"), ("target", "l1_Lw")],
            &[("one.txt", &b"first"[..]), ("two.txt", &b"second"[..])],
        );

        let response = server
            .post(&format!("multipart/form-data; boundary={}", boundary), body)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let mut names: Vec<&str> = body["added"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["one.txt", "two.txt"]);
        assert_eq!(fs::read_to_string(server.root.join("two.txt")).unwrap(), "second");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_upload_leaves_no_file() {
        let server = TestServer::start(|config| config.upload_max_size = 16).await;
        let boundary = "XyZboundary";
        let big = vec![b'x'; 64];
        let body = multipart(
            boundary,
            &[("cmd", "upload"), ("target", "l1_Lw")],
            &[("big.bin", &big[..])],
        );

        let response = server
            .post(&format!("multipart/form-data; boundary={}", boundary), body)
            .await;
        let body = json_body(response).await;
        assert_eq!(body["added"], json!([]));
        assert_eq!(body["failed"][0]["kind"], "PayloadTooLarge");
        assert!(!server.root.join("big.bin").exists());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_file_download_streams_bytes() {
        let server = TestServer::start(|_| {}).await;
        fs::write(server.root.join("data.txt"), "streamed content").unwrap();
        // base64url("data.txt")
        let hash = "l1_ZGF0YS50eHQ";

        let response = server
            .get(&format!("cmd=file&target={}&download=1", hash))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"data.txt\"; filename*=UTF-8''data.txt"
        );
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&bytes[..], b"streamed content");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_file_errors_use_http_status() {
        let server = TestServer::start(|_| {}).await;

        // base64url("missing.txt")
        let response = server.get("cmd=file&target=l1_bWlzc2luZy50eHQ").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server.get("cmd=file&target=l1_Lw").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["kind"], "IsADirectory");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_routing_and_methods() {
        let server = TestServer::start(|_| {}).await;

        let response = Client::new()
            .get(format!("http://{}/elsewhere", server.addr).parse().unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(json_body(response).await.get("error").is_some());

        let request = Request::builder()
            .method(Method::DELETE)
            .uri(server.url("cmd=open"))
            .body(Body::empty())
            .unwrap();
        let response = Client::new().request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_multipart_is_bad_request() {
        let server = TestServer::start(|_| {}).await;

        let response = server
            .post("multipart/form-data; boundary=abc", b"--abc\r\nnot a part".to_vec())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "MissingParameter");

        server.stop().await;
    }
}
