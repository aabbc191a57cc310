use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use gtn_data_mirror::config::RemoteSettings;
use gtn_data_mirror::error::MirrorError;
use gtn_data_mirror::remote::{FileId, OnedataClient, RemoteStore, UploadOutcome};

const EEXIST: &str = r#"{"error":{"id":"posix","details":{"errno":"eexist"}}}"#;

#[derive(Debug)]
struct SeenRequest {
    line: String,
    token: Option<String>,
    body_len: usize,
}

// Answers one connection per scripted response and returns what it saw.
fn serve(responses: Vec<(&'static str, &'static str)>) -> (String, thread::JoinHandle<Vec<SeenRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut token = None;
            let mut content_length = 0;
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                    break;
                }
                let Some((name, value)) = header.split_once(':') else {
                    continue;
                };
                let value = value.trim().to_string();
                match name.to_ascii_lowercase().as_str() {
                    "x-auth-token" => token = Some(value),
                    "content-length" => content_length = value.parse().unwrap(),
                    _ => {}
                }
            }
            let mut body_buf = vec![0; content_length];
            reader.read_exact(&mut body_buf).unwrap();
            seen.push(SeenRequest {
                line: line.trim().to_string(),
                token,
                body_len: content_length,
            });

            let mut stream = stream;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        seen
    });
    (format!("http://{addr}"), handle)
}

fn client(base: &str) -> OnedataClient {
    OnedataClient::new(&RemoteSettings {
        provider: Some(base.to_string()),
        root_id: Some("root".to_string()),
        token: Some("secret-token".to_string()),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        upload_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[test]
fn create_directory_twice_returns_same_id() {
    let (base, server) = serve(vec![
        ("201 Created", r#"{"fileId":"dir-1"}"#),
        ("400 Bad Request", EEXIST),
        ("200 OK", r#"{"children":[{"name":"GTN","fileId":"dir-1"}],"isLast":true}"#),
    ]);
    let remote = client(&base);
    let root = FileId::new("root");

    let first = remote.create_directory(&root, "GTN").unwrap();
    let second = remote.create_directory(&root, "GTN").unwrap();

    assert_eq!(first, FileId::new("dir-1"));
    assert_eq!(first, second);
    let seen = server.join().unwrap();
    assert!(seen[0].line.starts_with("POST /api/v3/oneprovider/data/root/children?"));
    assert!(seen[0].line.contains("name=GTN"));
    assert!(seen[0].line.contains("type=DIR"));
    assert!(seen[2].line.starts_with("GET /api/v3/oneprovider/data/root/children"));
    assert!(
        seen.iter()
            .all(|request| request.token.as_deref() == Some("secret-token"))
    );
}

#[test]
fn conflict_without_listing_is_an_error() {
    let (base, server) = serve(vec![
        ("400 Bad Request", EEXIST),
        ("200 OK", r#"{"children":[{"name":"Other","fileId":"dir-9"}],"isLast":true}"#),
    ]);
    let remote = client(&base);

    let err = remote
        .create_directory(&FileId::new("root"), "GTN")
        .unwrap_err();

    assert_matches!(err, MirrorError::RemoteStatus { status: 400, .. });
    assert_eq!(server.join().unwrap().len(), 2);
}

#[test]
fn other_statuses_are_errors() {
    let (base, server) = serve(vec![("500 Internal Server Error", "backend down")]);
    let remote = client(&base);

    let err = remote
        .create_directory(&FileId::new("root"), "GTN")
        .unwrap_err();

    assert_matches!(
        err,
        MirrorError::RemoteStatus { status: 500, ref message } if message == "backend down"
    );
    server.join().unwrap();
}

#[test]
fn listing_follows_pages() {
    let (base, server) = serve(vec![
        (
            "200 OK",
            r#"{"children":[{"name":"a","fileId":"1"}],"isLast":false,"nextPageToken":"page-2"}"#,
        ),
        ("200 OK", r#"{"children":[{"name":"b","fileId":"2"}],"isLast":true}"#),
    ]);
    let remote = client(&base);

    let children = remote.list_children(&FileId::new("root")).unwrap();

    let names: Vec<_> = children.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    let seen = server.join().unwrap();
    assert!(seen[1].line.contains("token=page-2"));
}

#[test]
fn upload_reports_new_and_existing_files() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("reads.fq")).unwrap();
    std::fs::write(path.as_std_path(), b"ACGTACGT").unwrap();

    let (base, server) = serve(vec![
        ("201 Created", r#"{"fileId":"file-1"}"#),
        ("400 Bad Request", EEXIST),
        ("403 Forbidden", "denied"),
    ]);
    let remote = client(&base);
    let folder = FileId::new("dir-1");

    assert_eq!(
        remote.upload_file(&folder, &path, "reads.fq").unwrap(),
        UploadOutcome::Uploaded
    );
    assert_eq!(
        remote.upload_file(&folder, &path, "reads.fq").unwrap(),
        UploadOutcome::AlreadyExists
    );
    assert_matches!(
        remote.upload_file(&folder, &path, "reads.fq"),
        Err(MirrorError::RemoteStatus { status: 403, .. })
    );

    let seen = server.join().unwrap();
    assert!(seen[0].line.starts_with("POST /api/v3/oneprovider/data/dir-1/children?name=reads.fq"));
    assert!(seen.iter().all(|request| request.body_len == 8));
}
