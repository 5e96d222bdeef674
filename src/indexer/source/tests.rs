use super::*;
use std::fs;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("should create parent dirs");
    }
    fs::write(path, content).expect("should write file");
}

fn source_with(config: SourceConfig, temp_dir: &TempDir) -> RepositorySource {
    RepositorySource::new(config, temp_dir.path().join("checkouts"))
}

#[test]
fn parses_github_urls() {
    let cases = [
        "https://github.com/pallets/flask",
        "https://github.com/pallets/flask/",
        "https://github.com/pallets/flask.git",
        "https://www.github.com/pallets/flask.git/",
    ];
    for url in cases {
        let repo = RepositoryRef::parse_url(url).expect("valid github url");
        assert_eq!(repo.full_name(), "pallets/flask", "{url}");
    }
}

#[test]
fn rejects_non_repository_urls() {
    let cases = [
        "http://github.com/pallets/flask",
        "https://gitlab.com/pallets/flask",
        "https://github.com/pallets",
        "https://github.com/pallets/flask/tree/main",
        "https://github.com/pallets/flask?tab=readme",
        "https://github.com/../flask",
        "not a url",
    ];
    for url in cases {
        let error = RepositoryRef::parse_url(url).expect_err("should reject");
        assert_eq!(error.error_code(), "VALIDATION_ERROR", "{url}");
    }
}

#[test]
fn parses_full_names() {
    let repo: RepositoryRef = "octo-org/my_repo.rs".parse().expect("valid full name");
    assert_eq!(repo.owner(), "octo-org");
    assert_eq!(repo.name(), "my_repo.rs");
    assert_eq!(repo.to_string(), "octo-org/my_repo.rs");
    assert_eq!(repo.github_url(), "https://github.com/octo-org/my_repo.rs");

    for bad in ["octo", "octo/", "/repo", "a/b/c", "octo/..", "oc to/repo", "octo/re po"] {
        assert!(RepositoryRef::parse_full_name(bad).is_err(), "{bad}");
    }
}

#[test]
fn scan_filters_files() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path().join("repo");
    write(&root, "src/lib.rs", b"pub fn lib() {}\n");
    write(&root, "src/app.py", b"def app():\n    pass\n");
    write(&root, "README.md", b"# readme\n");
    write(&root, ".hidden/secret.rs", b"fn secret() {}\n");
    write(&root, "target/debug/out.rs", b"fn generated() {}\n");
    write(&root, ".gitignore", b"target/\n");
    write(&root, "src/big.rs", &vec![b'a'; 4096]);
    write(&root, "src/binary.rs", &[0xff, 0xfe, 0x00, 0x80]);

    let source = source_with(
        SourceConfig {
            local_root: None,
            extensions: vec!["rs".to_string(), ".py".to_string()],
            max_file_size_bytes: 1024,
        },
        &temp_dir,
    );
    let files = source.scan(&root).expect("scan should succeed");
    let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();

    assert_eq!(paths, vec!["src/app.py", "src/lib.rs"]);
}

#[test]
fn scan_missing_root_is_source_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let source = source_with(SourceConfig::default(), &temp_dir);
    let error = source
        .scan(&temp_dir.path().join("nope"))
        .expect_err("missing root");
    assert_eq!(error.error_code(), "SOURCE_FAILED");
}

#[tokio::test]
async fn prepare_prefers_local_mirror() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mirror_root = temp_dir.path().join("mirrors");
    write(&mirror_root, "octo/widgets/src/lib.rs", b"fn widget() {}\n");

    let source = source_with(
        SourceConfig {
            local_root: Some(mirror_root.clone()),
            ..SourceConfig::default()
        },
        &temp_dir,
    );
    let repo = RepositoryRef::new("octo", "widgets").expect("valid repository");
    let root = source
        .prepare(&repo, &repo.github_url())
        .await
        .expect("mirror should be used");

    assert_eq!(root, mirror_root.join("octo").join("widgets"));
}

#[tokio::test]
async fn failed_clone_is_source_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let source = source_with(SourceConfig::default(), &temp_dir);
    let repo = RepositoryRef::new("octo", "missing").expect("valid repository");
    let bogus = format!("file://{}", temp_dir.path().join("does-not-exist").display());

    let error = source
        .prepare(&repo, &bogus)
        .await
        .expect_err("clone should fail");
    assert_eq!(error.error_code(), "SOURCE_FAILED");
}

#[tokio::test]
async fn collect_documents_chunks_every_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path().join("repo");
    write(&root, "a.py", b"def foo():\n    return 'foo value'\n");
    write(&root, "b.py", b"def bar():\n    return 'bar value'\n");

    let source = source_with(SourceConfig::default(), &temp_dir);
    let documents = source
        .collect_documents(&root, &ChunkingConfig::default())
        .await
        .expect("collect should succeed");

    let paths: Vec<Option<&str>> = documents.iter().map(Document::file_path).collect();
    assert_eq!(paths, vec![Some("a.py"), Some("b.py")]);
}
