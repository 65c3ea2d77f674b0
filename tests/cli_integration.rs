//! CLI integration tests
//!
//! Tests the command-line interface end-to-end.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Base64 of 32 zero bytes, the key the checked-in fixture is encrypted under.
const ZERO_KEY_B64: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

const HELLO_PLAIN: &str =
    r#"{"data":"hello","key_vault_name":"kv1","secret_name":"s1","encrypted_data":""}"#;

fn nbcrypt_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_nbcrypt"));
    for var in [
        "AZURE_ACCESS_TOKEN",
        "NBCRYPT_KEY_ENCODING",
        "NBCRYPT_VAULT_URL_TEMPLATE",
        "NBCRYPT_TIMEOUT_SECS",
        "RUST_LOG",
        "HTTP_PROXY",
        "HTTPS_PROXY",
        "ALL_PROXY",
        "http_proxy",
        "https_proxy",
        "all_proxy",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Run nbcrypt with key material supplied on stdin
fn run_nbcrypt_with_key(args: &[&str], key: &str) -> Result<Output, std::io::Error> {
    let mut child = nbcrypt_command()
        .arg("--key-stdin")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        // Ignore BrokenPipe errors - the command may exit before reading stdin
        // if it encounters an error (e.g., file not found)
        let _ = stdin.write_all(key.as_bytes());
    }

    child.wait_with_output()
}

/// Get path to testdata directory
fn testdata_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("testdata");
    path.push(filename);
    path
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Decrypt known ciphertext.
#[test]
fn test_decrypt_known_record() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("hello.json.nb");
    fs::copy(testdata_path("hello.json.nb"), &path).unwrap();

    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], ZERO_KEY_B64).unwrap();
    assert!(result.status.success(), "decrypt failed: {}", stderr_of(&result));

    let record = read_json(&path);
    assert_eq!(record["data"], "hello");
    assert_eq!(record["encrypted_data"], "");
    assert_eq!(record["key_vault_name"], "kv1");
    assert_eq!(record["secret_name"], "s1");
}

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.json.nb");
    fs::write(&path, HELLO_PLAIN).unwrap();

    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], ZERO_KEY_B64).unwrap();
    assert!(result.status.success(), "encrypt failed: {}", stderr_of(&result));

    let record = read_json(&path);
    assert_eq!(record["data"], "");
    assert!(!record["encrypted_data"].as_str().unwrap().is_empty());

    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], ZERO_KEY_B64).unwrap();
    assert!(result.status.success(), "decrypt failed: {}", stderr_of(&result));

    let record = read_json(&path);
    assert_eq!(record["data"], "hello");
    assert_eq!(record["encrypted_data"], "");
}

#[test]
fn test_null_ciphertext_field_is_encrypted() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("a.nb");
    fs::write(
        &path,
        r#"{"data":"hello","key_vault_name":"kv1","secret_name":"s1","encrypted_data":null}"#,
    )
    .unwrap();

    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], ZERO_KEY_B64).unwrap();
    assert!(result.status.success(), "encrypt failed: {}", stderr_of(&result));

    let record = read_json(&path);
    assert_eq!(record["data"], "");
    assert!(!record["encrypted_data"].as_str().unwrap().is_empty());
}

#[test]
fn test_output_is_indented_with_stable_key_order() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("a.nb");
    fs::write(&path, HELLO_PLAIN).unwrap();

    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], ZERO_KEY_B64).unwrap();
    assert!(result.status.success());

    let text = fs::read_to_string(&path).unwrap();
    let keys: Vec<usize> = ["encrypted_data", "key_vault_name", "secret_name", "\"data\""]
        .iter()
        .map(|k| text.find(k).unwrap())
        .collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "unexpected key order: {text}");
    assert!(text.starts_with("{\n  \"encrypted_data\": \""));
}

#[test]
fn test_keep_ciphertext() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("hello.json.nb");
    fs::copy(testdata_path("hello.json.nb"), &path).unwrap();
    let before = read_json(&path);

    let result = run_nbcrypt_with_key(
        &["--keep-ciphertext", path.to_str().unwrap()],
        ZERO_KEY_B64,
    )
    .unwrap();
    assert!(result.status.success(), "decrypt failed: {}", stderr_of(&result));

    let record = read_json(&path);
    assert_eq!(record["data"], "hello");
    assert_eq!(record["encrypted_data"], before["encrypted_data"]);
}

#[test]
fn test_dry_run_prints_record_and_keeps_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("hello.json.nb");
    fs::copy(testdata_path("hello.json.nb"), &path).unwrap();
    let original = fs::read(&path).unwrap();

    let result =
        run_nbcrypt_with_key(&["--dry-run", path.to_str().unwrap()], ZERO_KEY_B64).unwrap();
    assert!(result.status.success(), "dry run failed: {}", stderr_of(&result));

    let printed: serde_json::Value = serde_json::from_slice(&result.stdout).unwrap();
    assert_eq!(printed["data"], "hello");
    assert_eq!(fs::read(&path).unwrap(), original);
}

#[test]
fn test_raw_key_encoding() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("a.nb");
    fs::write(&path, HELLO_PLAIN).unwrap();

    // 16 raw bytes selects AES-128.
    let key = "0123456789abcdef\n";
    let result = run_nbcrypt_with_key(
        &["--key-encoding", "raw", path.to_str().unwrap()],
        key,
    )
    .unwrap();
    assert!(result.status.success(), "encrypt failed: {}", stderr_of(&result));

    let result = run_nbcrypt_with_key(
        &["--key-encoding", "raw", path.to_str().unwrap()],
        key,
    )
    .unwrap();
    assert!(result.status.success(), "decrypt failed: {}", stderr_of(&result));
    assert_eq!(read_json(&path)["data"], "hello");
}

#[test]
fn test_wrong_key_fails_and_keeps_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("hello.json.nb");
    fs::copy(testdata_path("hello.json.nb"), &path).unwrap();
    let original = fs::read(&path).unwrap();

    let wrong_key = "ERERERERERERERERERERERERERERERERERERERERERE=";
    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], wrong_key).unwrap();

    assert!(!result.status.success());
    assert!(
        stderr_of(&result).contains("authentication failed"),
        "Expected authentication failure, got: {}",
        stderr_of(&result)
    );
    assert_eq!(fs::read(&path).unwrap(), original);
}

#[test]
fn test_invalid_key_length_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("a.nb");
    fs::write(&path, HELLO_PLAIN).unwrap();

    let result =
        run_nbcrypt_with_key(&["--key-encoding", "raw", path.to_str().unwrap()], "short").unwrap();

    assert!(!result.status.success());
    assert!(stderr_of(&result).contains("invalid AES key length"));
    assert_eq!(fs::read_to_string(&path).unwrap(), HELLO_PLAIN);
}

#[test]
fn test_empty_record_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("a.nb");
    fs::write(&path, r#"{"key_vault_name":"kv1","secret_name":"s1"}"#).unwrap();

    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], ZERO_KEY_B64).unwrap();

    assert!(!result.status.success());
    assert!(stderr_of(&result).contains("cannot decrypt"));
}

#[test]
fn test_nonexistent_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nonexistent.nb");

    let result = run_nbcrypt_with_key(&[path.to_str().unwrap()], ZERO_KEY_B64).unwrap();

    assert!(!result.status.success());
    assert!(stderr_of(&result).contains("failed to read from"));
    assert!(!path.exists());
}

#[test]
fn test_key_vault_round_trip() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/secrets/s1")
        .match_query(mockito::Matcher::UrlEncoded(
            "api-version".into(),
            "7.4".into(),
        ))
        .match_header("authorization", "Bearer integration-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(r#"{{"value":"{}"}}"#, ZERO_KEY_B64))
        .expect(2)
        .create();

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.json.nb");
    fs::write(&path, HELLO_PLAIN).unwrap();

    for _ in 0..2 {
        let result = nbcrypt_command()
            .args(["--access-token", "integration-token"])
            .args(["--vault-url-template", server.url().as_str()])
            .arg(&path)
            .output()
            .unwrap();
        assert!(result.status.success(), "run failed: {}", stderr_of(&result));
    }

    mock.assert();
    assert_eq!(read_json(&path)["data"], "hello");
}

#[test]
fn test_key_vault_error_is_reported() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/secrets/s1")
        .match_query(mockito::Matcher::Any)
        .with_status(403)
        .with_body(
            r#"{"error":{"code":"Forbidden","message":"The user does not have secrets get permission."}}"#,
        )
        .create();

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.json.nb");
    fs::write(&path, HELLO_PLAIN).unwrap();

    let result = nbcrypt_command()
        .args(["--access-token", "t"])
        .args(["--vault-url-template", server.url().as_str()])
        .arg(&path)
        .output()
        .unwrap();

    assert!(!result.status.success());
    let stderr = stderr_of(&result);
    assert!(stderr.contains("Forbidden"), "got: {stderr}");
    assert!(stderr.contains("vault 'kv1'"), "got: {stderr}");
    assert_eq!(fs::read_to_string(&path).unwrap(), HELLO_PLAIN);
}
