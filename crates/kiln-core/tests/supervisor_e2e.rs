//! End-to-end supervisor tests against a fake builder.
//!
//! The builder is a shell script dropped into a temporary builder location;
//! the base system is a tiny directory tree. A consumer thread attaches
//! through the real rendezvous socket and reads the pty stream until the
//! sentinel.

use kiln_core::{BuildSupervisor, KilnConfig, rendezvous_socket};
use kiln_proto::{
    BuildReport, END_OF_STREAM, FAILURE_MARKER, ImageSpec, Outcome, OutcomeReporter,
    STARTUP_BANNER, SUCCESS_MARKER, SentinelScanner,
};
use kiln_pty::recv_fd;
use std::fs;
use std::io::Read;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct RecordingReporter(Arc<Mutex<Vec<BuildReport>>>);

impl OutcomeReporter for RecordingReporter {
    fn report(&self, report: &BuildReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

impl RecordingReporter {
    fn single(&self) -> BuildReport {
        let reports = self.0.lock().unwrap();
        assert_eq!(reports.len(), 1, "expected exactly one report");
        reports[0].clone()
    }
}

/// Builds a worker fixture: base tree, builder script, workspace and socket
/// directories, all inside one temp dir.
fn fixture(run_sh: &str) -> (TempDir, KilnConfig) {
    let dir = TempDir::new().unwrap();

    let base = dir.path().join("base");
    fs::create_dir_all(base.join("etc")).unwrap();
    fs::write(base.join("etc/os-release"), "NAME=test\n").unwrap();

    let builder = dir.path().join("builder");
    fs::create_dir_all(&builder).unwrap();
    fs::write(builder.join("run.sh"), run_sh).unwrap();

    let config = KilnConfig {
        base_system: base,
        builder_location: builder,
        workspace: dir.path().join("workspace"),
        socket_dir: dir.path().join("sockets"),
        ..KilnConfig::default()
    };
    config.ensure_workspace().unwrap();
    fs::create_dir_all(&config.socket_dir).unwrap();

    (dir, config)
}

fn scenario_spec() -> ImageSpec {
    serde_json::from_str(
        r#"{
            "id": "abc123",
            "selected_packages": ["vim"],
            "root_password": "x",
            "users": [{"username": "bob", "password": "y"}],
            "target": {"device": "Raspberry Pi 3", "distro": "TestOS"},
            "configuration": {"HOSTNAME": "h1", "BAD": "z"}
        }"#,
    )
    .unwrap()
}

/// Binds the rendezvous socket and returns a thread that plays the consumer:
/// receive the pty master, then read the stream until the sentinel.
fn attach_consumer(socket_path: &Path) -> std::thread::JoinHandle<Vec<u8>> {
    let listener = UnixListener::bind(socket_path).unwrap();
    std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let master = recv_fd(&stream).unwrap();

        let mut master = fs::File::from(master);
        let mut collected = Vec::new();
        let mut scanner = SentinelScanner::new();
        let mut buf = [0u8; 4096];
        loop {
            match master.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if scanner.push(&buf[..n]) {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        collected
    })
}

fn marker_text(marker: &[u8]) -> &[u8] {
    // The trailing newline is echoed through the line discipline as \r\n;
    // match on the text alone.
    marker.strip_suffix(b"\n").unwrap_or(marker)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_build_end_to_end() {
    let (_dir, config) = fixture("env > \"$WORKSPACE_DIR/captured.env\"\nexit 0\n");
    let workspace = config.workspace.clone();
    let target_dir = workspace.join("abc123");

    let consumer = attach_consumer(&rendezvous_socket(&config.socket_dir, "abc123"));
    let reporter = RecordingReporter::default();
    let supervisor = BuildSupervisor::new(config, reporter.clone());

    let code = supervisor.run("42", scenario_spec()).await.unwrap();
    assert_eq!(code, 0);

    // Builder environment contract, captured by the fake builder.
    let env = fs::read_to_string(workspace.join("captured.env")).unwrap();
    let has = |line: &str| env.lines().any(|l| l == line);
    assert!(has("BUILD_ID=abc123"));
    assert!(has("APT_INCLUDES=vim"));
    assert!(has("RPI_MODEL=3"));
    assert!(has("ENABLE_ROOT=true"));
    assert!(has("ENABLE_USER=true"));
    assert!(has("USER_NAME=bob"));
    assert!(has("HOSTNAME=h1"));
    assert!(has(&format!("BASEDIR={}", target_dir.display())));
    assert!(!env.contains("BAD=z"));

    // The workspace is gone regardless of outcome.
    assert!(!target_dir.exists());

    // Stream contract: banner, then the success marker, then the sentinel,
    // which appears exactly once and last.
    let stream = consumer.join().unwrap();
    let banner_at = find(&stream, marker_text(STARTUP_BANNER)).expect("banner missing");
    let marker_at = find(&stream, marker_text(SUCCESS_MARKER)).expect("success marker missing");
    let sentinel_at = find(&stream, END_OF_STREAM).expect("sentinel missing");
    assert!(banner_at < marker_at && marker_at < sentinel_at);
    assert_eq!(count(&stream, END_OF_STREAM), 1);
    assert!(stream.ends_with(END_OF_STREAM));
    assert!(find(&stream, marker_text(FAILURE_MARKER)).is_none());

    let report = reporter.single();
    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.user_id, "42");
    assert_eq!(report.build_id, "abc123");
    assert_eq!(report.subject, "TestOS has built!");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_build_without_a_consumer_still_terminates() {
    let (_dir, config) = fixture("exit 3\n");
    let target_dir = config.workspace.join("abc123");

    // Nobody ever listens on the rendezvous socket: the handoff channel must
    // not keep the job from finishing.
    let reporter = RecordingReporter::default();
    let supervisor = BuildSupervisor::new(config, reporter.clone());

    let code = supervisor.run("42", scenario_spec()).await.unwrap();
    assert_eq!(code, 3);
    assert!(!target_dir.exists());

    let report = reporter.single();
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.subject, "TestOS build has failed!");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn existing_workspace_aborts_the_suspended_builder() {
    let (_dir, config) = fixture("exit 0\n");
    let target_dir = config.workspace.join("abc123");
    fs::create_dir_all(&target_dir).unwrap();

    let reporter = RecordingReporter::default();
    let supervisor = BuildSupervisor::new(config, reporter.clone());

    let code = supervisor.run("42", scenario_spec()).await.unwrap();
    // The builder was SIGKILLed while still suspended.
    assert_eq!(code, 128 + libc::SIGKILL);
    assert!(!target_dir.exists());

    let report = reporter.single();
    assert_eq!(report.outcome, Outcome::Failed);
}
