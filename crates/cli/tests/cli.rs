use std::fs;
use std::net::TcpListener;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;

fn with_timeout<F, R>(duration: Duration, f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        let _ = tx.send(result);
    });

    match rx.recv_timeout(duration) {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => panic::resume_unwind(err),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test timed out after {:?}", duration)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            panic!("test worker disconnected without signalling completion")
        }
    }
}

/// `gerrit-cl` isolated from the user's configuration and environment.
fn gerrit_cl(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("gerrit-cl").unwrap();
    cmd.env("HOME", home)
        .env_remove("USERPROFILE")
        .env_remove("GERRIT_HOST")
        .env_remove("GERRIT_USERNAME")
        .env_remove("GERRIT_SSH_PORT")
        .env_remove("RUST_LOG")
        .current_dir(home)
        .timeout(Duration::from_secs(10));
    cmd
}

fn unused_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn help_lists_stream_events() {
    with_timeout(Duration::from_secs(10), || {
        let home = tempfile::tempdir().unwrap();
        gerrit_cl(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("stream-events"));
    });
}

#[test]
fn missing_host_is_fatal() {
    with_timeout(Duration::from_secs(10), || {
        let home = tempfile::tempdir().unwrap();
        gerrit_cl(home.path())
            .arg("stream-events")
            .assert()
            .code(1)
            .stderr(predicate::str::starts_with("fatal: gerrit.host not set"));
    });
}

#[test]
fn missing_username_is_fatal() {
    with_timeout(Duration::from_secs(10), || {
        let home = tempfile::tempdir().unwrap();
        gerrit_cl(home.path())
            .env("GERRIT_HOST", "review.example.org")
            .arg("stream-events")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("fatal: gerrit.username not set"));
    });
}

#[test]
fn config_without_gerrit_section_is_fatal() {
    with_timeout(Duration::from_secs(10), || {
        let home = tempfile::tempdir().unwrap();
        fs::write(home.path().join(".gerrit-cl.toml"), "[review]\nhost = \"x\"\n").unwrap();
        gerrit_cl(home.path())
            .arg("stream-events")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("missing section [gerrit]"));
    });
}

#[test]
fn explicit_config_must_exist() {
    with_timeout(Duration::from_secs(10), || {
        let home = tempfile::tempdir().unwrap();
        gerrit_cl(home.path())
            .arg("--config")
            .arg(home.path().join("absent.toml"))
            .arg("stream-events")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("cannot read configuration"));
    });
}

#[test]
fn invalid_env_port_is_fatal() {
    with_timeout(Duration::from_secs(10), || {
        let home = tempfile::tempdir().unwrap();
        gerrit_cl(home.path())
            .env("GERRIT_SSH_PORT", "ssh")
            .arg("stream-events")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("invalid port 'ssh'"));
    });
}

#[test]
fn unreachable_host_reports_cause() {
    with_timeout(Duration::from_secs(15), || {
        let home = tempfile::tempdir().unwrap();
        let project = home.path().join("project");
        fs::create_dir_all(project.join("sub")).unwrap();
        fs::write(
            project.join(".gerrit-cl.toml"),
            format!(
                "[gerrit]\nhost = \"127.0.0.1\"\nusername = \"jdoe\"\nssh_port = {}\n",
                unused_port()
            ),
        )
        .unwrap();

        gerrit_cl(home.path())
            .current_dir(project.join("sub"))
            .arg("stream-events")
            .assert()
            .code(1)
            .stderr(predicate::str::starts_with(
                "fatal: cannot stream events from 127.0.0.1",
            ))
            .stderr(predicate::str::contains("caused by: unable to connect"));
    });
}

#[test]
fn missing_passphrase_variable_is_fatal() {
    with_timeout(Duration::from_secs(10), || {
        let home = tempfile::tempdir().unwrap();
        gerrit_cl(home.path())
            .env_remove("GERRIT_CL_TEST_PASSPHRASE")
            .args([
                "--host",
                "127.0.0.1",
                "--username",
                "jdoe",
                "stream-events",
                "--passphrase-env",
                "GERRIT_CL_TEST_PASSPHRASE",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains(
                "environment variable GERRIT_CL_TEST_PASSPHRASE not set",
            ));
    });
}

#[test]
fn gitreview_supplies_host_and_port() {
    with_timeout(Duration::from_secs(15), || {
        let home = tempfile::tempdir().unwrap();
        let repo = home.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        fs::write(
            repo.join(".gitreview"),
            format!("[gerrit]\nhost=127.0.0.1\nport={}\n", unused_port()),
        )
        .unwrap();

        gerrit_cl(home.path())
            .current_dir(&repo)
            .args(["--username", "jdoe", "stream-events"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("caused by: unable to connect to 127.0.0.1"));
    });
}

#[test]
fn interrupt_while_connecting_exits() {
    with_timeout(Duration::from_secs(20), || {
        let home = tempfile::tempdir().unwrap();
        // Accepts the TCP connection and never speaks SSH.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let child = Command::new(assert_cmd::cargo::cargo_bin("gerrit-cl"))
            .env("HOME", home.path())
            .env_remove("GERRIT_HOST")
            .env_remove("GERRIT_USERNAME")
            .env_remove("GERRIT_SSH_PORT")
            .env_remove("RUST_LOG")
            .current_dir(home.path())
            .args(["--host", "127.0.0.1", "--username", "jdoe"])
            .args(["stream-events", "--port", &port])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        // The handler is installed before the connection is attempted.
        let (_socket, _) = listener.accept().unwrap();
        let interrupted = Instant::now();
        kill(Pid::from_raw(i32::try_from(child.id()).unwrap()), Signal::SIGINT).unwrap();
        let output = child.wait_with_output().unwrap();

        assert!(interrupted.elapsed() < Duration::from_secs(10));
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Interruption caught..."), "{stderr}");
        assert!(!stderr.contains("fatal:"), "{stderr}");
    });
}
