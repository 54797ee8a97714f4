#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use serial_test::serial;

struct TestEnv {
    home: PathBuf,
}

static COMMAND_SEQ: AtomicU64 = AtomicU64::new(0);

impl TestEnv {
    fn new(prefix: &str) -> Self {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock failure")
            .as_nanos();
        let home = std::env::temp_dir().join(format!("cmdtrack-e2e-{prefix}-{nonce}"));
        fs::create_dir_all(&home).expect("failed to create temporary home");
        Self { home }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_cmdtrack"));
        command
            .args(args)
            .current_dir(&self.home)
            .env("CMDTRACK_HOME", &self.home)
            .env("CMDTRACK_POLL_INTERVAL_MS", "50")
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG");
        command
    }

    fn spawn(&self, args: &[&str]) -> (Child, PathBuf, PathBuf) {
        let command_id = COMMAND_SEQ.fetch_add(1, Ordering::Relaxed);
        let stdout_path = self.home.join(format!("cmd-{command_id}.stdout.log"));
        let stderr_path = self.home.join(format!("cmd-{command_id}.stderr.log"));
        let stdout_file = fs::File::create(&stdout_path).expect("failed to create stdout capture");
        let stderr_file = fs::File::create(&stderr_path).expect("failed to create stderr capture");

        let child = self
            .command(args)
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .expect("failed to spawn cmdtrack command");
        (child, stdout_path, stderr_path)
    }

    fn run(&self, args: &[&str]) -> Output {
        let (child, stdout_path, stderr_path) = self.spawn(args);
        wait_for_child(child, args, &stdout_path, &stderr_path)
    }

    fn list_json(&self, extra: &[&str]) -> Vec<Value> {
        let mut args = vec!["list", "--json"];
        args.extend_from_slice(extra);
        let output = self.run(&args);
        assert_success(&output, "list --json");
        serde_json::from_slice(&output.stdout).expect("list output should be JSON")
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.home);
    }
}

fn wait_for_child(mut child: Child, args: &[&str], stdout_path: &Path, stderr_path: &Path) -> Output {
    let timeout = Duration::from_secs(60);
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return read_command_output(status, stdout_path, stderr_path),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let status = child
                        .wait()
                        .expect("failed to wait for timed out cmdtrack command");
                    let output = read_command_output(status, stdout_path, stderr_path);
                    panic!(
                        "cmdtrack command timed out after {:?}: {:?}\nstdout:\n{}\nstderr:\n{}",
                        timeout,
                        args,
                        String::from_utf8_lossy(&output.stdout),
                        String::from_utf8_lossy(&output.stderr)
                    );
                }
                sleep(Duration::from_millis(50));
            }
            Err(err) => panic!("failed while waiting for cmdtrack command {:?}: {err}", args),
        }
    }
}

fn read_command_output(status: ExitStatus, stdout_path: &Path, stderr_path: &Path) -> Output {
    let stdout = fs::read(stdout_path).expect("failed to read captured stdout");
    let stderr = fs::read(stderr_path).expect("failed to read captured stderr");
    let _ = fs::remove_file(stdout_path);
    let _ = fs::remove_file(stderr_path);

    Output {
        status,
        stdout,
        stderr,
    }
}

fn assert_success(output: &Output, context: &str) {
    assert!(
        output.status.success(),
        "{context} failed\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    predicate()
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
#[serial]
fn run_records_item_and_log() {
    let env = TestEnv::new("run");

    let output = env.run(&["run", "echo", "hello-from-cmdtrack"]);
    assert_success(&output, "run echo");
    assert!(stdout_text(&output).contains("hello-from-cmdtrack"));

    let rows = env.list_json(&[]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "1");
    assert_eq!(rows[0]["exit"], "0");
    assert_eq!(rows[0]["command"], "echo hello-from-cmdtrack");
    assert!(rows[0]["started"]
        .as_str()
        .is_some_and(|started| started.ends_with(" ago")));

    let logs = env.run(&["logs", "1"]);
    assert_success(&logs, "logs 1");
    assert!(stdout_text(&logs).contains("hello-from-cmdtrack"));

    assert!(env.list_json(&["--live"]).is_empty());

    let table = env.run(&["ls"]);
    assert_success(&table, "ls");
    let table = stdout_text(&table);
    assert!(table.contains("EXIT"));
    assert!(table.contains("echo hello-from-cmdtrack"));
}

#[test]
#[serial]
fn exit_status_propagates_and_filters_apply() {
    let env = TestEnv::new("status");

    let failed = env.run(&["run", "sh", "-c", "'exit 3'"]);
    assert_eq!(failed.status.code(), Some(3));
    assert_success(&env.run(&["run", "true"]), "run true");

    let rows = env.list_json(&[]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["command"], "true");
    assert_eq!(rows[1]["exit"], "3");

    let matching = env.list_json(&["--command", "^sh "]);
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0]["id"], "1");

    let elsewhere = env.list_json(&["--dir", "/definitely/not/here"]);
    assert!(elsewhere.is_empty());

    let invalid = env.run(&["list", "--command", "("]);
    assert!(!invalid.status.success());
}

#[test]
#[serial]
fn silent_command_has_no_log_file() {
    let env = TestEnv::new("silent");

    assert_success(&env.run(&["run", "true"]), "run true");

    let logs = env.run(&["logs", "1"]);
    assert!(!logs.status.success());
    assert!(String::from_utf8_lossy(&logs.stderr).contains("no log"));

    let path = env.run(&["logs", "1", "--path"]);
    assert_success(&path, "logs --path");
    let path = stdout_text(&path);
    assert!(!Path::new(path.trim()).exists());
}

#[test]
#[serial]
fn kill_terminates_live_item_and_rejects_finished_one() {
    let env = TestEnv::new("kill");

    let (child, stdout_path, stderr_path) = env.spawn(&["run", "sleep", "30"]);
    assert!(
        wait_until(Duration::from_secs(10), || env.list_json(&["--live"]).len() == 1),
        "sleep should show up as live"
    );

    let kill = env.run(&["kill", "1"]);
    assert_success(&kill, "kill 1");
    assert!(stdout_text(&kill).contains("Termination requested"));

    let output = wait_for_child(child, &["run", "sleep", "30"], &stdout_path, &stderr_path);
    assert_eq!(output.status.code(), Some(143));

    let rows = env.list_json(&[]);
    assert_eq!(rows[0]["exit"], "143");

    let again = env.run(&["kill", "1"]);
    assert!(!again.status.success());
}

#[test]
#[serial]
fn rerun_repeats_command_in_original_directory() {
    let env = TestEnv::new("rerun");
    let workdir = env.home.join("work");
    fs::create_dir_all(&workdir).expect("failed to create workdir");
    let workdir_arg = workdir.to_string_lossy().into_owned();

    assert_success(
        &env.run(&["run", "--cwd", &workdir_arg, "pwd"]),
        "run pwd",
    );
    let rerun = env.run(&["rerun", "1"]);
    assert_success(&rerun, "rerun 1");
    assert!(stdout_text(&rerun).contains("work"));

    let rows = env.list_json(&[]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["directory"], rows[1]["directory"]);
}

#[test]
#[serial]
fn overlapping_runs_keep_both_items() {
    let env = TestEnv::new("overlap");

    let args = ["run", "sleep", "2"];
    let (child, stdout_path, stderr_path) = env.spawn(&args);
    assert!(
        wait_until(Duration::from_secs(10), || env.list_json(&["--live"]).len() == 1),
        "sleep should show up as live"
    );

    assert_success(&env.run(&["run", "echo", "quick"]), "run echo quick");
    let output = wait_for_child(child, &args, &stdout_path, &stderr_path);
    assert_success(&output, "run sleep 2");

    let rows = env.list_json(&[]);
    let summary: Vec<(String, String)> = rows
        .iter()
        .map(|row| {
            (
                row["id"].as_str().unwrap_or_default().to_string(),
                row["command"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("2".to_string(), "echo quick".to_string()),
            ("1".to_string(), "sleep 2".to_string()),
        ]
    );
    assert!(rows.iter().all(|row| row["exit"] == "0"));
}

#[test]
#[serial]
fn terminated_supervisor_flushes_and_closes_its_item() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let env = TestEnv::new("teardown");

    let args = ["run", "sh", "-c", "'echo started; sleep 10'"];
    let (child, stdout_path, stderr_path) = env.spawn(&args);
    assert!(
        wait_until(Duration::from_secs(10), || env.list_json(&["--live"]).len() == 1),
        "command should show up as live"
    );
    assert!(
        wait_until(Duration::from_secs(10), || env.run(&["logs", "1"]).status.success()),
        "first output should reach the log"
    );

    let pid = i32::try_from(child.id()).expect("pid fits in i32");
    kill(Pid::from_raw(pid), Signal::SIGTERM).expect("failed to signal cmdtrack run");
    let output = wait_for_child(child, &args, &stdout_path, &stderr_path);
    assert!(!output.status.success());

    assert!(env.list_json(&["--live"]).is_empty());
    let rows = env.list_json(&[]);
    assert_ne!(rows[0]["exit"], "--");

    let logs = env.run(&["logs", "1"]);
    assert_success(&logs, "logs 1");
    assert!(stdout_text(&logs).contains("started"));
}
