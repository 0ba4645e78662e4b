//! Runs the `pty-bridge` binary and drives it through its stdin/stdout control channel.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

struct Bridge {
    child: Child,
    // Held open until closed explicitly, as a host application would.
    stdin: Option<ChildStdin>,
    ws_url: String,
}

impl Bridge {
    fn spawn(port_range: &str, shell_args: &[&str]) -> Self {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_pty-bridge"));
        cmd.arg("--shell")
            .arg("/bin/sh")
            .arg("--port-range")
            .arg(port_range)
            .arg("--cwd")
            .arg(std::env::temp_dir());
        for arg in shell_args {
            cmd.arg("--shell-arg").arg(arg);
        }
        let mut child = cmd
            .env_remove("PTY_BRIDGE_CONFIG")
            .env("RUST_LOG", "pty_bridge=debug")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start pty-bridge");

        let stdin = child.stdin.take().unwrap();
        let mut stdout = BufReader::new(child.stdout.take().unwrap());
        let mut line = String::new();
        stdout.read_line(&mut line).unwrap();

        let ready: serde_json::Value = serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("bad ready line {line:?}: {e}"));
        assert_eq!(ready["type"], "ready");
        let ws_url = ready["ws_url"].as_str().unwrap().to_string();

        Self {
            child,
            stdin: Some(stdin),
            ws_url,
        }
    }

    fn send(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("control input already closed");
        writeln!(stdin, "{}", line).unwrap();
        stdin.flush().unwrap();
    }

    fn close_input(&mut self) {
        self.stdin = None;
    }

    fn wait_for_exit(&mut self) -> ExitStatus {
        let deadline = Instant::now() + EXIT_TIMEOUT;
        loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                return status;
            }
            if Instant::now() >= deadline {
                let _ = self.child.kill();
                panic!("pty-bridge still running after {:?}", EXIT_TIMEOUT);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_ready_line_carries_ws_url() {
    let mut bridge = Bridge::spawn("47500-47519", &[]);

    assert!(bridge.ws_url.starts_with("ws://127.0.0.1:475"));
    let token = bridge.ws_url.rsplit("/ws/pty/").next().unwrap();
    assert_eq!(token.len(), 44);

    bridge.send(r#"{"type":"resize","rows":30,"cols":100}"#);
    bridge.send(r#"{"type":"quit"}"#);
    assert!(bridge.wait_for_exit().success());
}

#[test]
fn test_exits_when_shell_exits_with_stdin_open() {
    let mut bridge = Bridge::spawn("47520-47539", &["-c", "exit 0"]);

    let status = bridge.wait_for_exit();
    assert!(status.success());
}

#[test]
fn test_malformed_control_lines_are_ignored() {
    let mut bridge = Bridge::spawn("47540-47559", &[]);

    bridge.send("not json");
    bridge.send(r#"{"type":"reboot"}"#);
    thread::sleep(Duration::from_millis(200));
    assert!(bridge.child.try_wait().unwrap().is_none());

    bridge.send(r#"{"type":"quit"}"#);
    assert!(bridge.wait_for_exit().success());
}

#[test]
fn test_exits_on_control_input_eof() {
    let mut bridge = Bridge::spawn("47560-47579", &[]);

    bridge.close_input();
    assert!(bridge.wait_for_exit().success());
}
