use std::time::{Duration, Instant};

use termbridge_core::{PtyProcess, PtyRead, SpawnSpec};

fn sh(script: &str) -> SpawnSpec {
    SpawnSpec::new("/bin/sh").arg("-c").arg(script)
}

async fn read_until(pty: &PtyProcess, needle: &str, within: Duration) -> String {
    let deadline = Instant::now() + within;
    let mut out = Vec::new();
    while Instant::now() < deadline {
        match pty.read_nonblocking(4096).await {
            Ok(PtyRead::Data(bytes)) => out.extend_from_slice(&bytes),
            Ok(PtyRead::Empty) => tokio::time::sleep(Duration::from_millis(20)).await,
            Err(_) => break,
        }
        if String::from_utf8_lossy(&out).contains(needle) {
            break;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[tokio::test]
async fn test_resize_reaches_child_via_sigwinch() {
    // The trap prints the terminal size each time the child is told it changed
    let pty = PtyProcess::spawn(
        &sh("trap 'stty size' WINCH; echo ready; while :; do sleep 0.1; done"),
        (80, 24),
    )
    .unwrap();
    let out = read_until(&pty, "ready", Duration::from_secs(5)).await;
    assert!(out.contains("ready"), "child did not start: {:?}", out);

    pty.resize(120, 40).await.unwrap();
    assert_eq!(pty.dimensions(), (120, 40));

    let out = read_until(&pty, "40 120", Duration::from_secs(5)).await;
    assert!(out.contains("40 120"), "child saw: {:?}", out);

    pty.terminate(Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_initial_size_is_applied() {
    let pty = PtyProcess::spawn(&sh("stty size; sleep 5"), (100, 30)).unwrap();
    let out = read_until(&pty, "30 100", Duration::from_secs(5)).await;
    assert!(out.contains("30 100"), "child saw: {:?}", out);
    pty.terminate(Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_output_after_exit_is_still_readable() {
    let pty = PtyProcess::spawn(&sh("echo last-words"), (80, 24)).unwrap();
    let out = read_until(&pty, "last-words", Duration::from_secs(5)).await;
    assert!(out.contains("last-words"));

    let deadline = Instant::now() + Duration::from_secs(5);
    while pty.is_alive().await && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!pty.is_alive().await);

    // Closing after the child already exited is still clean
    pty.terminate(Duration::from_millis(100)).await;
    assert!(pty.is_terminated());
}
