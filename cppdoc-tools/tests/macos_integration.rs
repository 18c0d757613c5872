//! Integration tests for the Terminal.app host.
//!
//! These drive the real Terminal application and the `screencapture` tool.
//! They are gated by `#[cfg(target_os = "macos")]` so they only run on macOS,
//! and they return early when Terminal cannot be scripted (e.g. in CI
//! without automation permission).

#[cfg(target_os = "macos")]
mod macos_integration {
    use cppdoc_core::config::CaptureConfig;
    use cppdoc_core::terminal::{LaunchRequest, TerminalHost, write_launcher_script};
    use cppdoc_tools::MacTerminalHost;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_capture_and_close() {
        let host = MacTerminalHost::new(CaptureConfig::default());
        if !host.is_available().await {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let executable = dir.path().join("hello");
        std::fs::write(&executable, "#!/bin/sh\necho Hello from cppdoc\n").unwrap();
        std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)).unwrap();
        let request = LaunchRequest {
            script: dir.path().join("run_hello.sh"),
            executable,
            output: dir.path().join("hello_output.txt"),
            label: "hello".into(),
        };
        write_launcher_script(&request).unwrap();

        host.launch(&request).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(host.is_busy().await.is_ok());

        let shot = dir.path().join("screenshot_hello.jpg");
        if host.screenshot_window(&shot).await.is_ok() {
            assert!(std::fs::metadata(&shot).unwrap().len() > 0);
        }
        host.close().await.unwrap();
    }
}
