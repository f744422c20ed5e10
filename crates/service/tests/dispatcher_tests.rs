//! Integration tests for the operation dispatcher
//!
//! Tests dispatch end to end with fake USB and process layers, including:
//! - Parameter validation before anything runs
//! - Reset through the USB backend
//! - Exit status classification of external tools
//! - Rejection of concurrent operations on one device
//!
//! Run with: `cargo test -p service --test dispatcher_tests`

use common::{
    BusLocation, DeviceIdentifier, DeviceSelector, ErrorKind, OperationKind, OperationResult,
    ScanMode,
};
use service::test_utils::{FakeRunner, FakeUsbBackend, mock_device};
use service::{
    DeviceEnumerator, Dispatcher, ExecutableCommand, OperationParams, ProcessOutput,
    ProcessRunner, Registry, Target,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn dispatcher(
    backend: FakeUsbBackend,
    runner: FakeRunner,
) -> Dispatcher<FakeUsbBackend, FakeRunner> {
    Dispatcher::new(Registry::default(), DeviceEnumerator::new(backend), runner)
}

fn sandisk() -> DeviceSelector {
    DeviceSelector::Id(DeviceIdentifier::new(0x0781, 0x5567))
}

mod parameter_validation {
    use super::*;

    #[test]
    fn test_format_without_filesystem_runs_nothing() {
        let runner = FakeRunner::exiting(0);
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner.clone());

        let result = dispatcher.execute(
            OperationKind::Format,
            &"/dev/sdb1".into(),
            &OperationParams::default(),
        );

        assert!(!result.succeeded());
        assert_eq!(result.error(), Some(ErrorKind::InvalidParameter));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_backup_without_destination_runs_nothing() {
        let runner = FakeRunner::exiting(0);
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner.clone());

        let result = dispatcher.execute(
            OperationKind::Backup,
            &"/dev/sdb1".into(),
            &OperationParams::with_destination(""),
        );

        assert_eq!(result.error(), Some(ErrorKind::InvalidParameter));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_empty_device_path() {
        let runner = FakeRunner::exiting(0);
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner.clone());

        let result = dispatcher.execute(
            OperationKind::CheckRepair,
            &"".into(),
            &OperationParams::default(),
        );

        assert_eq!(result.error(), Some(ErrorKind::InvalidParameter));
        assert!(runner.commands().is_empty());
    }
}

mod reset {
    use super::*;

    #[test]
    fn test_reset_unknown_device_makes_no_platform_call() {
        let backend = FakeUsbBackend::with_devices(vec![mock_device(1, 2, 0x046d, 0xc31c)]);
        let dispatcher = dispatcher(backend.clone(), FakeRunner::exiting(0));

        let result = dispatcher.execute(
            OperationKind::Reset,
            &Target::Device(sandisk()),
            &OperationParams::default(),
        );

        assert!(!result.succeeded());
        assert_eq!(result.error(), Some(ErrorKind::DeviceNotFound));
        assert_eq!(backend.reset_count(), 0);
    }

    #[test]
    fn test_reset_attached_device() {
        let backend = FakeUsbBackend::with_devices(vec![mock_device(1, 4, 0x0781, 0x5567)]);
        let runner = FakeRunner::exiting(0);
        let dispatcher = dispatcher(backend.clone(), runner.clone());

        let result = dispatcher.execute(
            OperationKind::Reset,
            &Target::Device(sandisk()),
            &OperationParams::default(),
        );

        assert!(result.succeeded(), "{}", result.message());
        assert_eq!(backend.resets()[0].location, BusLocation::new(1, 4));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_reset_by_usbfs_path() {
        let backend = FakeUsbBackend::with_devices(vec![
            mock_device(1, 4, 0x0781, 0x5567),
            mock_device(2, 7, 0x0781, 0x5567),
        ]);
        let dispatcher = dispatcher(backend.clone(), FakeRunner::exiting(0));

        let result = dispatcher.execute(
            OperationKind::Reset,
            &"/dev/bus/usb/002/007".into(),
            &OperationParams::default(),
        );

        assert!(result.succeeded(), "{}", result.message());
        assert_eq!(backend.resets()[0].location, BusLocation::new(2, 7));
    }

    #[test]
    fn test_reset_ambiguous_identifier() {
        let backend = FakeUsbBackend::with_devices(vec![
            mock_device(1, 4, 0x0781, 0x5567),
            mock_device(2, 7, 0x0781, 0x5567),
        ]);
        let dispatcher = dispatcher(backend.clone(), FakeRunner::exiting(0));

        let result = dispatcher.execute(
            OperationKind::Reset,
            &Target::Device(sandisk()),
            &OperationParams::default(),
        );

        assert_eq!(result.error(), Some(ErrorKind::AmbiguousDevice));
        assert_eq!(backend.reset_count(), 0);
    }

    #[test]
    fn test_reset_platform_failure() {
        let backend = FakeUsbBackend::with_devices(vec![mock_device(1, 4, 0x0781, 0x5567)]);
        backend.fail_resets("pipe error");
        let dispatcher = dispatcher(backend.clone(), FakeRunner::exiting(0));

        let result = dispatcher.execute(
            OperationKind::Reset,
            &Target::Device(sandisk()),
            &OperationParams::default(),
        );

        assert_eq!(result.error(), Some(ErrorKind::PlatformCall));
        assert!(result.message().contains("pipe error"));
        assert_eq!(backend.reset_count(), 1);
    }

    #[test]
    fn test_reset_with_usb_unavailable() {
        let dispatcher = dispatcher(
            FakeUsbBackend::unavailable("libusb not initialized"),
            FakeRunner::exiting(0),
        );

        let result = dispatcher.execute(
            OperationKind::Reset,
            &Target::Device(sandisk()),
            &OperationParams::default(),
        );

        assert_eq!(result.error(), Some(ErrorKind::Enumeration));
    }
}

mod external_commands {
    use super::*;

    #[test]
    fn test_check_repair_non_zero_exit_fails() {
        let runner = FakeRunner::with_output(ProcessOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "fsck.vfat: /dev/fake0: No such file\n".to_string(),
        });
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner.clone());

        let result = dispatcher.execute(
            OperationKind::CheckRepair,
            &"/dev/fake0".into(),
            &OperationParams::default(),
        );

        assert!(!result.succeeded());
        assert_eq!(result.error(), Some(ErrorKind::CommandExecution));
        assert!(result.message().contains("fsck"));
        assert!(result.message().contains("No such file"));
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_backup_zero_exit_succeeds() {
        let runner = FakeRunner::exiting(0);
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner.clone());

        let result = dispatcher.execute(
            OperationKind::Backup,
            &"/dev/sdb1".into(),
            &OperationParams::with_destination("/tmp/out"),
        );

        assert!(result.succeeded(), "{}", result.message());
        assert_eq!(result.kind(), OperationKind::Backup);
        assert_eq!(
            runner.commands(),
            vec![
                ExecutableCommand::new("sudo")
                    .arg("cp")
                    .arg("-a")
                    .arg("/dev/sdb1")
                    .arg("/tmp/out")
            ]
        );
    }

    #[test]
    fn test_success_message_includes_summary_line() {
        let runner = FakeRunner::with_output(ProcessOutput {
            code: Some(0),
            stdout: "Checking blocks 0 to 15633407\nPass completed, 0 bad blocks found.\n"
                .to_string(),
            stderr: String::new(),
        });
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner);

        let result = dispatcher.execute(
            OperationKind::ScanBadSectors,
            &"/dev/sdc".into(),
            &OperationParams::with_scan_mode(ScanMode::ReadOnly),
        );

        assert!(result.succeeded());
        assert!(result.message().ends_with("0 bad blocks found."));
    }

    #[test]
    fn test_launch_failure() {
        let runner = FakeRunner::failing_to_launch("sudo: command not found");
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner);

        let result = dispatcher.execute(
            OperationKind::Format,
            &"/dev/sdb1".into(),
            &OperationParams::with_filesystem("vfat"),
        );

        assert_eq!(result.error(), Some(ErrorKind::CommandExecution));
    }

    #[test]
    fn test_timeout_is_forwarded_and_reported() {
        let runner = FakeRunner::timing_out();
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner.clone())
            .with_timeout(Some(Duration::from_secs(30)));

        let result = dispatcher.execute(
            OperationKind::ScanBadSectors,
            &"/dev/sdc".into(),
            &OperationParams::default(),
        );

        assert_eq!(result.error(), Some(ErrorKind::Timeout));
        assert_eq!(runner.timeouts(), vec![Some(Duration::from_secs(30))]);
        assert!(
            result.message().starts_with("badblocks timed out after 30s"),
            "{}",
            result.message()
        );
    }

    #[test]
    fn test_zero_timeout_waits_forever() {
        let runner = FakeRunner::exiting(0);
        let dispatcher =
            dispatcher(FakeUsbBackend::new(), runner.clone()).with_timeout(Some(Duration::ZERO));

        let result = dispatcher.execute(
            OperationKind::CheckRepair,
            &"/dev/sdb1".into(),
            &OperationParams::default(),
        );

        assert!(result.succeeded(), "{}", result.message());
        assert_eq!(runner.timeouts(), vec![None]);
    }

    #[test]
    fn test_no_retry_after_failure() {
        let runner = FakeRunner::exiting(4);
        let dispatcher = dispatcher(FakeUsbBackend::new(), runner.clone());

        let result = dispatcher.execute(
            OperationKind::CheckRepair,
            &"/dev/sdb1".into(),
            &OperationParams::default(),
        );

        assert!(!result.succeeded());
        assert_eq!(runner.commands().len(), 1);
    }
}

mod concurrency {
    use super::*;

    /// Runner whose first call blocks until the test releases it; later
    /// calls return at once
    struct GateRunner {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        gate_taken: AtomicBool,
    }

    impl GateRunner {
        fn new(entered: mpsc::Sender<()>, release: mpsc::Receiver<()>) -> Self {
            Self {
                entered: Mutex::new(entered),
                release: Mutex::new(release),
                gate_taken: AtomicBool::new(false),
            }
        }
    }

    impl ProcessRunner for GateRunner {
        fn run(
            &self,
            _command: &ExecutableCommand,
            _timeout: Option<Duration>,
        ) -> common::Result<ProcessOutput> {
            if !self.gate_taken.swap(true, Ordering::SeqCst) {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            Ok(ProcessOutput {
                code: Some(0),
                ..ProcessOutput::default()
            })
        }
    }

    /// Hold a scan on `held` inside the runner, then try `CheckRepair` on
    /// `other` and return both results
    fn contend(held: Target, other: Target) -> (OperationResult, OperationResult) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let runner = GateRunner::new(entered_tx, release_rx);
        let dispatcher = Arc::new(Dispatcher::new(
            Registry::default(),
            DeviceEnumerator::new(FakeUsbBackend::new()),
            runner,
        ));

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                dispatcher.execute(
                    OperationKind::ScanBadSectors,
                    &held,
                    &OperationParams::default(),
                )
            })
        };

        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = dispatcher.execute(
            OperationKind::CheckRepair,
            &other,
            &OperationParams::default(),
        );

        release_tx.send(()).unwrap();
        (first.join().unwrap(), second)
    }

    #[test]
    fn test_other_spelling_of_same_path_is_rejected() {
        let (first, second) = contend("/dev/sdb".into(), "/dev/./sdb".into());
        assert!(first.succeeded());
        assert_eq!(second.error(), Some(ErrorKind::DeviceBusy));

        let (_, second) = contend("/dev/sdb".into(), "/dev/../dev/sdb".into());
        assert_eq!(second.error(), Some(ErrorKind::DeviceBusy));
    }

    #[cfg(unix)]
    #[test]
    fn test_link_to_busy_node_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("sdb");
        std::fs::write(&node, b"").unwrap();
        let by_id = dir.path().join("usb-SanDisk_Cruzer_Blade-0:0");
        std::os::unix::fs::symlink(&node, &by_id).unwrap();

        let (first, second) = contend(Target::Path(node.into()), Target::Path(by_id.into()));
        assert!(first.succeeded());
        assert_eq!(second.error(), Some(ErrorKind::DeviceBusy));
    }

    #[test]
    fn test_different_devices_run_side_by_side() {
        let (first, second) = contend("/dev/sdb".into(), "/dev/sdc".into());
        assert!(first.succeeded());
        assert!(second.error().is_none());
    }

    #[test]
    fn test_second_operation_on_same_path_is_rejected() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let runner = GateRunner::new(entered_tx, release_rx);
        let dispatcher = Arc::new(Dispatcher::new(
            Registry::default(),
            DeviceEnumerator::new(FakeUsbBackend::new()),
            runner,
        ));

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                dispatcher.execute(
                    OperationKind::ScanBadSectors,
                    &"/dev/sdb".into(),
                    &OperationParams::default(),
                )
            })
        };

        // Wait until the first scan is inside the runner
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(dispatcher.busy_tracker().is_busy("/dev/sdb"));

        let second = dispatcher.execute(
            OperationKind::CheckRepair,
            &"/dev/sdb".into(),
            &OperationParams::default(),
        );
        assert_eq!(second.error(), Some(ErrorKind::DeviceBusy));

        release_tx.send(()).unwrap();
        let first = first.join().unwrap();
        assert!(first.succeeded());
        assert!(!dispatcher.busy_tracker().is_busy("/dev/sdb"));
    }
}
