//! Integration tests for the logging of the buffer layer
//!
//! Swaps the global logger, so every test is serialized.
//! No GPU required.
//!
//! Run with: cargo test --test logging_integration_tests

use std::sync::{Arc, Mutex};
use serial_test::serial;
use vbo_geometry::vbo::{AttributeBufferSet, Engine, Error, RegistryConfig};
use vbo_geometry::vbo::log::{Logger, LogEntry, LogSeverity};
use vbo_geometry::vbo::render::MockGraphicsDevice;

// ============================================================================
// TEST LOGGER IMPLEMENTATION
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn device() -> Arc<Mutex<MockGraphicsDevice>> {
    Arc::new(Mutex::new(MockGraphicsDevice::new()))
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_custom_logger() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log(LogSeverity::Info, "test::module", "Test info message".to_string());
    Engine::log(LogSeverity::Warn, "test::module", "Test warning message".to_string());

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].severity, LogSeverity::Info);
        assert_eq!(captured[1].message, "Test warning message");
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_failed_call_logs_error_with_location() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let mut set = AttributeBufferSet::new(device());
    let result = set.set_indices(&[0, 1, 2], false);
    assert!(matches!(result, Err(Error::InvalidState(_))));

    {
        let captured = entries.lock().unwrap();
        let error = captured.iter()
            .find(|e| e.severity == LogSeverity::Error)
            .expect("an ERROR entry");
        assert_eq!(error.source, "vbo::IndexedBufferSet");
        assert!(error.message.contains("no vertex data"));
        assert!(error.file.is_some());
        assert!(error.line.is_some());
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_index_truncation_warns() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let mut set = AttributeBufferSet::new(device());
    set.set_vertices(&[0.0; 9], false).unwrap();
    set.set_indices(&[0, 1, 300], false).unwrap();

    {
        let captured = entries.lock().unwrap();
        let warnings: Vec<&LogEntry> = captured.iter()
            .filter(|e| e.severity == LogSeverity::Warn && e.source == "vbo::IndexedBufferSet")
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("masked"));
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_index_truncation_warning_can_be_disabled() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let config = RegistryConfig { warn_on_index_truncation: false, ..RegistryConfig::default() };
    let mut set = AttributeBufferSet::with_config(device(), config);
    set.set_vertices(&[0.0; 9], false).unwrap();
    set.set_indices(&[0, 1, 300], false).unwrap();

    {
        let captured = entries.lock().unwrap();
        assert!(!captured.iter().any(|e| e.severity == LogSeverity::Warn));
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_lifecycle_is_reported_with_label() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let config = RegistryConfig { label: "teapot".to_string(), ..RegistryConfig::default() };
    let mut set = AttributeBufferSet::with_config(device(), config);
    set.set_vertices(&[0.0; 9], false).unwrap();
    set.set_indices(&[0, 1, 2], false).unwrap();
    set.create_buffers().unwrap();
    set.destroy().unwrap();

    {
        let captured = entries.lock().unwrap();
        let infos: Vec<&LogEntry> = captured.iter()
            .filter(|e| e.severity == LogSeverity::Info && e.source == "vbo::BufferRegistry")
            .collect();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|e| e.message.contains("'teapot'")));
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_logger_reset() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log(LogSeverity::Info, "test", "Message 1".to_string());
    Engine::reset_logger();
    Engine::log(LogSeverity::Info, "test", "Message 2".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
}
