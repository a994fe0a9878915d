//! Tests for structured error handling

use rstest::rstest;
use ventilation_coordinator::error::{ErrorCode, ErrorContext, ErrorReporter, ErrorSeverity};
use ventilation_coordinator::log_structured_error;
use ventilation_coordinator::CoordinatorError;

#[rstest]
#[case(CoordinatorError::transport("socket closed"), 1001, "transport", ErrorSeverity::Warning)]
#[case(CoordinatorError::timeout("fetch"), 1002, "transport", ErrorSeverity::Warning)]
#[case(CoordinatorError::configuration("bad host"), 1201, "configuration", ErrorSeverity::Critical)]
#[case(CoordinatorError::device("locked"), 1301, "device", ErrorSeverity::Error)]
#[case(CoordinatorError::validation("range"), 1401, "input", ErrorSeverity::Warning)]
#[case(CoordinatorError::shut_down("unit"), 1901, "internal", ErrorSeverity::Info)]
fn test_error_classification(
    #[case] error: CoordinatorError,
    #[case] number: u32,
    #[case] category: &str,
    #[case] severity: ErrorSeverity,
) {
    let code = error.to_error_code();
    assert_eq!(code.as_number(), number);
    assert_eq!(code.category(), category);
    assert_eq!(error.severity(), severity);
}

#[tokio::test]
async fn test_error_context_with_metadata() {
    let context = ErrorContext::new(ErrorCode::DeviceRejected, "services", "set_profile")
        .with_metadata("profile", "Boost")
        .with_metadata("attempt", 2);

    assert_eq!(context.component, "services");
    assert_eq!(context.operation, "set_profile");
    assert_eq!(context.metadata["profile"], "Boost");
    assert_eq!(context.metadata["attempt"], 2);
}

#[tokio::test]
async fn test_error_reporting() {
    let error = CoordinatorError::device("Fan speed setting locked");
    let context = ErrorContext::new(
        ErrorCode::DeviceRejected,
        "services",
        "set_profile_fan_speed_home",
    );

    // This only logs; nothing to capture
    ErrorReporter::log_error(&error, Some(context));
    log_structured_error!(error, "services", "set_profile_fan_speed_home");

    let api_response = ErrorReporter::format_api_error(&error);
    let error_obj = api_response["error"].as_object().unwrap();
    assert_eq!(error_obj["code"], 1301);
    assert_eq!(error_obj["category"], "device");
    assert_eq!(error_obj["retryable"], false);
    assert!(error_obj["message"]
        .as_str()
        .unwrap()
        .contains("Fan speed setting locked"));
}

#[test]
fn test_errors_are_cloneable_for_shared_waiters() {
    let error = CoordinatorError::transport("unreachable");
    let copies: Vec<_> = (0..3).map(|_| error.clone()).collect();
    assert!(copies.iter().all(|e| *e == error));
}
