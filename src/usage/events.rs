use thiserror::Error;

use super::models::NewUsageEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageEventValidationError {
    #[error("usage event missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("usage event field `{field}` exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("usage event field `{field}` must not be negative (got {value})")]
    NegativeCount { field: &'static str, value: i32 },
}

/// Checks an event against the `usage_events` column constraints before it reaches the database.
pub fn validate_usage_event(event: &NewUsageEvent) -> Result<(), UsageEventValidationError> {
    require_text("feature", &event.feature, 50)?;
    require_text("model", &event.model, 100)?;
    require_text("provider", &event.provider, 50)?;
    if let Some(request_id) = &event.request_id {
        require_text("request_id", request_id, 64)?;
    }
    require_count("input_tokens", event.input_tokens)?;
    require_count("output_tokens", event.output_tokens)?;
    require_count("cached_tokens", event.cached_tokens)?;
    Ok(())
}

fn require_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), UsageEventValidationError> {
    if value.trim().is_empty() {
        return Err(UsageEventValidationError::MissingField { field });
    }
    if value.chars().count() > max {
        return Err(UsageEventValidationError::TooLong { field, max });
    }
    Ok(())
}

fn require_count(field: &'static str, value: i32) -> Result<(), UsageEventValidationError> {
    if value < 0 {
        return Err(UsageEventValidationError::NegativeCount { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event() -> NewUsageEvent {
        NewUsageEvent::new(Uuid::new_v4(), "sheets_agent", "gemini-1.5-flash", "google", 10, 5)
    }

    #[test]
    fn well_formed_event_passes() {
        assert!(validate_usage_event(&event().with_request_id("req-42")).is_ok());
    }

    #[test]
    fn blank_provider_is_reported() {
        let mut event = event();
        event.provider = "  ".into();
        let err = validate_usage_event(&event).expect_err("blank provider should error");
        assert_eq!(
            err,
            UsageEventValidationError::MissingField { field: "provider" }
        );
    }

    #[test]
    fn oversized_request_id_is_reported() {
        let event = event().with_request_id("r".repeat(65));
        assert!(matches!(
            validate_usage_event(&event),
            Err(UsageEventValidationError::TooLong {
                field: "request_id",
                max: 64
            })
        ));
    }

    #[test]
    fn negative_token_counts_are_reported() {
        let mut event = event();
        event.output_tokens = -1;
        assert!(matches!(
            validate_usage_event(&event),
            Err(UsageEventValidationError::NegativeCount {
                field: "output_tokens",
                value: -1
            })
        ));
    }
}
