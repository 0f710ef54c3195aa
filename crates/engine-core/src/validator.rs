use crate::{
    error::{EngineError, ErrorCode, user_message_for},
    types::{Action, Step},
};

/// Non-fatal warning attached to command-step dispatches.
pub const COMMAND_STEP_WARNING: &str = "Command execution may be disabled on desktop.";

/// Validate an action before dispatch.
///
/// Two passes in order: local bounds first (step count, text length), then
/// shape (non-empty id and steps, per-variant field checks). Bounds failures
/// carry their dedicated error codes; shape failures are `CLIENT_ERROR`.
pub fn validate_action(
    action: &Action,
    max_steps: usize,
    max_text_chars: usize,
) -> Result<(), EngineError> {
    check_bounds(action, max_steps, max_text_chars)?;
    check_shape(action)
}

fn check_bounds(action: &Action, max_steps: usize, max_text_chars: usize) -> Result<(), EngineError> {
    if action.steps.len() > max_steps {
        return Err(EngineError::new(
            ErrorCode::MaxStepsExceeded,
            user_message_for(ErrorCode::MaxStepsExceeded).unwrap_or_default(),
        ));
    }

    for step in &action.steps {
        // Host-side length checks count UTF-16 code units, so astral-plane
        // characters weigh two.
        if let Step::Text { value } = step
            && value.encode_utf16().count() > max_text_chars
        {
            return Err(EngineError::new(
                ErrorCode::MaxTextLengthExceeded,
                user_message_for(ErrorCode::MaxTextLengthExceeded).unwrap_or_default(),
            ));
        }
    }

    Ok(())
}

fn check_shape(action: &Action) -> Result<(), EngineError> {
    if action.id.trim().is_empty() {
        return Err(EngineError::client("Action is missing an id."));
    }
    if action.steps.is_empty() {
        return Err(EngineError::client("Action has no steps."));
    }

    for step in &action.steps {
        match step {
            Step::Shortcut { keys } => {
                if keys.is_empty() {
                    return Err(EngineError::client("Shortcut step has no keys."));
                }
            }
            Step::Delay { duration } => {
                if !duration.is_finite() || *duration < 0.0 {
                    return Err(EngineError::client(
                        "Delay step duration must be a non-negative finite number.",
                    ));
                }
            }
            Step::Text { .. } | Step::Key { .. } | Step::Command { .. } => {}
        }
    }

    Ok(())
}

/// Warning to surface for this dispatch, if any.
///
/// Command steps produce a warning; every other dispatch clears a previously
/// shown one, so callers always forward the returned value.
pub fn dispatch_warning(steps: &[Step]) -> Option<&'static str> {
    steps
        .iter()
        .any(Step::is_command)
        .then_some(COMMAND_STEP_WARNING)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action_with(steps: Vec<Step>) -> Action {
        Action {
            id: "1700000000000-1".into(),
            steps,
        }
    }

    #[test]
    fn accepts_each_step_kind() {
        let action = action_with(vec![
            Step::Shortcut {
                keys: vec!["control".into(), "s".into()],
            },
            Step::Text { value: "hi".into() },
            Step::Delay { duration: 0.0 },
            Step::Key { key: "enter".into() },
            Step::Command {
                command: "ls".into(),
            },
        ]);
        validate_action(&action, 50, 1_000).expect("mixed action should validate");
    }

    #[test]
    fn rejects_too_many_steps() {
        let steps = vec![Step::Key { key: "a".into() }; 51];
        let err = validate_action(&action_with(steps), 50, 1_000)
            .expect_err("51 steps must be rejected");
        assert_eq!(err.code, ErrorCode::MaxStepsExceeded);

        let steps = vec![Step::Key { key: "a".into() }; 50];
        validate_action(&action_with(steps), 50, 1_000).expect("50 steps should validate");
    }

    #[test]
    fn rejects_oversized_text_steps() {
        let err = validate_action(
            &action_with(vec![Step::Text {
                value: "x".repeat(1_001),
            }]),
            50,
            1_000,
        )
        .expect_err("1001 units must be rejected");
        assert_eq!(err.code, ErrorCode::MaxTextLengthExceeded);

        validate_action(
            &action_with(vec![Step::Text {
                value: "x".repeat(1_000),
            }]),
            50,
            1_000,
        )
        .expect("1000 units should validate");
    }

    #[test]
    fn measures_text_length_in_utf16_units() {
        // U+1F600 is one scalar value but two UTF-16 units.
        let emoji = "\u{1F600}";
        assert_eq!(emoji.chars().count(), 1);
        assert_eq!(emoji.encode_utf16().count(), 2);

        validate_action(
            &action_with(vec![Step::Text {
                value: emoji.repeat(500),
            }]),
            50,
            1_000,
        )
        .expect("1000 units should validate");

        let err = validate_action(
            &action_with(vec![Step::Text {
                value: emoji.repeat(501),
            }]),
            50,
            1_000,
        )
        .expect_err("1002 units must be rejected");
        assert_eq!(err.code, ErrorCode::MaxTextLengthExceeded);
    }

    #[test]
    fn checks_bounds_before_shape() {
        // Oversized and shapeless at once: the bounds code wins.
        let mut action = action_with(vec![Step::Text {
            value: "x".repeat(1_001),
        }]);
        action.id = String::new();
        let err = validate_action(&action, 50, 1_000).expect_err("must be rejected");
        assert_eq!(err.code, ErrorCode::MaxTextLengthExceeded);
    }

    #[test]
    fn rejects_shapeless_actions() {
        let err = validate_action(&action_with(Vec::new()), 50, 1_000)
            .expect_err("empty steps must be rejected");
        assert_eq!(err.code, ErrorCode::ClientError);

        let mut action = action_with(vec![Step::Key { key: "a".into() }]);
        action.id = "  ".into();
        let err =
            validate_action(&action, 50, 1_000).expect_err("blank id must be rejected");
        assert_eq!(err.code, ErrorCode::ClientError);

        let err = validate_action(
            &action_with(vec![Step::Shortcut { keys: Vec::new() }]),
            50,
            1_000,
        )
        .expect_err("empty shortcut must be rejected");
        assert_eq!(err.code, ErrorCode::ClientError);
    }

    #[test]
    fn bounds_delay_durations() {
        validate_action(&action_with(vec![Step::Delay { duration: 0.0 }]), 50, 1_000)
            .expect("zero delay should validate");

        for duration in [f64::INFINITY, f64::NAN, -1.0] {
            let err = validate_action(&action_with(vec![Step::Delay { duration }]), 50, 1_000)
                .expect_err("bad delay must be rejected");
            assert_eq!(err.code, ErrorCode::ClientError);
        }
    }

    #[test]
    fn warns_only_for_command_steps() {
        assert_eq!(
            dispatch_warning(&[Step::Command {
                command: "rm -rf /tmp/scratch".into()
            }]),
            Some(COMMAND_STEP_WARNING)
        );
        assert_eq!(dispatch_warning(&[Step::Key { key: "a".into() }]), None);
    }
}
