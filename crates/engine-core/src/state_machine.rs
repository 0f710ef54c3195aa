use crate::{error::EngineError, types::ConnectionState};

/// Deterministic connection lifecycle transition guard.
///
/// Holds the single authoritative [`ConnectionState`] value. Illegal
/// transitions leave the state untouched and return the corresponding
/// `CLIENT_ERROR`; the caller surfaces it and carries on.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }
}

impl ConnectionStateMachine {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply a transition.
    ///
    /// Returns `Ok(Some(state))` when observers must be notified and
    /// `Ok(None)` for silently-accepted self-transitions. Re-entering
    /// `RECONNECTING` counts as a real transition (a new attempt); every
    /// other self-transition is a silent no-op. On rejection the state is
    /// unchanged and the error names both endpoints.
    pub fn transition(
        &mut self,
        next: ConnectionState,
    ) -> Result<Option<ConnectionState>, EngineError> {
        if self.state == next && next != ConnectionState::Reconnecting {
            return Ok(None);
        }
        if !allows(self.state, next) {
            return Err(EngineError::illegal_transition(self.state, next));
        }
        self.state = next;
        Ok(Some(next))
    }
}

fn allows(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Disconnected, Connecting | Error) => true,
        (Connecting, Disconnected | Connected | Reconnecting | Error) => true,
        (Connected, Disconnected | Reconnecting | Error) => true,
        (Reconnecting, Disconnected | Connected | Error) => true,
        (Error, Disconnected | Connecting | Reconnecting) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    use ConnectionState::*;

    #[test]
    fn runs_happy_path_transitions() {
        let mut sm = ConnectionStateMachine::default();
        assert_eq!(sm.state(), Disconnected);

        assert_eq!(
            sm.transition(Connecting).expect("connect must work"),
            Some(Connecting)
        );
        assert_eq!(
            sm.transition(Connected).expect("open must work"),
            Some(Connected)
        );
        assert_eq!(
            sm.transition(Reconnecting).expect("drop must work"),
            Some(Reconnecting)
        );
        assert_eq!(
            sm.transition(Connected).expect("reopen must work"),
            Some(Connected)
        );
        assert_eq!(
            sm.transition(Disconnected).expect("disconnect must work"),
            Some(Disconnected)
        );
        assert_eq!(sm.state(), Disconnected);
    }

    #[test]
    fn accepts_self_transitions_silently() {
        for state in [Disconnected, Connecting, Connected, Error] {
            let mut sm = ConnectionStateMachine::default();
            force(&mut sm, state);
            let outcome = sm.transition(state).expect("self transition must work");
            assert_eq!(outcome, None, "self transition on {state} must be silent");
            assert_eq!(sm.state(), state);
        }
    }

    #[test]
    fn treats_reentering_reconnecting_as_a_real_transition() {
        let mut sm = ConnectionStateMachine::default();
        force(&mut sm, Reconnecting);

        let outcome = sm
            .transition(Reconnecting)
            .expect("reconnecting self transition must work");
        assert_eq!(outcome, Some(Reconnecting));
    }

    #[test]
    fn rejects_disallowed_transitions_without_mutating() {
        let cases = [
            (Disconnected, Connected),
            (Disconnected, Reconnecting),
            (Connected, Connecting),
            (Reconnecting, Connecting),
            (Error, Connected),
        ];

        for (from, to) in cases {
            let mut sm = ConnectionStateMachine::default();
            force(&mut sm, from);

            let err = sm
                .transition(to)
                .expect_err("disallowed transition must fail");
            assert_eq!(err.code, ErrorCode::ClientError);
            assert_eq!(err.message, format!("Illegal state transition: {from} -> {to}"));
            assert_eq!(sm.state(), from, "rejected transition must not mutate");
        }
    }

    #[test]
    fn matches_full_transition_table() {
        let all = [Disconnected, Connecting, Connected, Reconnecting, Error];
        let allowed: &[(ConnectionState, ConnectionState)] = &[
            (Disconnected, Connecting),
            (Disconnected, Error),
            (Connecting, Disconnected),
            (Connecting, Connected),
            (Connecting, Reconnecting),
            (Connecting, Error),
            (Connected, Disconnected),
            (Connected, Reconnecting),
            (Connected, Error),
            (Reconnecting, Disconnected),
            (Reconnecting, Connected),
            (Reconnecting, Error),
            (Error, Disconnected),
            (Error, Connecting),
            (Error, Reconnecting),
        ];

        for from in all {
            for to in all {
                let expected = from == to || allowed.contains(&(from, to));
                assert_eq!(
                    allows(from, to),
                    expected,
                    "transition {from} -> {to} disagrees with the table"
                );
            }
        }
    }

    fn force(sm: &mut ConnectionStateMachine, target: ConnectionState) {
        // Every state is reachable from DISCONNECTED in at most two hops.
        let hops: &[ConnectionState] = match target {
            Disconnected => &[],
            Connecting => &[Connecting],
            Connected => &[Connecting, Connected],
            Reconnecting => &[Connecting, Reconnecting],
            Error => &[Error],
        };
        for hop in hops {
            let _ = sm.transition(*hop).expect("forced hop must work");
        }
        assert_eq!(sm.state(), target);
    }
}
