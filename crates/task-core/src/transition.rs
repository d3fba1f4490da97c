use crate::status::TaskStatus;

/// Every legal edge in the task lifecycle graph, expressed as a pure
/// predicate so both the scheduler and the worker can validate a move
/// before asking the store to attempt the corresponding CAS update.
///
/// This mirrors the transition table: each `(from, to)` pair here has a
/// single actor and guard documented at the call site, not here — this
/// function only answers "is this edge in the graph at all".
pub fn is_legal_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Queueing, Preparing)
            | (Queueing, Failed)
            | (Preparing, Failed)
            | (Preparing, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Queueing, Killing)
            | (Preparing, Killing)
            | (Running, Killing)
            | (Killing, Failed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn every_alive_status_can_reach_killing() {
        for from in [Queueing, Preparing, Running] {
            assert!(is_legal_transition(from, Killing), "{from:?} -> Killing");
        }
    }

    #[test]
    fn terminal_statuses_never_originate_a_transition() {
        for to in [Queueing, Preparing, Running, Killing, Completed, Failed] {
            assert!(!is_legal_transition(Completed, to));
            assert!(!is_legal_transition(Failed, to));
        }
    }

    #[test]
    fn no_transition_skips_preparing_on_the_way_to_running() {
        assert!(!is_legal_transition(Queueing, Running));
        assert!(!is_legal_transition(Killing, Running));
    }

    #[test]
    fn status_progression_never_goes_backward() {
        // Every legal edge moves "forward" through Queueing -> Preparing ->
        // Running -> {Completed, Failed}, with Killing reachable as a side
        // branch from any alive status and Failed reachable from Killing.
        let rank = |s: TaskStatus| -> u8 {
            match s {
                Queueing => 0,
                Preparing => 1,
                Running => 2,
                Killing => 3,
                Completed => 4,
                Failed => 4,
            }
        };
        for from in [Queueing, Preparing, Running, Killing, Completed, Failed] {
            for to in [Queueing, Preparing, Running, Killing, Completed, Failed] {
                if is_legal_transition(from, to) {
                    assert!(
                        rank(to) >= rank(from),
                        "{from:?} -> {to:?} must not go backward"
                    );
                }
            }
        }
    }
}
