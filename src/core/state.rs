// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Scan state machine

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ScanError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Connecting,
    Scanning,
    LeafDetected,
    Capturing,
    Classifying,
    Advising,
    ResultReady,
    Error,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Connecting => "connecting",
            ScanState::Scanning => "scanning",
            ScanState::LeafDetected => "leaf_detected",
            ScanState::Capturing => "capturing",
            ScanState::Classifying => "classifying",
            ScanState::Advising => "advising",
            ScanState::ResultReady => "result_ready",
            ScanState::Error => "error",
        }
    }

    /// Every edge the orchestrator may take. Stop (to Idle) and failure
    /// (to Error) are allowed from anywhere.
    pub fn can_transition(self, to: ScanState) -> bool {
        use ScanState::*;

        if matches!(to, Idle | Error) {
            return true;
        }
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Idle, Scanning)
                | (Scanning, LeafDetected)
                | (LeafDetected, Capturing)
                | (LeafDetected, Classifying)
                | (Capturing, Classifying)
                | (Classifying, Advising)
                | (Classifying, ResultReady)
                | (Advising, ResultReady)
                | (ResultReady, Scanning)
                | (Error, Scanning)
                | (Error, Connecting)
        )
    }

    pub fn transition(self, to: ScanState) -> Result<ScanState, ScanError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(ScanError::InvalidTransition { from: self, to })
        }
    }

    /// True while a scan task owns the rig
    pub fn is_active(self) -> bool {
        !matches!(self, ScanState::Idle | ScanState::Error | ScanState::Connecting)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScanState::*;

    const ALL: [ScanState; 9] = [
        Idle,
        Connecting,
        Scanning,
        LeafDetected,
        Capturing,
        Classifying,
        Advising,
        ResultReady,
        Error,
    ];

    #[test]
    fn test_escalation_path_is_legal() {
        let path = [Idle, Scanning, LeafDetected, Classifying, Advising, ResultReady, Scanning];
        for pair in path.windows(2) {
            assert!(pair[0].transition(pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
        }
        // Healthy leaf skips Advising
        assert!(Classifying.can_transition(ResultReady));
        // Recapture branch
        assert!(LeafDetected.can_transition(Capturing));
        assert!(Capturing.can_transition(Classifying));
    }

    #[test]
    fn test_classifying_cannot_be_skipped() {
        assert!(!LeafDetected.can_transition(Advising));
        assert!(!LeafDetected.can_transition(ResultReady));
        assert!(!Scanning.can_transition(Classifying));
        assert!(!Capturing.can_transition(Advising));
    }

    #[test]
    fn test_stop_and_error_from_anywhere() {
        for state in ALL {
            assert!(state.can_transition(Idle));
            assert!(state.can_transition(Error));
        }
    }

    #[test]
    fn test_invalid_transition_error() {
        match Idle.transition(ResultReady) {
            Err(ScanError::InvalidTransition { from, to }) => {
                assert_eq!(from, Idle);
                assert_eq!(to, ResultReady);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wire_names() {
        for state in ALL {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.as_str());
        }
    }
}
