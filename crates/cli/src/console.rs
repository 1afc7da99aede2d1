//! Terminal display surface for a recognition run.

use attendance_core::recognizer::{EngineState, FrameStatus, StatusObserver};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Frame counts gathered while the loop runs.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FrameTally {
    pub frames: usize,
    pub no_face: usize,
    pub unknown: usize,
    pub rejected: usize,
    pub last_state: Option<String>,
}

/// Echoes accepted or rejected identities to stderr and keeps a tally.
pub struct ConsoleObserver {
    tally: Arc<Mutex<FrameTally>>,
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> (Self, Arc<Mutex<FrameTally>>) {
        let tally = Arc::new(Mutex::new(FrameTally::default()));
        (
            Self {
                tally: tally.clone(),
                quiet,
            },
            tally,
        )
    }

    fn update(&self, f: impl FnOnce(&mut FrameTally)) {
        if let Ok(mut tally) = self.tally.lock() {
            f(&mut tally);
        }
    }
}

impl StatusObserver for ConsoleObserver {
    fn on_state(&mut self, state: EngineState) {
        self.update(|t| t.last_state = Some(format!("{state:?}")));
    }

    fn on_frame(&mut self, status: &FrameStatus) {
        self.update(|t| {
            t.frames += 1;
            match status {
                FrameStatus::NoFace | FrameStatus::DetectionFailed { .. } => t.no_face += 1,
                FrameStatus::Unknown { .. } => t.unknown += 1,
                FrameStatus::Marked { .. } => {}
                _ => t.rejected += 1,
            }
        });
        if self.quiet {
            return;
        }
        match status {
            FrameStatus::Unknown { confidence, .. } => eprintln!("unknown face ({confidence:.1})"),
            FrameStatus::SheetMissing { class_name } => eprintln!("no sheet for {class_name}"),
            FrameStatus::NotFound { identity } => eprintln!("{identity} is not on the sheet"),
            FrameStatus::LabelFormatError { key } => eprintln!("bad identity key {key}"),
            FrameStatus::WriteFailed { identity, reason } => {
                eprintln!("could not mark {identity}: {reason}")
            }
            FrameStatus::Marked { identity } => eprintln!("{identity} marked present"),
            FrameStatus::NoFace | FrameStatus::DetectionFailed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_core::models::IdentityKey;

    #[test]
    fn tally_counts_each_kind() {
        let (mut observer, tally) = ConsoleObserver::new(true);
        observer.on_state(EngineState::Capturing);
        observer.on_frame(&FrameStatus::NoFace);
        observer.on_frame(&FrameStatus::Unknown { label: 0, confidence: 120.0 });
        observer.on_frame(&FrameStatus::NotFound {
            identity: IdentityKey::new("ClassA", "12"),
        });
        observer.on_frame(&FrameStatus::Marked {
            identity: IdentityKey::new("ClassA", "7"),
        });

        let tally = tally.lock().unwrap().clone();
        assert_eq!(tally.frames, 4);
        assert_eq!((tally.no_face, tally.unknown, tally.rejected), (1, 1, 1));
        assert_eq!(tally.last_state.as_deref(), Some("Capturing"));
    }
}
