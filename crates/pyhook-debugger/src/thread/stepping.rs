/// Reason a thread blocks on a line event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStop {
    /// A step finished.
    StepDone,
    /// The process finished loading (launch or attach).
    Loaded,
}

/// Stepping mode of a thread: why it should block on its next event.
///
/// `Over` and `Out` carry the number of frames entered since the step started,
/// so that nested calls do not end the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stepping {
    /// Run freely.
    #[default]
    None,
    /// Break on the next event (break-all or detach).
    Break,
    /// Break on the first user line after launch.
    LaunchBreak,
    /// Break on the next user line after attach.
    AttachBreak,
    /// Step into the next call, or to the next line.
    Into,
    /// Step over calls, to the next line of the current frame.
    Over(u32),
    /// Step out of the current frame.
    Out(u32),
}

impl Stepping {
    /// Stepping mode set by a step-over request.
    pub const OVER: Self = Self::Over(0);

    /// Stepping mode set by a step-out request.
    pub const OUT: Self = Self::Out(0);

    /// Returns the mode after entering a new frame.
    pub fn on_call(self) -> Self {
        match self {
            // block on the first line of the callee, not on its definition
            Self::Into => Self::OVER,
            Self::Over(depth) => Self::Over(depth.saturating_add(1)),
            Self::Out(depth) => Self::Out(depth.saturating_add(1)),
            other => other,
        }
    }

    /// Returns the mode after leaving a frame, and whether the thread blocks
    /// with a finished step.
    ///
    /// `at_module_end` tells whether the frame is the top-level code of a
    /// debuggable module.
    pub fn on_return(self, at_module_end: bool) -> (Self, bool) {
        match self {
            Self::Out(0) => (Self::OVER, false),
            Self::Out(depth) => (Self::Out(depth - 1), false),
            Self::Over(0) if at_module_end => (Self::None, true),
            Self::Over(0) => (self, false),
            Self::Over(depth) => (Self::Over(depth - 1), false),
            other => (other, false),
        }
    }

    /// Returns why the thread blocks on a line event, if it does.
    ///
    /// `new_line` tells whether the line differs from the one the thread last
    /// blocked on.
    pub fn line_stop(self, new_line: bool) -> Option<LineStop> {
        match self {
            Self::Into | Self::Over(0) if new_line => Some(LineStop::StepDone),
            Self::LaunchBreak | Self::AttachBreak => Some(LineStop::Loaded),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LineStop, Stepping};

    #[test]
    fn step_over_skips_nested_frames() {
        let mut stepping = Stepping::OVER;

        stepping = stepping.on_call();
        assert_eq!(stepping, Stepping::Over(1));
        assert_eq!(stepping.line_stop(true), None);

        stepping = stepping.on_call();
        let (next, block) = stepping.on_return(false);
        assert!(!block);
        let (next, block) = next.on_return(false);
        assert!(!block);

        assert_eq!(next, Stepping::OVER);
        assert_eq!(next.line_stop(true), Some(LineStop::StepDone));
        assert_eq!(next.line_stop(false), None);
    }

    #[test]
    fn step_into_stops_in_callee() {
        let stepping = Stepping::Into.on_call();

        assert_eq!(stepping, Stepping::OVER);
        assert_eq!(stepping.line_stop(true), Some(LineStop::StepDone));
    }

    #[test]
    fn step_out_stops_in_caller() {
        let stepping = Stepping::OUT.on_call();
        assert_eq!(stepping, Stepping::Out(1));

        let (stepping, _) = stepping.on_return(false);
        assert_eq!(stepping, Stepping::OUT);
        assert_eq!(stepping.line_stop(true), None);

        let (stepping, block) = stepping.on_return(false);
        assert!(!block);
        assert_eq!(stepping, Stepping::OVER);
    }

    #[test]
    fn step_over_module_end_blocks() {
        assert_eq!(Stepping::OVER.on_return(true), (Stepping::None, true));
        assert_eq!(Stepping::Over(1).on_return(true), (Stepping::OVER, false));
    }

    #[test]
    fn load_breaks_ignore_line() {
        assert_eq!(Stepping::LaunchBreak.line_stop(false), Some(LineStop::Loaded));
        assert_eq!(Stepping::AttachBreak.line_stop(false), Some(LineStop::Loaded));
        assert_eq!(Stepping::Break.line_stop(true), None);
        assert_eq!(Stepping::None.on_call(), Stepping::None);
    }
}
