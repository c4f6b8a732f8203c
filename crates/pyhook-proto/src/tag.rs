/// Command tags sent by the controller to the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundTag {
    /// `exit`: the controller acknowledged process exit.
    Exit,
    /// `stpi`: step into.
    StepInto,
    /// `stpo`: step out.
    StepOut,
    /// `stpv`: step over.
    StepOver,
    /// `brkp`: set a breakpoint.
    SetBreakpoint,
    /// `brkc`: replace a breakpoint condition.
    SetBreakpointCondition,
    /// `brkr`: remove a breakpoint.
    RemoveBreakpoint,
    /// `brka`: break all threads.
    BreakAll,
    /// `resa`: resume all threads.
    ResumeAll,
    /// `rest`: resume a single thread.
    ResumeThread,
    /// `exec`: evaluate code in a frame.
    Execute,
    /// `chld`: enumerate the children of an expression's value.
    EnumChildren,
    /// `setl`: set the current line number of a frame.
    SetLineNumber,
    /// `detc`: detach the debugger.
    Detach,
    /// `clst`: clear the stepping state of a thread.
    ClearStepping,
    /// `sexi`: replace the exception break modes.
    SetExceptionInfo,
    /// `sehi`: provide the exception handler regions of a file.
    SetExceptionHandlerInfo,
}

impl InboundTag {
    const ALL: [(Self, &'static [u8; 4]); 17] = [
        (Self::Exit, b"exit"),
        (Self::StepInto, b"stpi"),
        (Self::StepOut, b"stpo"),
        (Self::StepOver, b"stpv"),
        (Self::SetBreakpoint, b"brkp"),
        (Self::SetBreakpointCondition, b"brkc"),
        (Self::RemoveBreakpoint, b"brkr"),
        (Self::BreakAll, b"brka"),
        (Self::ResumeAll, b"resa"),
        (Self::ResumeThread, b"rest"),
        (Self::Execute, b"exec"),
        (Self::EnumChildren, b"chld"),
        (Self::SetLineNumber, b"setl"),
        (Self::Detach, b"detc"),
        (Self::ClearStepping, b"clst"),
        (Self::SetExceptionInfo, b"sexi"),
        (Self::SetExceptionHandlerInfo, b"sehi"),
    ];

    /// Looks up the tag matching the given four bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Option<Self> {
        Self::ALL
            .iter()
            .find_map(|(tag, raw)| (*raw == bytes).then_some(*tag))
    }

    /// Returns the four bytes of this tag.
    pub fn as_bytes(self) -> &'static [u8; 4] {
        Self::ALL
            .iter()
            .find_map(|(tag, raw)| (*tag == self).then_some(*raw))
            .unwrap_or(b"????")
    }
}

/// Command tags sent by the debuggee to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundTag {
    /// Async break completed.
    Asbr,
    /// Set-line-number result.
    Setl,
    /// Thread frames.
    Thrf,
    /// Detached.
    Detc,
    /// New thread.
    Newt,
    /// Thread exited.
    Extt,
    /// Process exited.
    Exit,
    /// Exception raised.
    Excp,
    /// Module loaded.
    Modl,
    /// Step done.
    Stpd,
    /// Breakpoint set.
    Brks,
    /// Breakpoint failed to bind.
    Brkf,
    /// Breakpoint hit.
    Brkh,
    /// Process loaded.
    Load,
    /// Execution error.
    Exce,
    /// Execution result.
    Excr,
    /// Children enumeration.
    Chld,
    /// Output written.
    Outp,
    /// Exception handlers requested.
    Reqh,
}

impl OutboundTag {
    /// Returns the four bytes of this tag.
    pub const fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Self::Asbr => b"ASBR",
            Self::Setl => b"SETL",
            Self::Thrf => b"THRF",
            Self::Detc => b"DETC",
            Self::Newt => b"NEWT",
            Self::Extt => b"EXTT",
            Self::Exit => b"EXIT",
            Self::Excp => b"EXCP",
            Self::Modl => b"MODL",
            Self::Stpd => b"STPD",
            Self::Brks => b"BRKS",
            Self::Brkf => b"BRKF",
            Self::Brkh => b"BRKH",
            Self::Load => b"LOAD",
            Self::Exce => b"EXCE",
            Self::Excr => b"EXCR",
            Self::Chld => b"CHLD",
            Self::Outp => b"OUTP",
            Self::Reqh => b"REQH",
        }
    }

    /// Looks up the tag matching the given four bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Option<Self> {
        const ALL: [OutboundTag; 19] = [
            OutboundTag::Asbr,
            OutboundTag::Setl,
            OutboundTag::Thrf,
            OutboundTag::Detc,
            OutboundTag::Newt,
            OutboundTag::Extt,
            OutboundTag::Exit,
            OutboundTag::Excp,
            OutboundTag::Modl,
            OutboundTag::Stpd,
            OutboundTag::Brks,
            OutboundTag::Brkf,
            OutboundTag::Brkh,
            OutboundTag::Load,
            OutboundTag::Exce,
            OutboundTag::Excr,
            OutboundTag::Chld,
            OutboundTag::Outp,
            OutboundTag::Reqh,
        ];

        ALL.into_iter().find(|tag| tag.as_bytes() == bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{InboundTag, OutboundTag};

    #[test_log::test]
    fn inbound_tags_are_unique() {
        for (tag, raw) in InboundTag::ALL {
            assert_eq!(InboundTag::from_bytes(raw), Some(tag));
            assert_eq!(tag.as_bytes(), raw);
        }

        assert_eq!(InboundTag::from_bytes(b"EXIT"), None);
    }

    #[test_log::test]
    fn outbound_tags_are_upper_case() {
        assert_eq!(OutboundTag::from_bytes(b"REQH"), Some(OutboundTag::Reqh));
        assert_eq!(OutboundTag::from_bytes(b"exit"), None);
        assert!(
            OutboundTag::Chld
                .as_bytes()
                .iter()
                .all(u8::is_ascii_uppercase)
        );
    }
}
