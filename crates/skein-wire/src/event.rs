/// A notification line from the interpreter's event channel, parsed once at
/// the channel boundary so everything downstream dispatches on a typed
/// variant instead of re-inspecting raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// The interpreter has parsed the program and its debug server is ready.
    Started,
    /// The program under debug has exited, or the debug connection is gone.
    Terminated,
    Resumed(ResumeReason),
    Suspended(SuspendReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeReason {
    Step,
    Breakpoint,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// `line` is the 1-based source line reported after `suspended
    /// breakpoint`; `None` when the trailing token is not a number.
    Breakpoint { line: Option<u32> },
    Step,
    Unspecified,
}

impl DebugEvent {
    /// Parses one event line. Returns `None` for lines that are not part of
    /// the event vocabulary; the dispatcher drops those.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        match line {
            "started" => return Some(Self::Started),
            "terminated" => return Some(Self::Terminated),
            _ => {}
        }
        if let Some(rest) = line.strip_prefix("resumed") {
            let reason = if rest.ends_with("step") {
                ResumeReason::Step
            } else if rest.ends_with("breakpoint") {
                ResumeReason::Breakpoint
            } else {
                ResumeReason::Unspecified
            };
            return Some(Self::Resumed(reason));
        }
        if let Some(rest) = line.strip_prefix("suspended") {
            if rest.starts_with(" breakpoint") {
                // The breakpoint line number is the trailing token.
                let line = line
                    .rsplit(' ')
                    .next()
                    .and_then(|token| token.parse().ok());
                return Some(Self::Suspended(SuspendReason::Breakpoint { line }));
            }
            if rest.ends_with("step") {
                return Some(Self::Suspended(SuspendReason::Step));
            }
            return Some(Self::Suspended(SuspendReason::Unspecified));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_events() {
        assert_eq!(DebugEvent::parse("started"), Some(DebugEvent::Started));
        assert_eq!(DebugEvent::parse("terminated"), Some(DebugEvent::Terminated));
    }

    #[test]
    fn parses_resume_reasons() {
        assert_eq!(
            DebugEvent::parse("resumed step"),
            Some(DebugEvent::Resumed(ResumeReason::Step))
        );
        assert_eq!(
            DebugEvent::parse("resumed breakpoint"),
            Some(DebugEvent::Resumed(ResumeReason::Breakpoint))
        );
        assert_eq!(
            DebugEvent::parse("resumed"),
            Some(DebugEvent::Resumed(ResumeReason::Unspecified))
        );
    }

    #[test]
    fn parses_breakpoint_suspension_with_line() {
        assert_eq!(
            DebugEvent::parse("suspended breakpoint 42"),
            Some(DebugEvent::Suspended(SuspendReason::Breakpoint {
                line: Some(42)
            }))
        );
    }

    #[test]
    fn malformed_breakpoint_line_parses_without_a_line_number() {
        assert_eq!(
            DebugEvent::parse("suspended breakpoint"),
            Some(DebugEvent::Suspended(SuspendReason::Breakpoint { line: None }))
        );
        assert_eq!(
            DebugEvent::parse("suspended breakpoint twelve"),
            Some(DebugEvent::Suspended(SuspendReason::Breakpoint { line: None }))
        );
    }

    #[test]
    fn parses_step_suspension_by_suffix() {
        assert_eq!(
            DebugEvent::parse("suspended client step"),
            Some(DebugEvent::Suspended(SuspendReason::Step))
        );
        assert_eq!(
            DebugEvent::parse("suspended"),
            Some(DebugEvent::Suspended(SuspendReason::Unspecified))
        );
    }

    #[test]
    fn unknown_lines_do_not_parse() {
        assert_eq!(DebugEvent::parse("output hello"), None);
        assert_eq!(DebugEvent::parse(""), None);
    }
}
