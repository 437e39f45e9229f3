//! Call frames and their compact text rendering
//!
//! A frame renders as `scope#operation[line]` and a trace joins frames with
//! `", "`, so a whole stack fits on one log line:
//!
//! ```text
//! app::db::Pool#acquire[88], app::handler#serve[12], std::rt#lang_start[0]
//! ```
//!
//! Rendering is pure; frames are captured elsewhere (see
//! [`crate::thread_probe::OwnerThread`]) and converted here.

use backtrace::{Backtrace, SymbolName};
use std::ffi::c_void;

/// Maximum number of frames converted from a captured backtrace
const MAX_STACK_DEPTH: usize = 64;

/// Scope of frames whose symbol could not be resolved
const UNKNOWN_SCOPE: &str = "<unknown>";

/// Scopes of this crate that only ever appear while a stack is being taken
const CAPTURE_SCOPES: &[&str] = &[
    concat!(env!("CARGO_CRATE_NAME"), "::os_thread"),
    concat!(env!("CARGO_CRATE_NAME"), "::thread_probe::OwnerThread"),
    concat!("<", env!("CARGO_CRATE_NAME"), "::thread_probe::OwnerThread as "),
];

/// A single stack entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallFrame {
    /// Type or module path owning the operation
    pub scope: String,
    /// Function or method name
    pub operation: String,
    /// Source line, 0 when unknown
    pub line: u32,
}

impl CallFrame {
    pub fn new(scope: impl Into<String>, operation: impl Into<String>, line: u32) -> Self {
        Self {
            scope: scope.into(),
            operation: operation.into(),
            line,
        }
    }
}

/// Render one frame as `scope#operation[line]`
///
/// # Example
///
/// ```
/// use overrun::stack_trace::{render_frame, CallFrame};
///
/// let frame = CallFrame::new("com.acme.Foo", "bar", 42);
/// assert_eq!(render_frame(&frame), "com.acme.Foo#bar[42]");
/// ```
pub fn render_frame(frame: &CallFrame) -> String {
    format!("{}#{}[{}]", frame.scope, frame.operation, frame.line)
}

/// Render frames in order, separated by `", "` (empty input gives `""`)
pub fn render_trace(frames: &[CallFrame]) -> String {
    frames
        .iter()
        .map(render_frame)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a resolved backtrace into call frames, innermost first
///
/// Capture machinery (the unwinder, the probe that asked for the stack, the
/// signal trampoline) is dropped from the top before the depth cap applies.
/// Unresolved frames keep their instruction pointer as the operation name.
pub fn frames_from_backtrace(trace: &Backtrace) -> Vec<CallFrame> {
    let mut frames = Vec::with_capacity(trace.frames().len());

    for frame in trace.frames() {
        let ip = frame.ip() as usize;
        let symbols = frame.symbols();
        if symbols.is_empty() {
            frames.push(unknown_frame(ip));
            continue;
        }
        for symbol in symbols {
            frames.push(symbol_frame(symbol.name(), symbol.lineno(), ip));
        }
    }

    trim_capture_frames(frames)
}

/// Resolve raw instruction pointers (innermost first) into call frames
///
/// Used for stacks walked inside a signal handler, where only addresses can
/// be recorded; symbols are looked up here on the calling thread.
pub fn frames_from_ips(ips: &[usize]) -> Vec<CallFrame> {
    let mut frames = Vec::with_capacity(ips.len());

    for &ip in ips {
        let before = frames.len();
        backtrace::resolve(ip as *mut c_void, |symbol| {
            frames.push(symbol_frame(symbol.name(), symbol.lineno(), ip));
        });
        if frames.len() == before {
            frames.push(unknown_frame(ip));
        }
    }

    trim_capture_frames(frames)
}

fn symbol_frame(name: Option<SymbolName<'_>>, line: Option<u32>, ip: usize) -> CallFrame {
    let path = match name {
        Some(name) => format!("{:#}", name),
        None => format!("{:#x}", ip),
    };
    let (scope, operation) = split_symbol_path(&path);
    CallFrame::new(scope, operation, line.unwrap_or(0))
}

fn unknown_frame(ip: usize) -> CallFrame {
    CallFrame::new(UNKNOWN_SCOPE, format!("{:#x}", ip), 0)
}

fn is_capture_frame(frame: &CallFrame) -> bool {
    frame.scope == UNKNOWN_SCOPE
        || frame.scope.starts_with("backtrace")
        || frame.operation == "__restore_rt"
        || frame.scope == module_path!()
        || CAPTURE_SCOPES
            .iter()
            .any(|prefix| frame.scope.starts_with(prefix))
}

/// Drop leading capture frames, then cap the depth
///
/// A trace made only of capture frames is returned as is.
fn trim_capture_frames(mut frames: Vec<CallFrame>) -> Vec<CallFrame> {
    let skip = frames.iter().take_while(|f| is_capture_frame(f)).count();
    if skip < frames.len() {
        frames.drain(..skip);
    }
    frames.truncate(MAX_STACK_DEPTH);
    frames
}

/// Split `a::b::C::method` into (`a::b::C`, `method`), ignoring `::` nested
/// inside generic brackets
fn split_symbol_path(path: &str) -> (&str, &str) {
    let bytes = path.as_bytes();
    let mut depth = 0i32;
    let mut split = None;

    for (i, &byte) in bytes.iter().enumerate() {
        match byte {
            b'<' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b'>' => depth -= 1,
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                split = Some(i);
            }
            _ => {}
        }
    }

    match split {
        Some(i) => (&path[..i], &path[i + 2..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_frame() {
        let frame = CallFrame::new("com.acme.Foo", "bar", 42);
        assert_eq!(render_frame(&frame), "com.acme.Foo#bar[42]");
    }

    #[test]
    fn test_render_frame_unknown_line() {
        let frame = CallFrame::new("app::io", "read", 0);
        assert_eq!(render_frame(&frame), "app::io#read[0]");
    }

    #[test]
    fn test_render_trace_joins_in_order() {
        let f1 = CallFrame::new("a::B", "one", 1);
        let f2 = CallFrame::new("c::D", "two", 2);
        assert_eq!(
            render_trace(&[f1.clone(), f2.clone()]),
            format!("{}, {}", render_frame(&f1), render_frame(&f2))
        );
    }

    #[test]
    fn test_render_trace_keeps_duplicates() {
        let f = CallFrame::new("a", "b", 3);
        assert_eq!(render_trace(&[f.clone(), f]), "a#b[3], a#b[3]");
    }

    #[test]
    fn test_render_trace_empty() {
        assert_eq!(render_trace(&[]), "");
    }

    #[test]
    fn test_split_symbol_path() {
        assert_eq!(split_symbol_path("app::db::Pool::acquire"), ("app::db::Pool", "acquire"));
        assert_eq!(split_symbol_path("main"), ("", "main"));
        assert_eq!(
            split_symbol_path("<T as core::ops::Fn>::call"),
            ("<T as core::ops::Fn>", "call")
        );
        assert_eq!(
            split_symbol_path("app::Cache<alloc::string::String>::get"),
            ("app::Cache<alloc::string::String>", "get")
        );
    }

    #[test]
    fn test_frames_from_backtrace_depth_is_bounded() {
        let trace = Backtrace::new();
        let frames = frames_from_backtrace(&trace);
        assert!(frames.len() <= MAX_STACK_DEPTH);
        if let Some(top) = frames.first() {
            assert!(!top.scope.starts_with("backtrace"));
        }
    }

    #[test]
    fn test_capture_frames_dropped_before_depth_cap() {
        let mut frames: Vec<CallFrame> = (0..10)
            .map(|i| CallFrame::new("backtrace::backtrace::libunwind", "trace", i))
            .collect();
        frames.push(CallFrame::new("", "__restore_rt", 0));
        frames.extend((0..70).map(|i| CallFrame::new("app::deep", "recurse", i)));

        let trimmed = trim_capture_frames(frames);
        assert_eq!(trimmed.len(), MAX_STACK_DEPTH);
        assert!(trimmed.iter().all(|f| f.scope == "app::deep"));
        assert_eq!(trimmed[0].line, 0);
    }

    #[test]
    fn test_owner_probe_frames_dropped_from_top() {
        let frames = vec![
            CallFrame::new("overrun::thread_probe::OwnerThread", "current", 77),
            CallFrame::new("app::worker", "run", 18),
        ];
        assert_eq!(
            render_trace(&trim_capture_frames(frames)),
            "app::worker#run[18]"
        );
    }

    #[test]
    fn test_trace_of_only_capture_frames_kept() {
        let frames = vec![CallFrame::new(UNKNOWN_SCOPE, "0x1f", 0)];
        assert_eq!(trim_capture_frames(frames.clone()), frames);
    }

    #[test]
    fn test_capture_frames_below_user_code_kept() {
        let frames = vec![
            CallFrame::new("app::worker", "run", 18),
            CallFrame::new("backtrace::capture", "new", 1),
        ];
        assert_eq!(trim_capture_frames(frames.clone()), frames);
    }

    #[test]
    fn test_frames_from_ips_empty() {
        assert!(frames_from_ips(&[]).is_empty());
    }

    #[test]
    fn test_frames_from_ips_never_empty_for_an_address() {
        let ip = render_trace as fn(&[CallFrame]) -> String as usize;
        let frames = frames_from_ips(&[ip]);
        // One frame per symbol, or the bare address when symbols are stripped
        assert!(!frames.is_empty());
        assert!(frames.len() <= MAX_STACK_DEPTH);
    }

    #[test]
    #[allow(clippy::assertions_on_constants)]
    fn test_max_stack_depth_constant() {
        assert_eq!(MAX_STACK_DEPTH, 64);
    }
}
