//! Call-site descriptors
//!
//! An interception layer hands the watchdog one descriptor per invocation.
//! The watchdog never looks inside it: it compares descriptors, asks them for
//! text, and asks them for the declaring type used as the log scope.

use crate::error::RenderError;

/// Longest argument text kept when rendering a call
const MAX_ARG_CHARS: usize = 100;

/// Descriptor of one intercepted invocation
pub trait CallSite: Send + Sync {
    /// Type (or module path) declaring the invoked operation; used as log scope
    fn declaring_type(&self) -> Result<&str, RenderError>;

    /// Human-readable text of the invocation
    fn render(&self, include_declaring_type: bool, skip_args: bool) -> Result<String, RenderError>;
}

/// Method invocation captured by an interception layer
///
/// Arguments are kept as already-rendered text. Two descriptors are equal when
/// type, method, arguments and receiver all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodCall {
    pub declaring_type: String,
    pub method: String,
    pub args: Vec<String>,
    /// Identity of the receiver, `None` for free functions / static methods
    pub receiver: Option<String>,
}

impl MethodCall {
    pub fn new(declaring_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method: method.into(),
            args: Vec::new(),
            receiver: None,
        }
    }

    /// Append one rendered argument
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Set the receiver identity
    pub fn on(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }
}

impl CallSite for MethodCall {
    fn declaring_type(&self) -> Result<&str, RenderError> {
        if self.declaring_type.is_empty() {
            return Err(RenderError::MissingDeclaringType);
        }
        Ok(&self.declaring_type)
    }

    /// Render as `Type#method(arg1, arg2)`, or `Type#method(..)` with `skip_args`
    ///
    /// # Example
    ///
    /// ```
    /// use overrun::call_site::{CallSite, MethodCall};
    ///
    /// let call = MethodCall::new("app::Repo", "load").arg("'users'").arg(7);
    /// assert_eq!(call.render(true, false).unwrap(), "app::Repo#load('users', 7)");
    /// assert_eq!(call.render(false, true).unwrap(), "#load(..)");
    /// ```
    fn render(&self, include_declaring_type: bool, skip_args: bool) -> Result<String, RenderError> {
        let declaring_type = self.declaring_type()?;
        if self.method.is_empty() {
            return Err(RenderError::MissingMethod {
                declaring_type: declaring_type.to_string(),
            });
        }

        let mut text = String::new();
        if include_declaring_type {
            text.push_str(declaring_type);
        }
        text.push('#');
        text.push_str(&self.method);
        text.push('(');
        if skip_args {
            text.push_str("..");
        } else {
            let args: Vec<String> = self.args.iter().map(|a| truncate(a)).collect();
            text.push_str(&args.join(", "));
        }
        text.push(')');
        Ok(text)
    }
}

fn truncate(arg: &str) -> String {
    if arg.chars().count() <= MAX_ARG_CHARS {
        return arg.to_string();
    }
    let head: String = arg.chars().take(MAX_ARG_CHARS).collect();
    format!("{}...", head)
}
