//! Agent invoker: spawns the external agent subprocess and streams its output (C3).

mod process;
mod ratelimit;

pub use process::{AgentInvocation, AgentInvoker, AgentOutput, InvokerError, LineSink, ProcessInvoker};
pub use ratelimit::{LimitKind, RateLimitInfo, detect as detect_rate_limit};
