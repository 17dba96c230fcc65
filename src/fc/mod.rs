pub mod detector;
pub mod parser;
pub mod prompt;
pub mod repair;

pub use detector::{MarkupScanner, ScanEvent};
pub use parser::{MarkupDialect, ParsedToolCall, PRIMARY_DIALECT};
pub use prompt::{build_tool_prompt, render_tool_call, SENTINEL_STOP};
pub use repair::{parse_json_lenient, JsonRepair};
