//! System prompt assembly.
//!
//! Sections, in order: caller instructions, formatting rules, optional
//! smart-resolution rules, security hardening. Sections are joined with a
//! visible separator so the model can tell where one ends.

pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. Use the available tools when they help answer the user.";

pub const FORMATTING_INSTRUCTIONS: &str = "\
Formatting:
- Answer in the user's language.
- Be concise; prefer short paragraphs and bullet lists over long prose.
- Use Markdown for lists, tables, and code. Never output raw HTML.
- When you use a tool result, state the facts it returned instead of describing the tool call.";

pub const SMART_RESOLUTION_INSTRUCTIONS: &str = "\
Resolving requests:
- If a tool needs an identifier the user did not give (an order number, a user id), look it up with another tool first instead of asking.
- Chain tool calls when one result is the input to the next.
- Only ask the user a question when no tool can supply the missing information.";

/// Build the full system prompt.
pub fn assemble(caller: Option<&str>, smart_resolution: bool, hardening: &str) -> String {
    let caller = caller.map(str::trim).filter(|c| !c.is_empty());
    let mut sections = vec![caller.unwrap_or(DEFAULT_INSTRUCTIONS), FORMATTING_INSTRUCTIONS];
    if smart_resolution {
        sections.push(SMART_RESOLUTION_INSTRUCTIONS);
    }
    if !hardening.is_empty() {
        sections.push(hardening);
    }
    sections.join(SECTION_SEPARATOR)
}
