//! Defensive JSON repair for local-model output.
//!
//! Strict-JSON prompts notwithstanding, small local models wrap payloads in
//! markdown fences, prepend chatty lead-ins, comment their output, and leave
//! trailing commas. Each repair step is harmless on already-valid JSON, so
//! they run unconditionally before the final parse.

use super::PipelineError;

/// Recover a JSON value from a possibly-messy model response.
///
/// Repair order: strip code fences, drop lead-in prose, slice to the
/// outermost JSON braces/brackets, remove comments, remove trailing commas,
/// then parse.
pub fn repair_json_payload(response: &str) -> Result<serde_json::Value, PipelineError> {
    let step = strip_code_fences(response);
    let step = slice_to_json(&step)
        .ok_or_else(|| PipelineError::MalformedResponse("No JSON found in response".into()))?;
    let step = strip_comments(step);
    let step = strip_trailing_commas(&step);

    serde_json::from_str(&step)
        .map_err(|e| PipelineError::MalformedResponse(format!("JSON parse failed: {e}")))
}

/// Remove ```json ... ``` (or bare ```) fences, keeping the fenced content.
fn strip_code_fences(text: &str) -> String {
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        // Skip an optional language tag on the fence line
        let content_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let content = &after_fence[content_start..];
        if let Some(end) = content.find("```") {
            return content[..end].to_string();
        }
        return content.to_string();
    }
    text.to_string()
}

/// Slice from the first `{` or `[` to the last `}` or `]`. Drops lead-in
/// prose ("Here is the JSON you asked for:") and trailing commentary.
fn slice_to_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Remove `//` line comments and `/* */` block comments outside strings.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            out.push('"');
        } else if c == '/' && chars.peek() == Some(&'/') {
            for next in chars.by_ref() {
                if next == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = ' ';
            for next in chars.by_ref() {
                if prev == '*' && next == '/' {
                    break;
                }
                prev = next;
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Remove commas that directly precede a closing `}` or `]` outside strings.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
        } else if c == '"' {
            in_string = true;
            out.push('"');
            i += 1;
        } else if c == ',' {
            // Look ahead past whitespace for a closing bracket
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1; // drop the comma
            } else {
                out.push(',');
                i += 1;
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}
