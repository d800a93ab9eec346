//! `{{ expr }}` placeholder expansion

use serde_json::Value as JsonValue;

use crate::interpreter::errors::EvalError;
use crate::interpreter::values::to_text;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Replace each `{{ expr }}` in `text` by the rendered result of `eval(expr)`.
///
/// Text without placeholders is returned unchanged.
pub fn expand_placeholders<F>(text: &str, mut eval: F) -> Result<String, EvalError>
where
    F: FnMut(&str) -> Result<JsonValue, EvalError>,
{
    if !text.contains(OPEN) {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or_else(|| EvalError::UnterminatedPlaceholder(text.to_string()))?;
        let value = eval(after[..end].trim())?;
        out.push_str(&to_text(&value));
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_untouched() {
        let out = expand_placeholders("call:{\"action\":\"X\"}", |_| unreachable!()).unwrap();
        assert_eq!(out, "call:{\"action\":\"X\"}");
    }

    #[test]
    fn test_values_render_as_text() {
        let out = expand_placeholders("a={{x}} b={{y}}", |e| {
            Ok(if e == "x" { json!("s") } else { json!([1]) })
        })
        .unwrap();
        assert_eq!(out, "a=s b=[1]");
    }

    #[test]
    fn test_unterminated_placeholder_fails() {
        let err = expand_placeholders("a={{x", |_| Ok(json!(1))).unwrap_err();
        assert!(matches!(err, EvalError::UnterminatedPlaceholder(_)));
    }
}
