//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge vendor replies. Cuts on a char boundary.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) { end -= 1; }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// Map full-width digits and arithmetic signs to ASCII so Japanese replies
/// ("３＋４＝７") match the same patterns as ASCII ones.
pub fn normalize_fullwidth(s: &str) -> String {
  s.chars()
    .map(|ch| match ch {
      '０'..='９' => char::from_u32(ch as u32 - '０' as u32 + '0' as u32).unwrap_or(ch),
      '＋' => '+',
      '－' | '−' => '-',
      '＝' => '=',
      _ => ch,
    })
    .collect()
}

/// Locate the JSON object inside a model reply: a fenced ```json block first,
/// else the span from the first `{` to the last `}`.
pub fn find_json_object(text: &str) -> Option<&str> {
  if let Some(start) = text.find("```json") {
    let body = &text[start + "```json".len()..];
    if let Some(end) = body.find("```") {
      let inner = body[..end].trim();
      if inner.starts_with('{') {
        return Some(inner);
      }
    }
  }
  let start = text.find('{')?;
  let end = text.rfind('}')?;
  if end > start { Some(&text[start..=end]) } else { None }
}
