//! Restricts the rewritten version to the markup subset the UI renders.

use regex::Regex;

/// Tags kept in the rewritten version. Everything else is unwrapped.
pub const ALLOWED_TAGS: &[&str] = &[
    "p",
    "br",
    "strong",
    "em",
    "ul",
    "ol",
    "li",
    "h3",
    "blockquote",
];

/// Reduces `input` to the allowed markup subset.
///
/// Allowed tags are kept with their attributes dropped; any other tag is
/// removed while the text it wrapped is preserved. Tag names are matched
/// case-insensitively and normalised to lowercase. Every `<` or `>` left in
/// the text is escaped, so removing one tag can never assemble another from
/// the characters around it.
///
/// # Examples
///
/// ```
/// use rubric_grading::sanitize_markup;
///
/// let out = sanitize_markup(r#"<p class="x">Hi <span>there</span><script>x</script></p>"#);
/// assert_eq!(out, "<p>Hi therex</p>");
/// ```
#[must_use]
pub fn sanitize_markup(input: &str) -> String {
    let Ok(re) = Regex::new(r"<(/?)\s*([a-zA-Z][a-zA-Z0-9]*)\b[^<>]*?(/?)>") else {
        return escape_angles(input);
    };

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let Some(tag) = caps.get(0) else {
            continue;
        };
        out.push_str(&escape_angles(&input[last..tag.start()]));
        last = tag.end();

        let name = caps[2].to_ascii_lowercase();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            continue;
        }
        if name == "br" {
            out.push_str("<br>");
        } else {
            out.push('<');
            out.push_str(&caps[1]);
            out.push_str(&name);
            out.push('>');
        }
    }
    out.push_str(&escape_angles(&input[last..]));
    out
}

fn escape_angles(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}
