//! JSONPath subset used by argument patches: `$`, `.key`, `[index]`,
//! `['quoted key']` and `["quoted key"]`.

use smallvec::SmallVec;

/// One step of a resolved argument path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

pub type ArgPath = SmallVec<[Segment; 4]>;

/// Parse a patch path. Returns `None` for any shape outside the supported
/// subset (wildcards, recursive descent, missing `$`, empty keys), which the
/// builder then ignores.
#[must_use]
pub fn parse_arg_path(raw: &str) -> Option<ArgPath> {
    let bytes = raw.trim().as_bytes();
    if bytes.first() != Some(&b'$') {
        return None;
    }

    let mut segments = ArgPath::new();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != b'.' && bytes[end] != b'[' {
                    end += 1;
                }
                if end == start {
                    return None;
                }
                let key = std::str::from_utf8(&bytes[start..end]).ok()?;
                if key == "*" {
                    return None;
                }
                segments.push(Segment::Key(key.to_string()));
                i = end;
            }
            b'[' => {
                let (segment, next) = parse_bracket(bytes, i + 1)?;
                segments.push(segment);
                i = next;
            }
            _ => return None,
        }
    }

    if segments.is_empty() {
        return None;
    }
    Some(segments)
}

/// Parse the inside of `[...]` starting right after the `[`; returns the
/// segment and the index just past the closing `]`.
fn parse_bracket(bytes: &[u8], start: usize) -> Option<(Segment, usize)> {
    let quote = *bytes.get(start)?;
    if quote == b'\'' || quote == b'"' {
        let mut key = Vec::new();
        let mut i = start + 1;
        loop {
            let b = *bytes.get(i)?;
            if b == b'\\' {
                key.push(*bytes.get(i + 1)?);
                i += 2;
                continue;
            }
            if b == quote {
                break;
            }
            key.push(b);
            i += 1;
        }
        if bytes.get(i + 1) != Some(&b']') {
            return None;
        }
        let key = String::from_utf8(key).ok()?;
        return Some((Segment::Key(key), i + 2));
    }

    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == start || bytes.get(end) != Some(&b']') {
        return None;
    }
    let index = std::str::from_utf8(&bytes[start..end]).ok()?.parse().ok()?;
    Some((Segment::Index(index), end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> Segment {
        Segment::Key(k.to_string())
    }

    #[test]
    fn test_parses_dotted_keys() {
        let path = parse_arg_path("$.location.latitude").unwrap();
        assert_eq!(path.as_slice(), &[key("location"), key("latitude")]);
    }

    #[test]
    fn test_parses_mixed_indices() {
        let path = parse_arg_path("$.cities[1].name").unwrap();
        assert_eq!(
            path.as_slice(),
            &[key("cities"), Segment::Index(1), key("name")]
        );
        let nested = parse_arg_path("$.grid[0][2]").unwrap();
        assert_eq!(
            nested.as_slice(),
            &[key("grid"), Segment::Index(0), Segment::Index(2)]
        );
    }

    #[test]
    fn test_parses_quoted_bracket_keys() {
        let path = parse_arg_path("$['first name'].x").unwrap();
        assert_eq!(path.as_slice(), &[key("first name"), key("x")]);
        let dq = parse_arg_path("$[\"a.b\"]").unwrap();
        assert_eq!(dq.as_slice(), &[key("a.b")]);
        let escaped = parse_arg_path("$['it\\'s']").unwrap();
        assert_eq!(escaped.as_slice(), &[key("it's")]);
    }

    #[test]
    fn test_rejects_unsupported_shapes() {
        for raw in [
            "",
            "$",
            "brightness",
            "$..name",
            "$.items[*]",
            "$.items[-1]",
            "$.a.",
            "$.*",
            "$['open",
            "$[1",
        ] {
            assert!(parse_arg_path(raw).is_none(), "{raw} should be rejected");
        }
    }
}
