//! Incremental JSON argument builder.
//!
//! Providers that stream tool-call arguments as path-addressed field patches
//! (rather than raw string fragments) are reassembled here into a JSON object
//! whose bytes are safe to forward the moment they are appended: the buffer is
//! append-only and is a valid JSON prefix after every operation.

pub mod path;

use std::borrow::Cow;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::util::{push_json_string_body, push_json_string_escaped};

pub use self::path::{parse_arg_path, ArgPath, Segment};

/// Value carried by a single patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

/// One path-addressed fragment of a tool call's arguments.
///
/// A patch with `value: None` closes the string currently streaming at
/// `json_path`, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgPatch {
    pub json_path: String,
    pub value: Option<PatchValue>,
    pub will_continue: bool,
}

impl ArgPatch {
    #[must_use]
    pub fn string(json_path: impl Into<String>, text: impl Into<String>, will_continue: bool) -> Self {
        Self {
            json_path: json_path.into(),
            value: Some(PatchValue::String(text.into())),
            will_continue,
        }
    }

    #[must_use]
    pub fn number(json_path: impl Into<String>, number: impl Into<serde_json::Number>) -> Self {
        Self {
            json_path: json_path.into(),
            value: Some(PatchValue::Number(number.into())),
            will_continue: false,
        }
    }

    #[must_use]
    pub fn bool(json_path: impl Into<String>, value: bool) -> Self {
        Self {
            json_path: json_path.into(),
            value: Some(PatchValue::Bool(value)),
            will_continue: false,
        }
    }

    #[must_use]
    pub fn null(json_path: impl Into<String>) -> Self {
        Self {
            json_path: json_path.into(),
            value: Some(PatchValue::Null),
            will_continue: false,
        }
    }

    /// The "string streaming is done" signal.
    #[must_use]
    pub fn close(json_path: impl Into<String>) -> Self {
        Self {
            json_path: json_path.into(),
            value: None,
            will_continue: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Frame {
    Object { keys: FxHashSet<String> },
    Array { len: usize },
}

impl Frame {
    fn for_child(next: &Segment) -> Self {
        match next {
            Segment::Key(_) => Frame::Object {
                keys: FxHashSet::default(),
            },
            Segment::Index(_) => Frame::Array { len: 0 },
        }
    }

    fn opener(&self) -> char {
        match self {
            Frame::Object { .. } => '{',
            Frame::Array { .. } => '[',
        }
    }

    fn closer(&self) -> char {
        match self {
            Frame::Object { .. } => '}',
            Frame::Array { .. } => ']',
        }
    }

    /// Whether `segment` names a member this container has not written yet.
    fn accepts(&self, segment: &Segment) -> bool {
        match (self, segment) {
            (Frame::Object { keys }, Segment::Key(key)) => !keys.contains(key),
            (Frame::Array { len }, Segment::Index(index)) => *index >= *len,
            _ => false,
        }
    }
}

enum Leaf<'a> {
    Str { text: &'a str, more: bool },
    Raw(Cow<'a, str>),
}

/// Streaming serializer for one tool call's arguments object.
#[derive(Debug, Clone, Default)]
pub struct ArgsBuilder {
    buf: String,
    reported: usize,
    /// `frames[0]` is the root object once anything has been written.
    frames: Vec<Frame>,
    /// Path to each open container below the root; always `frames.len() - 1` long.
    open_path: Vec<Segment>,
    cursor: Option<ArgPath>,
    string_open: bool,
    finalized: bool,
}

impl ArgsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Seed from a complete arguments object.
    ///
    /// On a fresh builder the object's closing brace is dropped and the rest
    /// becomes the live buffer. A builder that already holds content gets each
    /// top-level member written as an atomic value instead; members it already
    /// has are skipped.
    pub fn set_full_args(&mut self, args: &serde_json::Map<String, serde_json::Value>) {
        if self.finalized {
            debug!("ignoring full arguments for a finalized builder");
            return;
        }
        if !self.buf.is_empty() {
            for (key, value) in args {
                self.write_at(
                    &[Segment::Key(key.clone())],
                    Leaf::Raw(Cow::Owned(value.to_string())),
                );
            }
            return;
        }

        let serialized = serde_json::Value::Object(args.clone()).to_string();
        let open = serialized.strip_suffix('}').unwrap_or("{");
        self.buf.push_str(open);
        self.frames.push(Frame::Object {
            keys: args.keys().cloned().collect(),
        });
    }

    /// Apply one patch. Returns whether the buffer changed; unsupported or
    /// conflicting patches are dropped.
    pub fn apply(&mut self, patch: &ArgPatch) -> bool {
        let Some(path) = parse_arg_path(&patch.json_path) else {
            debug!(json_path = %patch.json_path, "ignoring argument patch with unsupported path");
            return false;
        };

        match &patch.value {
            None => {
                if self.string_open && self.cursor.as_deref() == Some(path.as_slice()) {
                    self.close_string();
                    true
                } else {
                    false
                }
            }
            Some(PatchValue::String(text)) => self.write_at(
                &path,
                Leaf::Str {
                    text: text.as_str(),
                    more: patch.will_continue,
                },
            ),
            Some(PatchValue::Number(number)) => {
                self.write_at(&path, Leaf::Raw(Cow::Owned(number.to_string())))
            }
            Some(PatchValue::Bool(value)) => self.write_at(
                &path,
                Leaf::Raw(Cow::Borrowed(if *value { "true" } else { "false" })),
            ),
            Some(PatchValue::Null) => self.write_at(&path, Leaf::Raw(Cow::Borrowed("null"))),
        }
    }

    /// Bytes appended since the previous call.
    pub fn take_delta(&mut self) -> Option<String> {
        if self.reported >= self.buf.len() {
            return None;
        }
        let delta = self.buf[self.reported..].to_string();
        self.reported = self.buf.len();
        Some(delta)
    }

    /// Close the open string and every open container down to the root.
    ///
    /// Returns whether anything was appended; a second call is a no-op.
    pub fn finalize(&mut self) -> bool {
        if self.finalized {
            return false;
        }
        let before = self.buf.len();
        self.ensure_root();
        self.close_string();
        while let Some(frame) = self.frames.pop() {
            self.buf.push(frame.closer());
        }
        self.open_path.clear();
        self.finalized = true;
        self.buf.len() > before
    }

    /// The current buffer with every open string and container closed.
    ///
    /// The live buffer is left untouched.
    #[must_use]
    pub fn closed_copy(&self) -> String {
        if self.frames.is_empty() && !self.finalized {
            return "{}".to_string();
        }
        let mut out = String::with_capacity(self.buf.len() + self.frames.len() + 1);
        out.push_str(&self.buf);
        if self.string_open {
            out.push('"');
        }
        for frame in self.frames.iter().rev() {
            out.push(frame.closer());
        }
        out
    }

    /// Point-in-time JSON document for inspection; never used for wire output.
    pub fn marshal_snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.closed_copy())
    }

    fn ensure_root(&mut self) {
        if self.frames.is_empty() && !self.finalized {
            self.buf.push('{');
            self.frames.push(Frame::Object {
                keys: FxHashSet::default(),
            });
        }
    }

    fn close_string(&mut self) {
        if self.string_open {
            self.buf.push('"');
            self.string_open = false;
        }
    }

    fn write_at(&mut self, path: &[Segment], leaf: Leaf<'_>) -> bool {
        if self.finalized {
            debug!("ignoring argument patch after finalize");
            return false;
        }
        let Some((leaf_segment, parent)) = path.split_last() else {
            return false;
        };
        if !matches!(path.first(), Some(Segment::Key(_))) {
            debug!("ignoring argument patch that indexes the root object");
            return false;
        }

        if self.string_open && self.cursor.as_deref() == Some(path) {
            return match leaf {
                Leaf::Str { text, more } => {
                    push_json_string_body(&mut self.buf, text);
                    if !more {
                        self.close_string();
                    }
                    true
                }
                Leaf::Raw(_) => {
                    debug!("ignoring scalar patch for a path with an open string");
                    false
                }
            };
        }

        self.ensure_root();
        let shared = self
            .open_path
            .iter()
            .zip(parent)
            .take_while(|(open, wanted)| open == wanted)
            .count();
        let diverging = parent.get(shared).unwrap_or(leaf_segment);
        if !self.frames[shared].accepts(diverging) {
            debug!(
                segment = ?diverging,
                "ignoring argument patch for an already written member"
            );
            return false;
        }

        self.close_string();
        while self.open_path.len() > shared {
            self.open_path.pop();
            if let Some(frame) = self.frames.pop() {
                self.buf.push(frame.closer());
            }
        }

        for (depth, segment) in parent.iter().enumerate().skip(shared) {
            self.begin_member(segment);
            let next = parent.get(depth + 1).unwrap_or(leaf_segment);
            let frame = Frame::for_child(next);
            self.buf.push(frame.opener());
            self.frames.push(frame);
            self.open_path.push(segment.clone());
        }

        self.begin_member(leaf_segment);
        match leaf {
            Leaf::Str { text, more } => {
                self.buf.push('"');
                push_json_string_body(&mut self.buf, text);
                if more {
                    self.string_open = true;
                } else {
                    self.buf.push('"');
                }
            }
            Leaf::Raw(token) => self.buf.push_str(&token),
        }
        self.cursor = Some(path.iter().cloned().collect());
        true
    }

    /// Emit the separator and key (or `null` padding) that precede a new
    /// member of the innermost open container.
    fn begin_member(&mut self, segment: &Segment) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        match (frame, segment) {
            (Frame::Object { keys }, Segment::Key(key)) => {
                if !keys.is_empty() {
                    self.buf.push(',');
                }
                push_json_string_escaped(&mut self.buf, key);
                self.buf.push(':');
                keys.insert(key.clone());
            }
            (Frame::Array { len }, Segment::Index(index)) => {
                while *len < *index {
                    if *len > 0 {
                        self.buf.push(',');
                    }
                    self.buf.push_str("null");
                    *len += 1;
                }
                if *len > 0 {
                    self.buf.push(',');
                }
                *len = index + 1;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn build(patches: &[ArgPatch]) -> ArgsBuilder {
        let mut builder = ArgsBuilder::new();
        for patch in patches {
            builder.apply(patch);
        }
        builder
    }

    #[test]
    fn test_streams_string_across_patches() {
        let mut builder = build(&[
            ArgPatch::number("$.brightness", 50),
            ArgPatch::string("$.colorTemperature", "warm", true),
            ArgPatch::string("$.colorTemperature", "", true),
            ArgPatch::string("$.colorTemperature", "", false),
        ]);
        assert!(builder.finalize());
        assert_eq!(
            builder.marshal_snapshot().unwrap(),
            json!({"brightness": 50, "colorTemperature": "warm"})
        );
        assert_eq!(builder.as_str(), r#"{"brightness":50,"colorTemperature":"warm"}"#);
    }

    #[test]
    fn test_no_value_patch_closes_open_string() {
        let mut builder = build(&[
            ArgPatch::string("$.query", "hello ", true),
            ArgPatch::string("$.query", "world", true),
        ]);
        assert_eq!(builder.as_str(), r#"{"query":"hello world"#);
        assert!(builder.apply(&ArgPatch::close("$.query")));
        assert_eq!(builder.as_str(), r#"{"query":"hello world""#);
        // Closing twice changes nothing.
        assert!(!builder.apply(&ArgPatch::close("$.query")));
        builder.finalize();
        assert_eq!(builder.as_str(), r#"{"query":"hello world"}"#);
    }

    #[test]
    fn test_creates_nested_containers_on_demand() {
        let mut builder = build(&[
            ArgPatch::number("$.location.latitude", serde_json::Number::from_f64(37.5).unwrap()),
            ArgPatch::number("$.location.longitude", serde_json::Number::from_f64(-122.25).unwrap()),
            ArgPatch::string("$.cities[0].name", "Oslo", false),
            ArgPatch::bool("$.cities[0].capital", true),
            ArgPatch::string("$.cities[1].name", "Bergen", false),
            ArgPatch::null("$.note"),
        ]);
        builder.finalize();
        assert_eq!(
            builder.marshal_snapshot().unwrap(),
            json!({
                "location": {"latitude": 37.5, "longitude": -122.25},
                "cities": [{"name": "Oslo", "capital": true}, {"name": "Bergen"}],
                "note": null
            })
        );
    }

    #[test]
    fn test_sparse_array_growth_pads_with_null() {
        let mut builder = build(&[ArgPatch::string("$.items[3]", "d", false)]);
        builder.finalize();
        assert_eq!(
            builder.marshal_snapshot().unwrap(),
            json!({"items": [null, null, null, "d"]})
        );
    }

    #[test]
    fn test_seeding_then_patching_reopens_root() {
        let args = json!({"city": "Paris", "days": 3});
        let mut builder = ArgsBuilder::new();
        builder.set_full_args(args.as_object().unwrap());
        assert!(!builder.as_str().ends_with('}'));
        builder.apply(&ArgPatch::string("$.units", "metric", false));
        builder.finalize();
        assert_eq!(
            builder.marshal_snapshot().unwrap(),
            json!({"city": "Paris", "days": 3, "units": "metric"})
        );
    }

    #[test]
    fn test_seeding_empty_object_writes_no_leading_comma() {
        let mut builder = ArgsBuilder::new();
        builder.set_full_args(&serde_json::Map::new());
        builder.apply(&ArgPatch::bool("$.on", true));
        builder.finalize();
        assert_eq!(builder.as_str(), r#"{"on":true}"#);
    }

    #[test]
    fn test_seeding_populated_builder_merges_members() {
        let mut builder = build(&[ArgPatch::number("$.a", 1)]);
        builder.set_full_args(json!({"a": 9, "b": [1, 2]}).as_object().unwrap());
        builder.finalize();
        assert_eq!(
            builder.marshal_snapshot().unwrap(),
            json!({"a": 1, "b": [1, 2]})
        );
    }

    #[test]
    fn test_unsupported_and_conflicting_patches_are_ignored() {
        let mut builder = build(&[ArgPatch::string("$.name", "a", false)]);
        assert!(!builder.apply(&ArgPatch::string("$.items[*]", "x", false)));
        assert!(!builder.apply(&ArgPatch::string("name", "x", false)));
        assert!(!builder.apply(&ArgPatch::string("$[0]", "x", false)));
        // Already written and closed.
        assert!(!builder.apply(&ArgPatch::string("$.name", "b", false)));
        builder.apply(&ArgPatch::string("$.obj.x", "1", false));
        builder.apply(&ArgPatch::string("$.other", "2", false));
        // `$.obj` was closed when the path switched away from it.
        assert!(!builder.apply(&ArgPatch::string("$.obj.y", "3", false)));
        // Key segment into an array.
        builder.apply(&ArgPatch::number("$.list[0]", 1));
        assert!(!builder.apply(&ArgPatch::number("$.list.bad", 1)));
        builder.finalize();
        assert_eq!(
            builder.marshal_snapshot().unwrap(),
            json!({"name": "a", "obj": {"x": "1"}, "other": "2", "list": [1]})
        );
    }

    #[test]
    fn test_finalize_is_idempotent_and_blocks_writes() {
        let mut empty = ArgsBuilder::new();
        assert!(empty.finalize());
        assert_eq!(empty.as_str(), "{}");
        assert!(!empty.finalize());
        assert!(!empty.apply(&ArgPatch::number("$.late", 1)));
        assert_eq!(empty.as_str(), "{}");
    }

    #[test]
    fn test_snapshot_does_not_touch_live_buffer() {
        let builder = build(&[ArgPatch::string("$.a.b", "par", true)]);
        let before = builder.as_str().to_string();
        assert_eq!(builder.marshal_snapshot().unwrap(), json!({"a": {"b": "par"}}));
        assert_eq!(builder.as_str(), before);
        assert_eq!(ArgsBuilder::new().marshal_snapshot().unwrap(), json!({}));
    }

    #[test]
    fn test_take_delta_reports_each_byte_once() {
        let mut builder = ArgsBuilder::new();
        assert!(builder.take_delta().is_none());
        builder.apply(&ArgPatch::string("$.q", "he", true));
        assert_eq!(builder.take_delta().as_deref(), Some(r#"{"q":"he"#));
        builder.apply(&ArgPatch::string("$.q", "llo", false));
        assert_eq!(builder.take_delta().as_deref(), Some(r#"llo""#));
        assert!(builder.take_delta().is_none());
        builder.finalize();
        assert_eq!(builder.take_delta().as_deref(), Some("}"));
    }

    #[test]
    fn test_escapes_keys_and_streamed_content() {
        let mut builder = build(&[
            ArgPatch::string("$['say \"hi\"']", "line1\n", true),
            ArgPatch::string("$['say \"hi\"']", "tab\t\"q\"", false),
        ]);
        builder.finalize();
        assert_eq!(
            builder.marshal_snapshot().unwrap(),
            json!({"say \"hi\"": "line1\ntab\t\"q\""})
        );
    }

    const PATHS: &[&str] = &[
        "$.a",
        "$.b",
        "$.a.x",
        "$.a.y",
        "$.list[0]",
        "$.list[2]",
        "$.list[1].name",
        "$.list[3][1]",
        "$['k k']",
        "$.deep.er.est",
        "$.bad[*]",
    ];

    fn patch_strategy() -> impl Strategy<Value = ArgPatch> {
        let value = prop_oneof![
            "[a-z \"\\\\\n]{0,6}".prop_map(|s| Some(PatchValue::String(s))),
            any::<i32>().prop_map(|n| Some(PatchValue::Number(n.into()))),
            any::<bool>().prop_map(|b| Some(PatchValue::Bool(b))),
            Just(Some(PatchValue::Null)),
            Just(None),
        ];
        (0..PATHS.len(), value, any::<bool>()).prop_map(|(idx, value, will_continue)| ArgPatch {
            json_path: PATHS[idx].to_string(),
            value,
            will_continue,
        })
    }

    proptest! {
        #[test]
        fn test_every_prefix_closes_to_valid_json(patches in prop::collection::vec(patch_strategy(), 0..24)) {
            let mut builder = ArgsBuilder::new();
            let mut emitted = String::new();
            for patch in &patches {
                let before = builder.as_str().to_string();
                builder.apply(patch);
                prop_assert!(builder.as_str().starts_with(&before));
                prop_assert!(serde_json::from_str::<serde_json::Value>(&builder.closed_copy()).is_ok());
                if let Some(delta) = builder.take_delta() {
                    emitted.push_str(&delta);
                }
            }
            builder.finalize();
            if let Some(delta) = builder.take_delta() {
                emitted.push_str(&delta);
            }
            prop_assert_eq!(&emitted, builder.as_str());
            let parsed: serde_json::Value = serde_json::from_str(&emitted).expect("valid json");
            prop_assert!(parsed.is_object());
        }

        #[test]
        fn test_array_growth_pads_skipped_indices(k in 0usize..12) {
            let mut builder = ArgsBuilder::new();
            builder.apply(&ArgPatch::number(format!("$.items[{k}]"), 7));
            builder.finalize();
            let snapshot = builder.marshal_snapshot().unwrap();
            let items = snapshot["items"].as_array().unwrap();
            prop_assert_eq!(items.len(), k + 1);
            prop_assert!(items[..k].iter().all(serde_json::Value::is_null));
            prop_assert_eq!(&items[k], &json!(7));
        }

        #[test]
        fn test_continued_string_matches_single_patch(chunks in prop::collection::vec("\\PC{0,5}", 1..6)) {
            let mut streamed = ArgsBuilder::new();
            for chunk in &chunks {
                streamed.apply(&ArgPatch::string("$.text", chunk.clone(), true));
            }
            streamed.apply(&ArgPatch::close("$.text"));
            streamed.finalize();

            let mut single = ArgsBuilder::new();
            single.apply(&ArgPatch::string("$.text", chunks.concat(), false));
            single.finalize();

            prop_assert_eq!(streamed.as_str(), single.as_str());
        }

        #[test]
        fn test_seed_then_patch_is_union(city in "[a-z]{1,8}", days in 0u32..30, flag in any::<bool>()) {
            let seed = json!({"city": city, "days": days});
            let mut builder = ArgsBuilder::new();
            builder.set_full_args(seed.as_object().unwrap());
            builder.apply(&ArgPatch::bool("$.flag", flag));
            builder.finalize();
            let snapshot: serde_json::Value = serde_json::from_str(builder.as_str()).unwrap();
            prop_assert_eq!(snapshot, json!({"city": city, "days": days, "flag": flag}));
        }
    }
}
