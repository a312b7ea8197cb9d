//! Aggregation state shared by every provider decoder.
//!
//! Decoders translate wire events into calls on [`StreamState`]; the state
//! keeps the aggregated [`Message`] consistent and queues one [`Emission`]
//! per status so the pull iterator can hand them out one at a time.

use std::collections::VecDeque;

use crate::protocol::canonical::{
    ContentItem, ImagePart, Message, ProviderKind, Role, StreamStatus, Thought, ToolCall, Usage,
};
use crate::util::synthesize_call_id;

/// Value attached to a status at the moment it was produced.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    None,
    Text(String),
    Thought(Thought),
    /// Index into `message.tool_calls`; the call itself is read on demand.
    ToolCall { index: usize, delta: String },
    Image(ImagePart),
}

#[derive(Debug, Clone)]
pub struct Emission {
    pub status: StreamStatus,
    pub payload: Payload,
}

/// Lifecycle flags for one tool call, parallel to `message.tool_calls`.
#[derive(Debug, Clone, Copy, Default)]
struct CallFlags {
    ready: bool,
}

/// Index of a thought inside `message.content` plus its done flag.
#[derive(Debug, Clone, Copy)]
struct ThoughtSlot {
    content_index: usize,
    done: bool,
}

#[derive(Debug)]
pub struct StreamState {
    provider: ProviderKind,
    message: Message,
    usage: Usage,
    pending: VecDeque<Emission>,
    calls: Vec<CallFlags>,
    thoughts: Vec<ThoughtSlot>,
    started: bool,
}

impl StreamState {
    #[must_use]
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            message: Message::new(Role::Assistant),
            usage: Usage::default(),
            pending: VecDeque::with_capacity(4),
            calls: Vec::new(),
            thoughts: Vec::new(),
            started: false,
        }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub(crate) fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub(crate) fn into_message(self) -> Message {
        self.message
    }

    #[must_use]
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub(crate) fn pop_emission(&mut self) -> Option<Emission> {
        self.pending.pop_front()
    }

    pub(crate) fn discard_pending(&mut self) {
        self.pending.clear();
    }

    fn emit(&mut self, status: StreamStatus, payload: Payload) {
        self.pending.push_back(Emission { status, payload });
    }

    // -- message lifecycle ---------------------------------------------------

    /// Emit `MessageStart` the first time it is called.
    pub fn start_message(&mut self) {
        if !self.started {
            self.started = true;
            self.emit(StreamStatus::MessageStart, Payload::None);
        }
    }

    /// Replace the running usage record (Gemini reports cumulative totals).
    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = usage;
    }

    /// Merge the counters an event reported into the running usage record.
    pub fn merge_usage(&mut self, usage: &Usage) {
        self.usage.merge(usage);
    }

    // -- content ---------------------------------------------------------------

    /// Append visible text; consecutive fragments share one content item.
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.message.content.last_mut() {
            Some(ContentItem::Text(existing)) => existing.push_str(text),
            _ => self.message.content.push(ContentItem::Text(text.to_owned())),
        }
        self.emit(StreamStatus::Text, Payload::Text(text.to_owned()));
    }

    pub fn push_image(&mut self, image: ImagePart) {
        self.message.content.push(ContentItem::ImageUrl(image.clone()));
        self.emit(StreamStatus::Image, Payload::Image(image));
    }

    /// Record a structured blob; no status is emitted for it.
    pub fn push_json(&mut self, value: serde_json::Value) {
        self.message.content.push(ContentItem::Json(value));
    }

    // -- thoughts --------------------------------------------------------------

    fn thought_at(&self, slot: usize) -> Option<&Thought> {
        match self.message.content.get(self.thoughts[slot].content_index) {
            Some(ContentItem::Thought(thought)) => Some(thought),
            _ => None,
        }
    }

    fn thought_at_mut(&mut self, slot: usize) -> Option<&mut Thought> {
        match self.message.content.get_mut(self.thoughts[slot].content_index) {
            Some(ContentItem::Thought(thought)) => Some(thought),
            _ => None,
        }
    }

    /// Find the thought slot `id` addresses. Without an id, the most recent
    /// open anonymous thought is reused while it is still the last item.
    fn find_thought(&self, id: Option<&str>) -> Option<usize> {
        match id {
            Some(id) => (0..self.thoughts.len())
                .rev()
                .find(|&slot| self.thought_at(slot).and_then(|t| t.id.as_deref()) == Some(id)),
            None => {
                let slot = self.thoughts.len().checked_sub(1)?;
                let entry = self.thoughts[slot];
                let is_last = entry.content_index + 1 == self.message.content.len();
                let anonymous = self.thought_at(slot).is_some_and(|t| t.id.is_none());
                (is_last && anonymous && !entry.done).then_some(slot)
            }
        }
    }

    /// Open (or find) the thought `id` addresses without emitting anything.
    pub fn open_thought(&mut self, id: Option<&str>, summary: bool) -> usize {
        if let Some(slot) = self.find_thought(id) {
            return slot;
        }
        self.message.content.push(ContentItem::Thought(Thought {
            id: id.map(str::to_owned),
            text: String::new(),
            summary,
            signature: None,
        }));
        self.thoughts.push(ThoughtSlot {
            content_index: self.message.content.len() - 1,
            done: false,
        });
        self.thoughts.len() - 1
    }

    /// Append thinking text to the thought `id` addresses and emit
    /// `Thinking` carrying the fragment.
    pub fn push_thinking(&mut self, id: Option<&str>, text: &str, summary: bool) {
        if text.is_empty() {
            return;
        }
        let slot = self.open_thought(id, summary);
        let Some(thought) = self.thought_at_mut(slot) else {
            return;
        };
        thought.text.push_str(text);
        thought.summary = summary;
        let fragment = Thought {
            id: thought.id.clone(),
            text: text.to_owned(),
            summary,
            signature: thought.signature.clone(),
        };
        self.emit(StreamStatus::Thinking, Payload::Thought(fragment));
    }

    /// Fill in thought text that never arrived through deltas.
    pub fn backfill_thought(&mut self, id: Option<&str>, text: &str, summary: bool) {
        let slot = self.open_thought(id, summary);
        let needs_text = self.thought_at(slot).is_some_and(|t| t.text.is_empty());
        if needs_text {
            self.push_thinking(id, text, summary);
        }
    }

    /// Attach an opaque signature to the thought `id` addresses, or to the
    /// latest thought when there is no id.
    pub fn set_thought_signature(&mut self, id: Option<&str>, signature: &str) {
        if signature.is_empty() {
            return;
        }
        let slot = match id {
            Some(_) => self.open_thought(id, false),
            None => match self.thoughts.len().checked_sub(1) {
                Some(slot) => slot,
                None => self.open_thought(None, false),
            },
        };
        if let Some(thought) = self.thought_at_mut(slot) {
            thought.signature = Some(signature.to_owned());
        }
    }

    /// Attach a signature to the content item the last fragment landed in.
    ///
    /// The signature is stored as an empty anonymous thought placed directly
    /// before that item, so replay puts it back on the same part. With no
    /// content yet, the marker is appended and rides on the next item.
    pub fn sign_last_content(&mut self, signature: &str) {
        if signature.is_empty() {
            return;
        }
        let len = self.message.content.len();
        if let Some(ContentItem::Thought(thought)) = self.message.content.last_mut() {
            thought.signature = Some(signature.to_owned());
            return;
        }
        let at = len.saturating_sub(1);
        if let Some(ContentItem::Thought(marker)) = at
            .checked_sub(1)
            .and_then(|prev| self.message.content.get_mut(prev))
        {
            if marker.id.is_none() && marker.text.is_empty() {
                marker.signature = Some(signature.to_owned());
                return;
            }
        }
        self.message.content.insert(
            at,
            ContentItem::Thought(Thought {
                signature: Some(signature.to_owned()),
                ..Thought::default()
            }),
        );
        self.thoughts.push(ThoughtSlot {
            content_index: at,
            done: true,
        });
    }

    /// Emit `ThinkingDone` for the thought `id` addresses, once.
    pub fn finish_thought(&mut self, id: Option<&str>) {
        let slot = match id {
            Some(_) => self.find_thought(id),
            None => self.thoughts.len().checked_sub(1),
        };
        if let Some(slot) = slot {
            self.finish_thought_slot(slot);
        }
    }

    fn finish_thought_slot(&mut self, slot: usize) {
        if self.thoughts[slot].done {
            return;
        }
        self.thoughts[slot].done = true;
        if let Some(thought) = self.thought_at(slot).cloned() {
            self.emit(StreamStatus::ThinkingDone, Payload::Thought(thought));
        }
    }

    pub fn finish_open_thoughts(&mut self) {
        for slot in 0..self.thoughts.len() {
            self.finish_thought_slot(slot);
        }
    }

    // -- tool calls ------------------------------------------------------------

    /// Start a tool call and emit `ToolCallBegin`. A missing or empty id is
    /// synthesized from the name. Returns the call's index.
    pub fn begin_tool_call(&mut self, id: Option<&str>, name: &str) -> usize {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => synthesize_call_id(name),
        };
        self.message.tool_calls.push(ToolCall {
            id,
            name: name.to_owned(),
            ..ToolCall::default()
        });
        self.calls.push(CallFlags::default());
        let index = self.message.tool_calls.len() - 1;
        self.emit_call(StreamStatus::ToolCallBegin, index, String::new());
        index
    }

    pub fn tool_call_mut(&mut self, index: usize) -> Option<&mut ToolCall> {
        self.message.tool_calls.get_mut(index)
    }

    #[must_use]
    pub fn is_ready(&self, index: usize) -> bool {
        self.calls.get(index).is_some_and(|flags| flags.ready)
    }

    /// Append raw argument bytes and emit `ToolCallDelta`.
    pub fn append_tool_args(&mut self, index: usize, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.is_ready(index) {
            tracing::debug!(provider = %self.provider, index, "ignoring arguments for a finished tool call");
            return;
        }
        let Some(call) = self.message.tool_calls.get_mut(index) else {
            return;
        };
        call.arguments.push_str(fragment);
        self.emit_call(StreamStatus::ToolCallDelta, index, fragment.to_owned());
    }

    /// Emit `ToolCallReady` for the call, at most once.
    pub fn finish_tool_call(&mut self, index: usize) {
        let Some(flags) = self.calls.get_mut(index) else {
            return;
        };
        if flags.ready {
            return;
        }
        flags.ready = true;
        self.emit_call(StreamStatus::ToolCallReady, index, String::new());
    }

    /// Close every begun call that never saw its end-of-call signal.
    pub fn close_open_tool_calls(&mut self) {
        for index in 0..self.calls.len() {
            self.finish_tool_call(index);
        }
    }

    fn emit_call(&mut self, status: StreamStatus, index: usize, delta: String) {
        self.emit(status, Payload::ToolCall { index, delta });
    }
}
