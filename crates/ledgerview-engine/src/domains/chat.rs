//! Chat feed.
//!
//! Messages are posted to a mailbox address. Each message is keyed by its
//! author and a per-author nonce, so a local post and the event that confirms
//! it share a key. History grows without bound, so the feed is fetched
//! incrementally. If two records ever carry the same key, the first one wins.

use ledgerview_core::{
    Address, DecodeError, EventShape, LocalId, LogFilter, OrderKey, RawRecord, SubmissionError,
};
use serde::{Deserialize, Serialize};

use crate::decoder::{Decoded, EventDecoder};
use crate::domain::{json_payload, Domain, FetchStrategy, Intent};
use crate::domains::{expect_source, parse_address, parse_body};
use crate::overlay::OptimisticOverlay;
use crate::projection::{ProjectionState, Reducer};
use crate::view::{MergedView, Provenance};

/// Event shape emitted when a message is posted.
pub const MESSAGE_POSTED: &str = "MessagePosted";

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 280;

/// Message key: author and per-author nonce.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    /// Author of the message.
    pub author: Address,
    /// Author-chosen sequence number.
    pub nonce: u64,
}

impl MessageKey {
    /// Creates a message key.
    #[must_use]
    pub const fn new(author: Address, nonce: u64) -> Self {
        Self { author, nonce }
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message text.
    pub text: String,
}

impl Message {
    /// Creates a message.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Chat events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was posted.
    MessagePosted {
        /// Sender.
        author: Address,
        /// Sender's nonce.
        nonce: u64,
        /// Text.
        text: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct MessagePostedBody {
    from: String,
    nonce: u64,
    text: String,
}

/// One line of the rendered feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    /// Message key.
    pub key: MessageKey,
    /// Message text.
    pub text: String,
    /// Whether the line is confirmed or still optimistic.
    pub provenance: Provenance,
}

/// Checks message text.
///
/// # Errors
///
/// Returns a description of the problem if the text is blank or longer than
/// [`MAX_MESSAGE_CHARS`].
pub fn validate_text(text: &str) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err("message text is empty".to_string());
    }
    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(format!(
            "message text is {chars} characters; the limit is {MAX_MESSAGE_CHARS}"
        ));
    }
    Ok(())
}

/// Chat domain bound to one mailbox.
#[derive(Debug, Clone)]
pub struct ChatDomain {
    mailbox: Address,
    post_fee: u128,
}

impl ChatDomain {
    /// Creates a chat domain reading `mailbox`.
    #[must_use]
    pub const fn new(mailbox: Address) -> Self {
        Self {
            mailbox,
            post_fee: 0,
        }
    }

    /// Sets the value attached to each post.
    #[must_use]
    pub const fn with_post_fee(mut self, fee: u128) -> Self {
        self.post_fee = fee;
        self
    }

    /// Mailbox address.
    #[must_use]
    pub const fn mailbox(&self) -> &Address {
        &self.mailbox
    }

    /// Event shape for posted messages.
    #[must_use]
    pub fn shape(&self) -> EventShape {
        EventShape::new(MESSAGE_POSTED)
    }

    /// Next unused nonce for `author`, counting confirmed and pending posts.
    #[must_use]
    pub fn next_nonce(
        projection: &ProjectionState<MessageKey, Message>,
        overlay: &OptimisticOverlay<MessageKey, Message>,
        author: &Address,
    ) -> u64 {
        let confirmed = projection
            .iter()
            .filter(|(key, _)| &key.author == author)
            .map(|(key, _)| key.nonce);
        let pending = overlay
            .pending()
            .filter(|entry| &entry.key.author == author)
            .map(|entry| entry.key.nonce);
        confirmed
            .chain(pending)
            .max()
            .map_or(0, |nonce| nonce.saturating_add(1))
    }

    /// Feed in display order: confirmed messages by log position, then
    /// pending ones by submission order.
    #[must_use]
    pub fn feed(view: &MergedView<MessageKey, Message>) -> Vec<FeedItem> {
        let mut confirmed: Vec<(OrderKey, FeedItem)> = Vec::new();
        let mut pending: Vec<(LocalId, FeedItem)> = Vec::new();

        for (key, cell) in view.iter() {
            let item = FeedItem {
                key: key.clone(),
                text: cell.value.text.clone(),
                provenance: cell.provenance,
            };
            match cell.provenance {
                Provenance::Authoritative { written_at } => confirmed.push((written_at, item)),
                Provenance::Optimistic { local_id } => pending.push((local_id, item)),
            }
        }

        confirmed.sort_by_key(|(order, _)| *order);
        pending.sort_by_key(|(local_id, _)| *local_id);
        confirmed
            .into_iter()
            .map(|(_, item)| item)
            .chain(pending.into_iter().map(|(_, item)| item))
            .collect()
    }
}

impl EventDecoder for ChatDomain {
    type Event = ChatEvent;

    fn decode(&self, raw: &RawRecord) -> Result<ChatEvent, DecodeError> {
        expect_source(raw, &self.mailbox, &self.shape())?;
        let body: MessagePostedBody = parse_body(raw)?;
        let author = parse_address("from", &body.from)?;
        validate_text(&body.text).map_err(|message| DecodeError::invalid_field("text", message))?;

        Ok(ChatEvent::MessagePosted {
            author,
            nonce: body.nonce,
            text: body.text,
        })
    }
}

impl Reducer for ChatDomain {
    type Key = MessageKey;
    type Value = Message;

    fn reduce(&self, state: &mut ProjectionState<MessageKey, Message>, event: &Decoded<ChatEvent>) {
        let ChatEvent::MessagePosted {
            author,
            nonce,
            text,
        } = &event.event;
        let key = MessageKey::new(author.clone(), *nonce);
        if !state.put_if_absent(key, Message::new(text.clone()), event.order) {
            tracing::debug!(%author, nonce, order = %event.order, "ignoring duplicate message key");
        }
    }
}

impl Domain for ChatDomain {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn filter(&self) -> LogFilter {
        LogFilter::new(self.mailbox.clone(), self.shape())
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Incremental
    }

    fn key_of(&self, event: &ChatEvent) -> MessageKey {
        let ChatEvent::MessagePosted { author, nonce, .. } = event;
        MessageKey::new(author.clone(), *nonce)
    }

    fn author_of<'e>(&self, event: &'e ChatEvent) -> &'e Address {
        let ChatEvent::MessagePosted { author, .. } = event;
        author
    }

    fn encode_intent(
        &self,
        key: &MessageKey,
        value: &Message,
        origin: &Address,
    ) -> Result<Intent, SubmissionError> {
        if &key.author != origin {
            return Err(SubmissionError::Encode {
                message: format!("message author {} is not the sender {origin}", key.author),
            });
        }
        validate_text(&value.text).map_err(|message| SubmissionError::Encode { message })?;

        let payload = json_payload(&MessagePostedBody {
            from: origin.to_string(),
            nonce: key.nonce,
            text: value.text.clone(),
        })?;
        Ok(Intent {
            target: self.mailbox.clone(),
            payload,
            value: self.post_fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionStore;
    use bytes::Bytes;

    fn addr(value: &str) -> Address {
        Address::new(value).unwrap()
    }

    fn chat() -> ChatDomain {
        ChatDomain::new(addr("0xmailbox"))
    }

    fn record(seq: u64, payload: &str) -> RawRecord {
        RawRecord {
            order: OrderKey::new(seq, 0),
            address: addr("0xmailbox"),
            shape: EventShape::new(MESSAGE_POSTED),
            payload: Bytes::from(payload.to_string()),
        }
    }

    fn posted(seq: u64, author: &str, nonce: u64, text: &str) -> Decoded<ChatEvent> {
        Decoded::new(
            OrderKey::new(seq, 0),
            ChatEvent::MessagePosted {
                author: addr(author),
                nonce,
                text: text.to_string(),
            },
        )
    }

    #[test]
    fn text_limits() {
        assert!(validate_text("gm").is_ok());
        assert!(validate_text("   ").is_err());
        assert!(validate_text(&"é".repeat(280)).is_ok());
        assert!(validate_text(&"a".repeat(281)).is_err());
    }

    #[test]
    fn decodes_message_posted() {
        let event = chat()
            .decode(&record(3, r#"{"from":"0xA","nonce":4,"text":"hello"}"#))
            .unwrap();
        assert_eq!(chat().key_of(&event), MessageKey::new(addr("0xa"), 4));
        assert_eq!(chat().author_of(&event), &addr("0xa"));
    }

    #[test]
    fn rejects_empty_text_and_wrong_shape() {
        let empty = record(1, r#"{"from":"0xa","nonce":0,"text":""}"#);
        assert!(matches!(
            chat().decode(&empty),
            Err(DecodeError::InvalidField { field: "text", .. })
        ));

        let mut other = record(1, r#"{"from":"0xa","nonce":0,"text":"x"}"#);
        other.shape = EventShape::new("Transfer");
        assert_eq!(chat().decode(&other).unwrap_err().kind(), "unknown_shape");
    }

    #[test]
    fn first_writer_wins_on_key_collision() {
        let mut store = ProjectionStore::new();
        store.apply(
            &chat(),
            vec![posted(1, "0xa", 0, "first"), posted(2, "0xa", 0, "second")],
        );
        assert_eq!(
            store.state().get(&MessageKey::new(addr("0xa"), 0)),
            Some(&Message::new("first"))
        );
    }

    #[test]
    fn next_nonce_counts_confirmed_and_pending_posts() {
        let alice = addr("0xa");
        let mut store = ProjectionStore::new();
        store.apply(&chat(), vec![posted(1, "0xa", 0, "one"), posted(2, "0xb", 7, "x")]);
        let mut overlay = OptimisticOverlay::new();
        assert_eq!(ChatDomain::next_nonce(store.state(), &overlay, &alice), 1);

        overlay.insert(
            LocalId::generate(),
            MessageKey::new(alice.clone(), 1),
            Message::new("two"),
            alice.clone(),
            Some(2),
        );
        assert_eq!(ChatDomain::next_nonce(store.state(), &overlay, &alice), 2);
        assert_eq!(ChatDomain::next_nonce(store.state(), &overlay, &addr("0xc")), 0);
    }

    #[test]
    fn feed_lists_confirmed_before_pending() {
        let mut store = ProjectionStore::new();
        store.apply(&chat(), vec![posted(5, "0xb", 0, "later"), posted(2, "0xz", 0, "earlier")]);
        let mut overlay = OptimisticOverlay::new();
        let alice = addr("0xa");
        overlay.insert(
            LocalId::generate(),
            MessageKey::new(alice.clone(), 0),
            Message::new("mine"),
            alice,
            Some(5),
        );

        let view = MergedView::compose(store.state(), &overlay, 1);
        let texts: Vec<_> = ChatDomain::feed(&view).into_iter().map(|item| item.text).collect();
        assert_eq!(texts, vec!["earlier", "later", "mine"]);
    }

    #[test]
    fn intents_must_come_from_the_author() {
        let err = chat()
            .encode_intent(
                &MessageKey::new(addr("0xb"), 0),
                &Message::new("hi"),
                &addr("0xa"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "encode");

        let too_long = chat()
            .encode_intent(
                &MessageKey::new(addr("0xa"), 0),
                &Message::new("a".repeat(300)),
                &addr("0xa"),
            )
            .unwrap_err();
        assert_eq!(too_long.kind(), "encode");
    }
}
