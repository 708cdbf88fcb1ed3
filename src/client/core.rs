//! HTTP client for the chat relay.
//!
//! Owns the local conversation state and reassembles streamed replies:
//! text fragments append to a placeholder turn as they arrive and the
//! final chunk is read as the citation trailer when it parses as one.

use anyhow::{Result, bail};
use futures_util::{Stream, StreamExt};

use crate::api::public::chat::ChatRequest;
use crate::chat::{Sender, Trailer, Turn};

/// Shown in place of a reply when the relay cannot be reached or the
/// stream breaks.
const SEND_FAILED_TEXT: &str =
    "Sorry, I'm having trouble connecting right now. Please try again in a moment.";

pub struct ChatClient {
    relay_url: String,
    http: reqwest::Client,
    turns: Vec<Turn>,
    in_flight: bool,
}

impl ChatClient {
    pub fn new(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            turns: Vec::new(),
            in_flight: false,
        }
    }

    /// The conversation so far, oldest turn first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Send one user message and stream the reply into a new
    /// assistant turn, invoking `on_fragment` for each piece of text
    /// as it arrives.
    ///
    /// Empty input and overlapping sends are silent no-ops. Transport
    /// and decode failures replace the in-progress reply with an
    /// error turn and surface the cause in the returned `Result`; the
    /// turn list is the primary record either way.
    pub async fn send_message<F>(&mut self, input: &str, on_fragment: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        let message = input.trim().to_string();
        if message.is_empty() || self.in_flight {
            return Ok(());
        }

        // The claim is released when the guard drops, which covers a
        // send future dropped at an await point, not just the Ok and
        // Err returns
        let mut guard = InFlightGuard::claim(self);
        guard.client.stream_reply(&message, on_fragment).await
    }

    async fn stream_reply<F>(&mut self, message: &str, on_fragment: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        // The relay rebuilds the conversation from the turns prior to
        // this one plus the new message
        let request = ChatRequest {
            history: self.turns.clone(),
            message: message.to_string(),
        };
        self.turns.push(Turn::new(Sender::User, message));

        let response = match self
            .http
            .post(format!("{}/api/chat", self.relay_url))
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
        {
            Ok(response) => response,
            Err(err) => {
                self.fail_reply(None);
                return Err(err.into());
            }
        };

        let placeholder = Turn::new(Sender::Bot, "");
        let placeholder_id = placeholder.id.clone();
        self.turns.push(placeholder);

        if let Err(err) = consume_reply(
            &mut self.turns,
            &placeholder_id,
            response.bytes_stream(),
            on_fragment,
        )
        .await
        {
            self.fail_reply(Some(&placeholder_id));
            return Err(err);
        }

        Ok(())
    }

    /// Replace the in-progress reply with a visible error turn.
    fn fail_reply(&mut self, placeholder_id: Option<&str>) {
        if let Some(id) = placeholder_id {
            self.turns.retain(|turn| turn.id != id);
        }
        self.turns.push(Turn::new(Sender::Bot, SEND_FAILED_TEXT));
    }
}

/// Holds the client's single-flight claim and releases it on drop.
struct InFlightGuard<'a> {
    client: &'a mut ChatClient,
}

impl<'a> InFlightGuard<'a> {
    fn claim(client: &'a mut ChatClient) -> Self {
        client.in_flight = true;
        Self { client }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.client.in_flight = false;
    }
}

/// Reassemble a streamed reply into the placeholder turn. Every chunk
/// before the last is appended verbatim as it arrives; the last chunk
/// is held back one read and then read as the citation trailer when
/// it parses as one, or appended as trailing text when it does not.
async fn consume_reply<S, B, E, F>(
    turns: &mut Vec<Turn>,
    placeholder_id: &str,
    stream: S,
    mut on_fragment: F,
) -> Result<()>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
    F: FnMut(&str),
{
    futures::pin_mut!(stream);

    let mut decoder = Utf8Decoder::new();
    // One chunk of lookahead, no more: the trailer is just the last
    // chunk, nothing frames it
    let mut pending: Option<String> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        let text = decoder.decode(chunk.as_ref())?;
        if text.is_empty() {
            continue;
        }
        if let Some(previous) = pending.replace(text) {
            append_fragment(turns, placeholder_id, &previous, &mut on_fragment);
        }
    }

    let Some(last) = pending else {
        return Ok(());
    };
    match serde_json::from_str::<Trailer>(&last) {
        Ok(trailer) => {
            if let Some(turn) = turns.iter_mut().find(|turn| turn.id == placeholder_id) {
                turn.sources = trailer.sources;
            }
        }
        // Not a trailer, just trailing text
        Err(_) => append_fragment(turns, placeholder_id, &last, &mut on_fragment),
    }

    Ok(())
}

fn append_fragment<F>(turns: &mut [Turn], id: &str, fragment: &str, on_fragment: &mut F)
where
    F: FnMut(&str),
{
    if let Some(turn) = turns.iter_mut().find(|turn| turn.id == id) {
        turn.text.push_str(fragment);
    }
    on_fragment(fragment);
}

/// Incremental UTF-8 decoder. A multi-byte character split across
/// network reads is carried over to the next chunk; truly invalid
/// bytes are an error.
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    fn new() -> Self {
        Self { carry: Vec::new() }
    }

    fn decode(&mut self, chunk: &[u8]) -> Result<String> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(err) => {
                let utf8_error = err.utf8_error();
                if utf8_error.error_len().is_some() {
                    bail!("Response stream is not valid UTF-8: {}", utf8_error);
                }
                // Incomplete trailing sequence; keep it for the next read
                let valid_up_to = utf8_error.valid_up_to();
                let mut bytes = err.into_bytes();
                self.carry = bytes.split_off(valid_up_to);
                Ok(String::from_utf8(bytes).expect("valid up to the split point"))
            }
        }
    }
}
