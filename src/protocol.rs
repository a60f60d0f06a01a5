//! JSON wire frames exchanged with the robot.
//!
//! Every frame is a flat JSON object. The `c` field names the command, `f`
//! carries the id of a reliable command (and of its acknowledgment), and `e`
//! carries the sequence number of a device-originated event.
//!
//! ```text
//! client -> robot   {"c":"_gev","f":7,"id":3,"ev":"pos","st":{"armX":140,"armY":-35}}
//! robot  -> client  {"c":"_gev","f":7}                          (ack)
//! robot  -> client  {"c":"_gst","e":12,"3":{...}}               (sequenced event)
//! client -> robot   {"c":"_gst","e":12}                         (echo)
//! ```

use serde_json::{Map, Value};

use crate::chain::ArmInfo;
use crate::error::ChannelError;

/// A decoded frame body.
pub type Message = Map<String, Value>;

/// Field holding the command name.
pub const COMMAND_FIELD: &str = "c";
/// Field holding a reliable command id.
pub const ACK_FIELD: &str = "f";
/// Field holding an inbound event sequence number.
pub const SEQ_FIELD: &str = "e";

/// Command names used by the dashboard protocol.
pub mod commands {
    pub const POSSESS: &str = "possess";
    pub const PONG: &str = "pong";
    pub const LOG: &str = "log";
    pub const GRID_EVENT: &str = "_gev";
    pub const GRID_ALL: &str = "_gall";
    pub const GRID_STATE: &str = "_gst";
    pub const GRID_TAB: &str = "_gtb";
}

/// Classification of an inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Acknowledgment of one of our reliable commands.
    Ack { id: u64, message: Message },
    /// Sequenced event that must be echoed back.
    Event { seq: u64, message: Message },
    /// Anything else.
    Plain(Message),
}

/// Command name of a message, if any.
pub fn command_of(message: &Message) -> Option<&str> {
    message.get(COMMAND_FIELD).and_then(Value::as_str)
}

/// Parse and classify one text frame.
///
/// A frame carrying `f` is an acknowledgment whether or not it also carries
/// `c`; the robot echoes the command name in its acks.
pub fn parse_frame(text: &str) -> Result<Inbound, ChannelError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ChannelError::malformed(format!("invalid JSON: {}", e)))?;
    let message = match value {
        Value::Object(map) => map,
        other => {
            return Err(ChannelError::malformed(format!(
                "expected object, got {}",
                other
            )))
        }
    };

    if let Some(f) = message.get(ACK_FIELD) {
        let id = f
            .as_u64()
            .ok_or_else(|| ChannelError::malformed(format!("bad ack id: {}", f)))?;
        return Ok(Inbound::Ack { id, message });
    }

    if let Some(e) = message.get(SEQ_FIELD) {
        let seq = e
            .as_u64()
            .ok_or_else(|| ChannelError::malformed(format!("bad event sequence: {}", e)))?;
        return Ok(Inbound::Event { seq, message });
    }

    Ok(Inbound::Plain(message))
}

/// Build the message for `command`, optionally tagged with a reliable id.
pub fn build_command(command: &str, payload: Message, id: Option<u64>) -> Message {
    let mut message = payload;
    message.insert(COMMAND_FIELD.to_string(), Value::from(command));
    if let Some(id) = id {
        message.insert(ACK_FIELD.to_string(), Value::from(id));
    }
    message
}

/// Serialize a message to a text frame.
pub fn encode(message: &Message) -> String {
    Value::Object(message.clone()).to_string()
}

/// Echo frame for an inbound event: `{c: <same c>, e: <seq>}`.
pub fn encode_event_echo(seq: u64, event: &Message) -> String {
    let mut echo = Message::new();
    if let Some(c) = event.get(COMMAND_FIELD) {
        echo.insert(COMMAND_FIELD.to_string(), c.clone());
    }
    echo.insert(SEQ_FIELD.to_string(), Value::from(seq));
    encode(&echo)
}

/// Payload of a `_gev` widget event: `{id, ev, st}`.
pub fn grid_event(widget_uuid: u32, event: &str, state: Message) -> Message {
    let mut payload = Message::new();
    payload.insert("id".to_string(), Value::from(widget_uuid));
    payload.insert("ev".to_string(), Value::from(event));
    payload.insert("st".to_string(), Value::Object(state));
    payload
}

/// State carried by a `pos` event.
pub fn position_state(x: f64, y: f64) -> Message {
    let mut st = Message::new();
    st.insert("armX".to_string(), Value::from(x));
    st.insert("armY".to_string(), Value::from(y));
    st
}

/// Extract the state object for `widget_uuid` from a `_gst` frame.
///
/// The robot keys changed widget states by uuid next to `c` and `e`:
/// `{"c":"_gst","e":4,"<uuid>":{...}}`.
pub fn widget_state(message: &Message, widget_uuid: u32) -> Option<&Message> {
    message
        .get(&widget_uuid.to_string())
        .and_then(Value::as_object)
}

/// Tab index carried by a `_gtb` frame.
pub fn tab_index(message: &Message) -> Option<u64> {
    message.get("tab").and_then(Value::as_u64)
}

/// Decode an arm layout from a widget state's `info` property.
pub fn arm_info(state: &Message) -> Result<Option<ArmInfo>, ChannelError> {
    match state.get("info") {
        None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}
